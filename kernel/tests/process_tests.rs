//! Process lifecycle tests
//! fork/exit/wait, reparenting, kill, sleep/wakeup and collaborator calls

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;

use common::*;
use ksched::host::HostFiles;
use ksched::sync::SpinLock;
use ksched::{Chan, Error, MachineBuilder, ProcState, SchedConfig, SchedPolicy};
use ksched_api::{AddressSpaceManager, SpaceId};
use mockall::mock;

mod lifecycle_tests {
    use super::*;

    /// fork, exit(code), wait returns the same pid and code; the slot is reused
    #[test]
    fn test_fork_exit_wait_reuses_slot() {
        let (tx, rx) = mpsc::channel();
        // Room for the root process and a single child
        let config = SchedConfig { nproc: 2, ..config(SchedPolicy::Fcfs) };
        let _machine = boot(config, move |ctx| {
            if ctx.a0() == 0 {
                return 40 + ctx.arg(1).unwrap_or(0) as i32;
            }
            for round in 0..3 {
                ctx.set_arg(1, round);
                let pid = ctx.fork().expect("fork");
                let reaped = ctx.wait().expect("wait");
                tx.send((pid, reaped, ctx.ps().len())).unwrap();
            }
            reap_forever(ctx)
        });

        let mut pids = HashSet::new();
        for round in 0..3 {
            let (pid, reaped, live) = recv(&rx);
            assert_eq!(reaped.pid, pid);
            assert_eq!(reaped.status, 40 + round);
            assert_eq!(live, 1);
            assert!(pids.insert(pid), "pids are never reused");
        }
    }

    /// wait with no children fails at once
    #[test]
    fn test_wait_without_children() {
        let (tx, rx) = mpsc::channel();
        let _machine = boot(config(SchedPolicy::Fcfs), move |ctx| {
            tx.send(ctx.wait().map(|r| r.pid)).unwrap();
            tx.send(ctx.wait_for(99).map(|r| r.pid)).unwrap();
            reap_forever(ctx)
        });
        assert_eq!(recv(&rx), Err(Error::NoChildren));
        assert_eq!(recv(&rx), Err(Error::NoChildren));
    }

    /// wait_for skips other children
    #[test]
    fn test_wait_for_specific_child() {
        let (tx, rx) = mpsc::channel();
        let _machine = boot(config(SchedPolicy::Fcfs), move |ctx| {
            if ctx.a0() == 0 {
                return ctx.arg(1).unwrap_or(0) as i32;
            }
            ctx.set_arg(1, 1);
            let first = ctx.fork().expect("fork");
            ctx.set_arg(1, 2);
            let second = ctx.fork().expect("fork");
            tx.send(ctx.wait_for(second).expect("wait_for")).unwrap();
            tx.send(ctx.wait_for(first).expect("wait_for")).unwrap();
            reap_forever(ctx)
        });
        let second = recv(&rx);
        let first = recv(&rx);
        assert_eq!((second.status, first.status), (2, 1));
        assert_eq!(second.pid, first.pid + 1);
    }

    /// A child whose parent exits first is reaped by the root process
    #[test]
    fn test_orphan_is_reparented_to_root() {
        let (tx, rx) = mpsc::channel();
        let _machine = boot(config(SchedPolicy::Fcfs), move |ctx| {
            match (ctx.a0(), ctx.arg(1)) {
                (0, Some(1)) => {
                    ctx.set_arg(1, 2);
                    ctx.fork().expect("fork grandchild");
                    return 7;
                }
                (0, _) => {
                    let _ = ctx.sleep_ticks(3);
                    tx.send(Err(ctx.getppid())).unwrap();
                    return 9;
                }
                _ => {}
            }
            ctx.set_arg(1, 1);
            ctx.fork().expect("fork");
            for _ in 0..2 {
                tx.send(Ok(ctx.wait().expect("wait").status)).unwrap();
            }
            reap_forever(ctx)
        });

        let events = recv_n(&rx, 3);
        assert!(events.contains(&Err(Some(1))), "orphan sees the root as parent: {:?}", events);
        assert!(events.contains(&Ok(7)));
        assert!(events.contains(&Ok(9)));
    }

    /// The exit status lands in the parent's memory
    #[test]
    fn test_wait_copies_status_out() {
        let (tx, rx) = mpsc::channel();
        let _machine = boot(config(SchedPolicy::Fcfs), move |ctx| {
            if ctx.a0() == 0 {
                return -5;
            }
            let pid = ctx.fork().expect("fork");
            // Out of range: the child stays a zombie
            let bad = ctx.wait_into(1 << 20);
            let state = ctx.kernel().state_of(pid);
            let reaped = ctx.wait_into(64).expect("wait_into");
            let mut buf = [0u8; 4];
            ctx.copy_in(&mut buf, 64).expect("copy_in");
            tx.send((bad.map(|r| r.pid), state, reaped.pid == pid, i32::from_le_bytes(buf)))
                .unwrap();
            reap_forever(ctx)
        });
        let (bad, state, same, status) = recv(&rx);
        assert_eq!(bad, Err(Error::BadAddress));
        assert_eq!(state, Some(ProcState::Zombie));
        assert!(same);
        assert_eq!(status, -5);
    }

    /// sbrk returns the old size and the listing reports the new one
    #[test]
    fn test_sbrk_grows_and_shrinks() {
        let (tx, rx) = mpsc::channel();
        let _machine = boot(config(SchedPolicy::Fcfs), move |ctx| {
            let grown = ctx.sbrk(8192);
            let size = ctx.pinfo(None).map(|i| i.size);
            let shrunk = ctx.sbrk(-4096);
            let after = ctx.pinfo(None).map(|i| i.size);
            let too_far = ctx.sbrk(-1 << 30);
            tx.send((grown, size, shrunk, after, too_far)).unwrap();
            reap_forever(ctx)
        });
        let (grown, size, shrunk, after, too_far) = recv(&rx);
        assert_eq!(grown, Ok(4096));
        assert_eq!(size, Ok(12288));
        assert_eq!(shrunk, Ok(12288));
        assert_eq!(after, Ok(8192));
        assert_eq!(too_far, Err(Error::BadAddress));
    }
}

mod kill_tests {
    use super::*;

    /// Killing a sleeper makes it RUNNABLE and it exits with -1
    #[test]
    fn test_kill_sleeping_child() {
        let (tx, rx) = mpsc::channel();
        let _machine = boot(config(SchedPolicy::Fcfs), move |ctx| {
            if ctx.a0() == 0 {
                let _ = ctx.sleep_ticks(1_000_000);
                return 0;
            }
            let pid = ctx.fork().expect("fork");
            until_sleeping(ctx, pid);
            let before = ctx.kernel().state_of(pid);
            ctx.kill(pid).expect("kill");
            let state = ctx.kernel().state_of(pid);
            let reaped = ctx.wait().expect("wait");
            tx.send((before, state, reaped.pid == pid, reaped.status)).unwrap();
            tx.send((None, None, ctx.kill(12345).is_ok(), 0)).unwrap();
            reap_forever(ctx)
        });
        assert_eq!(
            recv(&rx),
            (Some(ProcState::Sleeping), Some(ProcState::Runnable), true, -1)
        );
        assert_eq!(recv(&rx), (None, None, false, 0));
    }

    /// A killed runnable process exits at its next timer interrupt
    #[test]
    fn test_kill_running_child_at_boundary() {
        let (tx, rx) = mpsc::channel();
        let _machine = boot(config(SchedPolicy::RoundRobin), move |ctx| {
            if ctx.a0() == 0 {
                loop {
                    ctx.compute(1);
                }
            }
            let pid = ctx.fork().expect("fork");
            let _ = ctx.sleep_ticks(3);
            ctx.kill(pid).expect("kill");
            tx.send(ctx.wait().expect("wait").status).unwrap();
            reap_forever(ctx)
        });
        assert_eq!(recv(&rx), -1);
    }
}

mod sleep_tests {
    use super::*;

    /// Two sleepers on one channel are both woken by a single wakeup
    #[test]
    fn test_wakeup_is_broadcast() {
        let (tx, rx) = mpsc::channel();
        let flag = Arc::new(SpinLock::new(false, "flag"));
        let _machine = boot(config(SchedPolicy::RoundRobin), move |ctx| {
            let chan = Chan::of(&*flag);
            let kernel = Arc::clone(ctx.kernel());
            if ctx.a0() == 0 {
                let mut ready = flag.lock();
                while !*ready {
                    ready = kernel.sleep(chan, ready);
                }
                return 0;
            }
            let a = ctx.fork().expect("fork");
            let b = ctx.fork().expect("fork");
            until_sleeping(ctx, a);
            until_sleeping(ctx, b);
            *flag.lock() = true;
            kernel.wakeup(chan);
            let states = (kernel.state_of(a), kernel.state_of(b));
            let statuses = (ctx.wait().expect("wait").status, ctx.wait().expect("wait").status);
            tx.send((states, statuses)).unwrap();
            reap_forever(ctx)
        });
        let (states, statuses) = recv(&rx);
        assert_eq!(states, (Some(ProcState::Runnable), Some(ProcState::Runnable)));
        assert_eq!(statuses, (0, 0));
    }

    /// Timed sleep lasts at least the requested number of ticks
    #[test]
    fn test_sleep_ticks_waits() {
        let (tx, rx) = mpsc::channel();
        let _machine = boot(config(SchedPolicy::Fcfs), move |ctx| {
            let before = ctx.uptime();
            ctx.sleep_ticks(10).expect("sleep");
            tx.send(ctx.uptime() - before).unwrap();
            reap_forever(ctx)
        });
        assert!(recv(&rx) >= 10);
    }
}

mod resource_tests {
    use super::*;

    /// Descriptors and the working directory are shared on fork and dropped on exit
    #[test]
    fn test_files_follow_fork_and_exit() {
        let (tx, rx) = mpsc::channel();
        let files = Arc::new(HostFiles::new());
        let console = files.open("console");
        let seen = Arc::clone(&files);
        let _machine = MachineBuilder::new(config(SchedPolicy::Fcfs))
            .files(files.clone())
            .program(INIT, move |ctx| {
                if ctx.a0() == 0 {
                    tx.send(("child", seen.refcount(console), ctx.file(0))).unwrap();
                    return 0;
                }
                let fd = ctx.install_file(console).expect("fd");
                ctx.fork().expect("fork");
                ctx.wait().expect("wait");
                tx.send(("parent", seen.refcount(console), ctx.file(fd))).unwrap();
                reap_forever(ctx)
            })
            .boot(INIT)
            .expect("boot");

        assert_eq!(recv(&rx), ("child", 2, Some(console)));
        assert_eq!(recv(&rx), ("parent", 1, Some(console)));
        assert_eq!(files.dir_refs(ksched::host::fs::ROOT_DIR), 1);
    }

    mock! {
        pub Spaces {}
        impl AddressSpaceManager for Spaces {
            fn create_space(&self) -> ksched::Result<SpaceId>;
            fn duplicate_space(&self, src: SpaceId, dst: SpaceId, size: usize) -> ksched::Result<usize>;
            fn grow(&self, space: SpaceId, old_size: usize, new_size: usize) -> ksched::Result<usize>;
            fn shrink(&self, space: SpaceId, old_size: usize, new_size: usize) -> ksched::Result<usize>;
            fn destroy_space(&self, space: SpaceId, size: usize);
            fn copy_out(&self, space: SpaceId, dst: usize, src: &[u8]) -> ksched::Result<()>;
            fn copy_in(&self, space: SpaceId, dst: &mut [u8], src: usize) -> ksched::Result<()>;
        }
    }

    /// A failed address-space copy releases the half-built child
    #[test]
    fn test_fork_failure_releases_child() {
        let next = Arc::new(AtomicU64::new(1));
        let destroyed = Arc::new(AtomicUsize::new(0));
        let mut vm = MockSpaces::new();
        vm.expect_create_space()
            .returning(move || Ok(SpaceId(next.fetch_add(1, Ordering::Relaxed))));
        vm.expect_grow().returning(|_, _, new| Ok(new));
        vm.expect_duplicate_space().returning(|_, _, _| Err(Error::OutOfMemory));
        let counter = Arc::clone(&destroyed);
        vm.expect_destroy_space().returning(move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let (tx, rx) = mpsc::channel();
        let _machine = MachineBuilder::new(config(SchedPolicy::Fcfs))
            .address_spaces(Arc::new(vm))
            .program(INIT, move |ctx| {
                tx.send((ctx.fork(), ctx.ps().len())).unwrap();
                reap_forever(ctx)
            })
            .boot(INIT)
            .expect("boot");

        assert_eq!(recv(&rx), (Err(Error::OutOfMemory), 1));
        assert_eq!(destroyed.load(Ordering::Relaxed), 1);
    }

    /// A full table is a plain failure
    #[test]
    fn test_table_full() {
        let (tx, rx) = mpsc::channel();
        let config = SchedConfig { nproc: 3, ..config(SchedPolicy::Fcfs) };
        let _machine = boot(config, move |ctx| {
            if ctx.a0() == 0 {
                return 0;
            }
            let results: Vec<_> = (0..3).map(|_| ctx.fork().is_ok()).collect();
            tx.send(results).unwrap();
            reap_forever(ctx)
        });
        assert_eq!(recv(&rx), vec![true, true, false]);
    }
}

mod listing_tests {
    use super::*;

    /// ps reports parentage, state names and stamps
    #[test]
    fn test_ps_lists_live_processes() {
        let (tx, rx) = mpsc::channel();
        let _machine = boot(config(SchedPolicy::Fcfs), move |ctx| {
            if ctx.a0() == 0 {
                let _ = ctx.sleep_ticks(1_000_000);
                return 0;
            }
            let pid = ctx.fork().expect("fork");
            until_sleeping(ctx, pid);
            let listing = ctx.ps();
            tx.send(listing).unwrap();
            ctx.kill(pid).expect("kill");
            reap_forever(ctx)
        });
        let listing = recv(&rx);
        assert_eq!(listing.len(), 2);
        let init = &listing[0];
        assert_eq!((init.pid, init.ppid, init.state), (1, None, ProcState::Running));
        assert_eq!(init.name, "initcode");
        let child = &listing[1];
        assert_eq!((child.ppid, child.state), (Some(1), ProcState::Sleeping));
        assert_eq!(child.name, "initcode");
        assert!(child.stime.is_some());
        assert!(child.to_string().contains("state=sleep, cmd=initcode"));
    }

    /// The root process may never exit
    #[test]
    fn test_init_exit_is_fatal() {
        let machine = boot(config(SchedPolicy::Fcfs), |_| 0);
        assert_eq!(wait_fault(&machine), "init exiting");
    }

    /// An unknown policy stops the core at its next pass
    #[test]
    fn test_unknown_policy_is_fatal() {
        let machine = boot(config(SchedPolicy::Fcfs), |ctx| {
            assert_eq!(ctx.schedpolicy(42), SchedPolicy::Fcfs.raw());
            ctx.yield_now();
            reap_forever(ctx)
        });
        assert_eq!(wait_fault(&machine), "Scheduling policy not found");
    }

    /// Yielding while holding a second lock violates the switch contract
    #[test]
    fn test_sched_with_extra_lock_is_fatal() {
        let machine = boot(config(SchedPolicy::Fcfs), |ctx| {
            let extra = SpinLock::new((), "extra");
            let _held = extra.lock();
            ctx.kernel().yield_now();
            reap_forever(ctx)
        });
        assert_eq!(wait_fault(&machine), "sched locks");
    }
}
