//! Process termination, reparenting and reaping

use ksched_api::{Error, Pid, ProcState, Result};

use super::manager::{Kernel, Proc};
use crate::sched::stats::ExitSample;

/// A reaped child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRecord {
    pub pid: Pid,
    pub status: i32,
}

impl Kernel {
    /// Terminate the calling process. Never returns.
    ///
    /// The process stays ZOMBIE until its parent (or the root process, if
    /// the parent is gone first) reaps it.
    pub fn exit(&self, status: i32) -> ! {
        let p = self.current_proc("exit");
        if self.init_slot() == Some(p.index()) {
            panic!("init exiting");
        }

        // Files go back to the file layer before any lock is taken
        // Safety: we are the running owner
        let data = unsafe { p.data_mut() };
        for fd in data.ofile.iter_mut() {
            if let Some(handle) = fd.take() {
                self.files.close_handle(handle);
            }
        }
        if let Some(cwd) = data.cwd.take() {
            self.files.release_directory_ref(cwd);
        }

        let mut parents = self.parents.lock();

        // Give any children to init
        self.reparent(p, &mut parents);

        // Parent might be sleeping in wait()
        if let Some(parent) = parents[p.index()] {
            self.wakeup(self.procs[parent].wait_chan());
        }

        let mut inner = p.lock();
        inner.xstate = status;
        inner.state = ProcState::Zombie;
        drop(parents);

        let now = self.clock.now();
        inner.endtime = Some(now);

        if inner.sched.batch {
            let cpu = self.current_cpu("exit");
            let policy = cpu.policy();
            let sample = ExitSample {
                ctime: inner.ctime,
                endtime: now,
                wait_time: inner.sched.wait_time,
                burst_start: inner.sched.prev_burst_start,
                predicted: inner.sched.next_burst_len,
            };
            let summary = {
                let mut stats = cpu.batch();
                stats.record_exit(sample, policy);
                stats.try_close(now, policy)
            };
            if let Some(summary) = summary {
                for line in summary.to_string().lines() {
                    log::info!("{}", line);
                }
                cpu.push_summary(summary);
            }
        }

        log::debug!("exit: pid {} status {}", inner.pid, status);
        self.sched_final(inner)
    }

    /// Hand every child of `p` to the root process.
    ///
    /// Takes the parent table itself so it can only be called with the
    /// parent-child lock held.
    pub fn reparent(&self, p: &Proc, parents: &mut [Option<usize>]) {
        let init = self.init_slot();
        for parent in parents.iter_mut() {
            if *parent == Some(p.index()) {
                *parent = init;
                if let Some(init) = init {
                    self.wakeup(self.procs[init].wait_chan());
                }
            }
        }
    }

    /// Wait for any child to exit.
    ///
    /// With `status_addr` the exit status is also copied into the caller's
    /// address space; if that copy fails the child is left unreaped.
    pub fn wait(&self, status_addr: Option<usize>) -> Result<ExitRecord> {
        self.wait_inner(None, status_addr)
    }

    /// Wait for the child `pid` to exit
    pub fn wait_for(&self, pid: Pid, status_addr: Option<usize>) -> Result<ExitRecord> {
        self.wait_inner(Some(pid), status_addr)
    }

    fn wait_inner(&self, target: Option<Pid>, status_addr: Option<usize>) -> Result<ExitRecord> {
        let p = self.myproc().ok_or(Error::NoSuchProcess)?;
        let mut parents = self.parents.lock();

        loop {
            let mut havekids = false;
            for np in self.procs.iter() {
                if parents[np.index()] != Some(p.index()) {
                    continue;
                }
                // make sure the child isn't still in exit() or swtch()
                let mut child = np.lock();
                if target.is_some_and(|pid| child.pid != pid) {
                    continue;
                }
                havekids = true;
                if child.state != ProcState::Zombie {
                    continue;
                }

                let record = ExitRecord { pid: child.pid, status: child.xstate };
                if let Some(addr) = status_addr {
                    self.copy_out_proc(p, addr, &record.status.to_le_bytes())?;
                }
                parents[np.index()] = None;
                self.release(np, &mut child);
                log::debug!("wait: reaped pid {} status {}", record.pid, record.status);
                return Ok(record);
            }

            if !havekids {
                return Err(Error::NoChildren);
            }
            if p.lock().killed {
                return Err(Error::Killed);
            }

            // Wait for a child to exit
            parents = self.sleep(p.wait_chan(), parents);
        }
    }
}
