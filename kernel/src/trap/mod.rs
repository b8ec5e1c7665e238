//! User/kernel boundary
//!
//! The hosted counterpart of the trap path: first entry of a process
//! (`forkret`), the return to user mode, the timer interrupt and the
//! cooperative kill check made at every crossing.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ksched_api::SchedPolicy;

use crate::cpu;
use crate::process::context::{self, Abandoned};
use crate::process::{Kernel, ProcessExited};
use crate::syscall::UserContext;

/// Decides whether a timer interrupt takes the CPU away from the running process
pub trait Preemption: Send + Sync {
    fn should_preempt(&self, policy: SchedPolicy) -> bool;
}

/// Preempt on every tick under Round-Robin and UNIX feedback; never under FCFS or SJF
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerPreemption;

impl Preemption for TimerPreemption {
    fn should_preempt(&self, policy: SchedPolicy) -> bool {
        policy.is_preemptive()
    }
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Root of every process thread
pub(crate) fn process_main(kernel: Arc<Kernel>) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| -> () { kernel.forkret() }));
    let Err(payload) = result else {
        return;
    };
    if payload.is::<ProcessExited>() || payload.is::<Abandoned>() {
        return;
    }
    kernel.record_fault(panic_message(&*payload));

    // The dispatching scheduler is still waiting for this core and expects
    // to find the slot lock held when it gets it back
    if let Some(p) = kernel.myproc() {
        if !p.inner().holding() {
            std::mem::forget(p.lock());
        }
    }
    if let Some(cpu) = cpu::current() {
        context::release_core(&cpu.context);
    }
}

impl Kernel {
    /// A fork child's very first scheduling by the scheduler
    fn forkret(self: &Arc<Self>) -> ! {
        let p = self.current_proc("forkret");

        // Still holding p->lock from scheduler
        // Safety: the scheduler's guard is not touched until we switch back
        let mut inner = unsafe { p.inner().adopt() };
        let now = self.clock.now();
        inner.stime = Some(now);
        let batch = inner.sched.batch;
        drop(inner);

        if batch {
            self.current_cpu("forkret").batch().begin_epoch_if_unset(now);
        }
        self.usertrapret()
    }

    /// Enter user mode: run the program at the trap frame's pc.
    /// Its return value becomes the exit status.
    fn usertrapret(self: &Arc<Self>) -> ! {
        let p = self.current_proc("usertrapret");
        if p.lock().killed {
            self.exit(-1);
        }

        // Safety: we are the running owner
        let epc = unsafe { p.data_mut() }.trapframe.as_ref().map_or(0, |tf| tf.epc);
        let status = match self.program_at(epc) {
            Some(program) => {
                let mut ctx = UserContext::new(self, p);
                program(&mut ctx)
            }
            None => {
                log::warn!("usertrapret: pid {} no program at {:#x}", p.lock().pid, epc);
                -1
            }
        };
        self.exit(status)
    }

    /// Advance the clock by one tick and wake timed sleepers
    pub(crate) fn clock_tick(&self) {
        let mut ticks = self.clock.lock();
        self.clock.advance(&mut ticks);
        self.wakeup(self.clock.chan());
        drop(ticks);
    }

    /// Timer interrupt taken while the calling process runs in user mode
    pub fn timer_interrupt(&self) {
        if cpu::cpuid() == Some(0) {
            self.clock_tick();
        }
        let Some(p) = self.myproc() else {
            return;
        };
        if p.lock().killed {
            self.exit(-1);
        }
        let policy = self.current_cpu("timer_interrupt").policy();
        if self.preemption.should_preempt(policy) {
            self.yield_now();
        }
    }

    /// Exit if the calling process has been killed
    pub(crate) fn check_killed(&self) {
        if self.killed() {
            self.exit(-1);
        }
    }
}
