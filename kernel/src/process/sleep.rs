//! Sleep/wakeup, kill, yield and the switch back to the scheduler

use std::panic;

use ksched_api::{Chan, Error, Pid, ProcState, Result};

use super::context;
use super::manager::{Kernel, ProcInner};
use crate::cpu;
use crate::sync::SpinLockGuard;

/// Unwinding payload that ends a process thread after its final switch
pub struct ProcessExited;

impl Kernel {
    /// Atomically release `guard` and sleep on `chan`.
    /// Reacquires the lock when awakened.
    pub fn sleep<'a, T: ?Sized>(&self, chan: Chan, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        let p = self.current_proc("sleep");
        let lock = SpinLockGuard::spinlock(&guard);

        // Must acquire p->lock in order to change p->state and then call
        // sched. Once we hold p->lock no wakeup can be missed, so it's okay
        // to release the condition lock.
        let mut inner = p.lock();
        drop(guard);

        inner.chan = Some(chan);
        inner.state = ProcState::Sleeping;
        inner.sched.cpu_usage += self.config.cpu_usage_unit / 2;

        let mut inner = self.sched(inner);

        inner.chan = None;
        drop(inner);
        lock.lock()
    }

    /// Wake up every process sleeping on `chan`, other than the caller.
    /// Must be called without holding any slot lock.
    pub fn wakeup(&self, chan: Chan) {
        let me = self.myproc().map(|p| p.index());
        for p in self.procs.iter() {
            if Some(p.index()) == me {
                continue;
            }
            let mut inner = p.lock();
            if inner.state == ProcState::Sleeping && inner.chan == Some(chan) {
                inner.state = ProcState::Runnable;
                inner.sched.wait_st_time = Some(self.clock.now());
            }
        }
    }

    /// Mark `pid` killed; a sleeper is made RUNNABLE so it notices.
    /// The victim exits the next time it crosses the user/kernel boundary.
    pub fn kill(&self, pid: Pid) -> Result<()> {
        for p in self.procs.iter() {
            let mut inner = p.lock();
            if inner.state == ProcState::Unused || inner.pid != pid {
                continue;
            }
            inner.killed = true;
            if inner.state == ProcState::Sleeping {
                // Wake process from sleep()
                inner.state = ProcState::Runnable;
                inner.sched.wait_st_time = Some(self.clock.now());
            }
            log::debug!("kill: pid {}", pid);
            return Ok(());
        }
        Err(Error::NoSuchProcess)
    }

    /// Whether the calling process has been killed
    pub fn killed(&self) -> bool {
        self.myproc().is_some_and(|p| p.lock().killed)
    }

    /// Give up the CPU for one scheduling round
    pub fn yield_now(&self) {
        let p = self.current_proc("yield");
        let mut inner = p.lock();
        inner.state = ProcState::Runnable;
        inner.sched.cpu_usage += self.config.cpu_usage_unit;
        inner.sched.wait_st_time = Some(self.clock.now());
        let inner = self.sched(inner);
        drop(inner);
    }

    fn check_sched(&self, inner: &SpinLockGuard<'_, ProcInner>) -> std::sync::Arc<cpu::Cpu> {
        let cpu = self.current_cpu("sched");
        if !SpinLockGuard::spinlock(inner).holding() {
            panic!("sched p->lock");
        }
        if cpu.noff() != 1 {
            panic!("sched locks");
        }
        if inner.state == ProcState::Running {
            panic!("sched running");
        }
        if cpu::intr_get() {
            panic!("sched interruptible");
        }
        cpu
    }

    /// Switch to the scheduler. The caller must hold only its own slot lock
    /// and must already have moved out of RUNNING.
    ///
    /// Saves and restores `intena` because it is a property of this kernel
    /// thread, not of the core.
    pub fn sched<'a>(&self, inner: SpinLockGuard<'a, ProcInner>) -> SpinLockGuard<'a, ProcInner> {
        let cpu = self.check_sched(&inner);
        let Some(ctx) = inner.context.clone() else {
            panic!("sched: no context");
        };
        let intena = cpu.intena();
        drop(cpu);

        context::swtch(&ctx, &self.current_cpu("sched").context);

        // Possibly resumed on another core
        self.current_cpu("sched").set_intena(intena);
        inner
    }

    /// Last switch of a zombie: the slot lock stays held for the scheduler
    /// and the thread unwinds to its root.
    pub(crate) fn sched_final(&self, inner: SpinLockGuard<'_, ProcInner>) -> ! {
        let cpu = self.check_sched(&inner);
        let Some(ctx) = inner.context.clone() else {
            panic!("sched: no context");
        };
        // The scheduler releases the slot lock
        std::mem::forget(inner);
        context::swtch_final(&ctx, &cpu.context);
        drop(cpu);
        panic::resume_unwind(Box::new(ProcessExited))
    }
}
