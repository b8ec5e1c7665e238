//! Per-core scheduler loop
//!
//! Each core runs [`Kernel::scheduler`] on its own thread over the shared
//! process table. A pass of the loop applies the core's current policy:
//! - FCFS / Round-Robin: dispatch every RUNNABLE slot in table order. The two
//!   differ only in whether the timer interrupt preempts (see `trap`).
//! - SJF: non-batch processes run at once; otherwise the batch process with
//!   the smallest predicted burst runs to its next block or exit.
//! - UNIX feedback: non-batch processes run at once; otherwise the batch
//!   process with the lowest decayed priority runs, longest waiter on a tie.

pub mod policy;
pub mod stats;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ksched_api::{ProcState, SchedPolicy};

use crate::cpu::{self, Cpu};
use crate::process::context;
use crate::process::{Kernel, Proc, ProcInner};
use crate::sync::SpinLockGuard;

use self::policy::{Candidate, decay_usage, effective_priority, predict_next_burst};

impl Kernel {
    /// Scheduler loop of `cpu`. Returns only once the machine halts.
    pub fn scheduler(&self, cpu: Arc<Cpu>) {
        cpu.context.attach_current();
        cpu::bind(Some(cpu.clone()));
        cpu.set_proc(None);

        while !self.is_halted() {
            // Avoid deadlock by ensuring that devices can interrupt
            cpu::intr_on();

            let ran = match cpu.policy() {
                SchedPolicy::Fcfs | SchedPolicy::RoundRobin => self.round_robin_pass(&cpu),
                SchedPolicy::Sjf => self.sjf_pass(&cpu),
                SchedPolicy::Unix => self.unix_pass(&cpu),
            };
            if !ran {
                self.idle(&cpu);
            }
        }

        cpu::bind(None);
    }

    /// Nothing to run: wait for the next timer interrupt
    fn idle(&self, cpu: &Cpu) {
        thread::sleep(Duration::from_micros(self.config.idle_wait_us));
        if cpu.id == 0 {
            self.clock_tick();
        }
    }

    /// Switch to a RUNNABLE process whose lock the caller holds and return
    /// once it gives the core back.
    fn dispatch<'a>(
        &self,
        cpu: &Arc<Cpu>,
        p: &'a Proc,
        mut inner: SpinLockGuard<'a, ProcInner>,
    ) -> SpinLockGuard<'a, ProcInner> {
        if self.cpus.iter().any(|c| c.id != cpu.id && c.current_slot() == Some(p.index())) {
            panic!("double dispatch of slot {}", p.index());
        }
        let Some(ctx) = inner.context.clone() else {
            panic!("dispatch: slot {} has no context", p.index());
        };

        inner.sched.account_wait(self.clock.now());
        inner.state = ProcState::Running;
        cpu.set_proc(Some(p.index()));

        context::swtch(&cpu.context, &ctx);

        // Process is done running for now.
        // It should have changed its state before coming back.
        cpu.set_proc(None);
        inner
    }

    fn round_robin_pass(&self, cpu: &Arc<Cpu>) -> bool {
        let mut ran = false;
        for p in self.procs.iter() {
            let inner = p.lock();
            if inner.state == ProcState::Runnable {
                drop(self.dispatch(cpu, p, inner));
                ran = true;
                // A policy switch takes effect before the next dispatch
                if !cpu.policy_in(&[SchedPolicy::Fcfs, SchedPolicy::RoundRobin]) {
                    break;
                }
            }
        }
        ran
    }

    fn sjf_pass(&self, cpu: &Arc<Cpu>) -> bool {
        let mut leader: Option<(&Proc, i64)> = None;

        for p in self.procs.iter() {
            let inner = p.lock();
            if inner.state != ProcState::Runnable {
                continue;
            }
            if !inner.sched.batch {
                drop(self.dispatch(cpu, p, inner));
                return true;
            }
            let predicted = inner.sched.next_burst_len;
            if leader.is_none_or(|(_, best)| predicted < best) {
                leader = Some((p, predicted));
            }
        }

        let Some((p, _)) = leader else {
            return false;
        };
        let mut inner = p.lock();
        // Another core may have taken it, or the policy moved on
        if inner.state != ProcState::Runnable || !inner.sched.batch || cpu.policy() != SchedPolicy::Sjf {
            return false;
        }

        let start = self.clock.now();
        inner.sched.prev_burst_start = Some(start);
        let mut inner = self.dispatch(cpu, p, inner);

        let measured = self.clock.now().saturating_sub(start) as i64;
        let previous = inner.sched.next_burst_len;
        let next = predict_next_burst(measured, previous, self.config.sjf_alpha);
        inner.sched.next_burst_len = next;
        if inner.state != ProcState::Zombie {
            cpu.batch().record_burst(measured, previous, next);
        }
        true
    }

    fn unix_pass(&self, cpu: &Arc<Cpu>) -> bool {
        let now = self.clock.now();
        let mut leader: Option<(&Proc, Candidate)> = None;

        for p in self.procs.iter() {
            let mut inner = p.lock();
            if inner.state != ProcState::Runnable {
                continue;
            }
            if !inner.sched.batch {
                drop(self.dispatch(cpu, p, inner));
                return true;
            }
            decay_usage(&mut inner.sched, self.config.usage_decay_divisor);
            let candidate = Candidate {
                priority: effective_priority(&inner.sched, self.config.usage_priority_divisor),
                waiting: inner.sched.waiting_at(now),
            };
            if leader.is_none_or(|(_, best)| candidate.beats(&best)) {
                leader = Some((p, candidate));
            }
        }

        let Some((p, _)) = leader else {
            return false;
        };
        let inner = p.lock();
        if inner.state != ProcState::Runnable || !inner.sched.batch || cpu.policy() != SchedPolicy::Unix {
            return false;
        }
        drop(self.dispatch(cpu, p, inner));
        true
    }
}
