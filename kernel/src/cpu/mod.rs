// Per-core descriptors
// Current process, scheduler context, policy and interrupt nesting per core

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};

use ksched_api::{SchedPolicy, Tick};

use crate::process::context::Context;
use crate::sched::stats::{BatchStats, BatchSummary};

pub use ksched_api::config::NCPU;

/// Interrupt enable flag plus push_off nesting for one execution stream
pub struct IntrState {
    /// Simulated interrupt-enable bit
    enabled: AtomicBool,
    /// Interrupt disable nesting depth
    noff: AtomicI32,
    /// Were interrupts enabled before the outermost push_off?
    intena: AtomicBool,
}

impl IntrState {
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            noff: AtomicI32::new(0),
            intena: AtomicBool::new(false),
        }
    }
}

/// Per-CPU state
pub struct Cpu {
    /// Core number, 0-based
    pub id: usize,

    /// Slot index + 1 of the process running here, 0 if idle
    proc: AtomicUsize,

    /// Scheduler context for this CPU
    pub(crate) context: Arc<Context>,

    intr: IntrState,

    /// Raw policy value; validated by the scheduler loop
    policy: AtomicI32,

    /// Batch-epoch accumulators
    batch: spin::Mutex<BatchStats>,

    /// Summaries of closed epochs, oldest first
    summaries: spin::Mutex<Vec<BatchSummary>>,

    /// Number of dispatches performed by this core
    switches: AtomicU64,
}

impl Cpu {
    pub fn new(id: usize, policy: SchedPolicy) -> Self {
        Self {
            id,
            proc: AtomicUsize::new(0),
            context: Arc::new(Context::new()),
            intr: IntrState::new(false),
            policy: AtomicI32::new(policy.raw()),
            batch: spin::Mutex::new(BatchStats::default()),
            summaries: spin::Mutex::new(Vec::new()),
            switches: AtomicU64::new(0),
        }
    }

    /// Slot index of the process running on this core
    pub fn current_slot(&self) -> Option<usize> {
        match self.proc.load(Ordering::Acquire) {
            0 => None,
            n => Some(n - 1),
        }
    }

    pub(crate) fn set_proc(&self, slot: Option<usize>) {
        if slot.is_some() {
            self.switches.fetch_add(1, Ordering::Relaxed);
        }
        self.proc.store(slot.map_or(0, |s| s + 1), Ordering::Release);
    }

    /// Current policy.
    ///
    /// Panics if the raw value is not one of the four known policies.
    pub fn policy(&self) -> SchedPolicy {
        let raw = self.policy.load(Ordering::Acquire);
        match SchedPolicy::from_raw(raw) {
            Ok(policy) => policy,
            Err(_) => panic!("Scheduling policy not found"),
        }
    }

    /// Whether the stored policy is one of `policies`. An unknown raw value
    /// matches nothing.
    pub fn policy_in(&self, policies: &[SchedPolicy]) -> bool {
        let raw = self.policy.load(Ordering::Acquire);
        policies.iter().any(|p| p.raw() == raw)
    }

    /// Store a raw policy value and return the previous one
    pub fn exchange_policy(&self, raw: i32) -> i32 {
        self.policy.swap(raw, Ordering::AcqRel)
    }

    pub fn set_policy(&self, policy: SchedPolicy) -> i32 {
        self.exchange_policy(policy.raw())
    }

    pub fn batch(&self) -> spin::MutexGuard<'_, BatchStats> {
        self.batch.lock()
    }

    /// Mark the start of a batch epoch at `tick`
    pub fn begin_batch_epoch(&self, tick: Tick) {
        self.batch.lock().epoch_start = Some(tick);
    }

    pub(crate) fn push_summary(&self, summary: BatchSummary) {
        self.summaries.lock().push(summary);
    }

    pub fn summaries(&self) -> Vec<BatchSummary> {
        self.summaries.lock().clone()
    }

    pub fn switches(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    pub fn noff(&self) -> i32 {
        self.intr.noff.load(Ordering::Relaxed)
    }

    pub fn intena(&self) -> bool {
        self.intr.intena.load(Ordering::Relaxed)
    }

    pub(crate) fn set_intena(&self, intena: bool) {
        self.intr.intena.store(intena, Ordering::Relaxed);
    }
}

// ============================================================================
// Current CPU binding
// ============================================================================

/// Lock owner tokens 1..=NCPU belong to cores; off-core threads get larger ones
static NEXT_DETACHED_TOKEN: AtomicUsize = AtomicUsize::new(NCPU + 1);

thread_local! {
    static CURRENT: RefCell<Option<Arc<Cpu>>> = const { RefCell::new(None) };
    static DETACHED: IntrState = const { IntrState::new(true) };
    static DETACHED_TOKEN: usize = NEXT_DETACHED_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// CPU this thread is currently executing on, if any
pub fn current() -> Option<Arc<Cpu>> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Id of the CPU this thread is executing on
pub fn cpuid() -> Option<usize> {
    CURRENT.with(|c| c.borrow().as_ref().map(|cpu| cpu.id))
}

/// Bind (or unbind) the calling thread to a core
pub(crate) fn bind(cpu: Option<Arc<Cpu>>) {
    CURRENT.with(|c| *c.borrow_mut() = cpu);
}

/// Identity recorded by spin locks: the core when on one, the thread otherwise
pub fn lock_token() -> usize {
    match cpuid() {
        Some(id) => id + 1,
        None => DETACHED_TOKEN.with(|t| *t),
    }
}

fn with_intr<R>(f: impl FnOnce(&IntrState) -> R) -> R {
    CURRENT.with(|c| match c.borrow().as_ref() {
        Some(cpu) => f(&cpu.intr),
        None => DETACHED.with(|d| f(d)),
    })
}

// ============================================================================
// Interrupt Control with Nesting
// ============================================================================

/// Disable interrupts and track nesting level
/// Called at the start of critical sections
pub fn push_off() {
    with_intr(|st| {
        let old = st.enabled.swap(false, Ordering::Relaxed);
        if st.noff.load(Ordering::Relaxed) == 0 {
            st.intena.store(old, Ordering::Relaxed);
        }
        st.noff.fetch_add(1, Ordering::Relaxed);
    });
}

/// Re-enable interrupts if we've popped all push_off calls
pub fn pop_off() {
    with_intr(|st| {
        if st.enabled.load(Ordering::Relaxed) {
            panic!("pop_off - interruptible");
        }
        let noff = st.noff.load(Ordering::Relaxed);
        if noff < 1 {
            panic!("pop_off");
        }
        st.noff.store(noff - 1, Ordering::Relaxed);
        if noff == 1 && st.intena.load(Ordering::Relaxed) {
            st.enabled.store(true, Ordering::Relaxed);
        }
    });
}

pub fn intr_on() {
    with_intr(|st| st.enabled.store(true, Ordering::Relaxed));
}

pub fn intr_off() {
    with_intr(|st| st.enabled.store(false, Ordering::Relaxed));
}

pub fn intr_get() -> bool {
    with_intr(|st| st.enabled.load(Ordering::Relaxed))
}

/// Interrupt nesting depth of the calling execution stream
pub fn noff() -> i32 {
    with_intr(|st| st.noff.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_nesting_restores_state() {
        let cpu = Arc::new(Cpu::new(0, SchedPolicy::Fcfs));
        bind(Some(cpu.clone()));
        intr_on();

        push_off();
        push_off();
        assert!(!intr_get());
        assert_eq!(cpu.noff(), 2);
        assert!(cpu.intena());

        pop_off();
        assert!(!intr_get());
        pop_off();
        assert!(intr_get());
        assert_eq!(cpu.noff(), 0);

        bind(None);
    }

    #[test]
    fn test_detached_thread_token_is_not_a_core() {
        bind(None);
        assert!(lock_token() > NCPU);
        let cpu = Arc::new(Cpu::new(3, SchedPolicy::Fcfs));
        bind(Some(cpu));
        assert_eq!(lock_token(), 4);
        bind(None);
    }

    #[test]
    fn test_policy_exchange_returns_previous() {
        let cpu = Cpu::new(0, SchedPolicy::Sjf);
        assert_eq!(cpu.set_policy(SchedPolicy::Unix), SchedPolicy::Sjf.raw());
        assert_eq!(cpu.policy(), SchedPolicy::Unix);
    }

    #[test]
    fn test_policy_in_ignores_unknown_values() {
        let cpu = Cpu::new(0, SchedPolicy::RoundRobin);
        assert!(cpu.policy_in(&[SchedPolicy::Fcfs, SchedPolicy::RoundRobin]));
        assert!(!cpu.policy_in(&[SchedPolicy::Sjf]));
        cpu.exchange_policy(42);
        assert!(!cpu.policy_in(&[SchedPolicy::Fcfs, SchedPolicy::RoundRobin]));
    }

    #[test]
    #[should_panic(expected = "Scheduling policy not found")]
    fn test_invalid_policy_is_fatal() {
        let cpu = Cpu::new(0, SchedPolicy::Fcfs);
        cpu.exchange_policy(42);
        cpu.policy();
    }
}
