//! Core Process Management
//!
//! This module provides the process table and the kernel object that owns it:
//! - Process slots with per-slot locks
//! - The global parent-child lock
//! - Process allocation, release and the root process
//! - Per-core descriptors, the tick clock and the collaborator handles
//!
//! Lock order: the parent-child lock is always taken before any slot lock.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use hashbrown::HashMap;
use ksched_api::{
    AddressSpaceManager, Chan, DirRef, Error, FileHandle, FileLayer, Pid, ProcState, Result, SchedConfig,
    SchedPolicy, SpaceId, Tick, TrapFrame, TrapFrameAllocator,
};

use crate::cpu::{self, Cpu};
use crate::param::{MAXNAME, ROOT_PATH};
use crate::process::context::Context;
use crate::sched::policy::SchedParams;
use crate::sched::stats::{BatchStats, BatchSummary};
use crate::syscall::UserContext;
use crate::sync::{SpinLock, SpinLockGuard};
use crate::time::TickClock;
use crate::trap::{self, Preemption};

// ============================================================================
// Types
// ============================================================================

/// Process name, truncated to `MAXNAME` bytes
pub type ProcName = heapless::String<MAXNAME>;

/// A user program: runs on entry to user mode, returns the exit status
pub type UserFn = Arc<dyn Fn(&mut UserContext<'_>) -> i32 + Send + Sync>;

/// Slot state guarded by the slot lock
pub struct ProcInner {
    pub pid: Pid,
    pub state: ProcState,
    /// Sleep channel, set only while SLEEPING
    pub chan: Option<Chan>,
    pub killed: bool,
    pub xstate: i32,
    pub name: ProcName,
    pub ctime: Tick,
    pub stime: Option<Tick>,
    pub endtime: Option<Tick>,
    pub sched: SchedParams,
    pub(crate) context: Option<Arc<Context>>,
}

impl ProcInner {
    fn new(priority_sentinel: i64) -> Self {
        Self {
            pid: 0,
            state: ProcState::Unused,
            chan: None,
            killed: false,
            xstate: 0,
            name: ProcName::new(),
            ctime: 0,
            stime: None,
            endtime: None,
            sched: SchedParams::fresh(priority_sentinel),
            context: None,
        }
    }
}

/// State private to the process itself.
///
/// Touched only by the running owner, or by the slot lock holder while the
/// slot is not running (allocation, failed fork, reaping).
pub(crate) struct ProcData {
    pub trapframe: Option<Box<TrapFrame>>,
    pub space: Option<SpaceId>,
    pub ofile: Box<[Option<FileHandle>]>,
    pub cwd: Option<DirRef>,
}

/// One process table slot
pub struct Proc {
    idx: usize,
    inner: SpinLock<ProcInner>,
    /// Memory size in bytes
    size: AtomicUsize,
    data: UnsafeCell<ProcData>,
}

// Safety: `inner` is lock protected; `data` follows the ProcData access rule
unsafe impl Sync for Proc {}

impl Proc {
    fn new(idx: usize, config: &SchedConfig) -> Self {
        Self {
            idx,
            inner: SpinLock::new(ProcInner::new(config.priority_sentinel), "proc"),
            size: AtomicUsize::new(0),
            data: UnsafeCell::new(ProcData {
                trapframe: None,
                space: None,
                ofile: vec![None; config.nofile].into_boxed_slice(),
                cwd: None,
            }),
        }
    }

    /// Slot index in the process table
    pub fn index(&self) -> usize {
        self.idx
    }

    pub fn lock(&self) -> SpinLockGuard<'_, ProcInner> {
        self.inner.lock()
    }

    pub(crate) fn inner(&self) -> &SpinLock<ProcInner> {
        &self.inner
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn set_size(&self, size: usize) {
        self.size.store(size, Ordering::Release);
    }

    /// Channel a parent blocked in `wait` sleeps on
    pub fn wait_chan(&self) -> Chan {
        Chan::of(self)
    }

    /// # Safety
    /// Caller is the running owner of this slot, or holds the slot lock
    /// while the slot is not running.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data_mut(&self) -> &mut ProcData {
        unsafe { &mut *self.data.get() }
    }
}

impl fmt::Debug for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proc").field("idx", &self.idx).finish_non_exhaustive()
    }
}

// ============================================================================
// Kernel
// ============================================================================

/// The process table, per-core descriptors and collaborator handles
pub struct Kernel {
    pub(crate) config: SchedConfig,
    pub(crate) procs: Box<[Proc]>,
    /// Parent slot of every slot; the global parent-child lock
    pub(crate) parents: SpinLock<Box<[Option<usize>]>>,
    next_pid: SpinLock<Pid>,
    pub(crate) cpus: Box<[Arc<Cpu>]>,
    pub(crate) clock: TickClock,
    pub(crate) vm: Arc<dyn AddressSpaceManager>,
    pub(crate) files: Arc<dyn FileLayer>,
    pub(crate) frames: Arc<dyn TrapFrameAllocator>,
    pub(crate) preemption: Box<dyn Preemption>,
    programs: spin::RwLock<HashMap<usize, UserFn>>,
    init_proc: spin::Once<usize>,
    halted: AtomicBool,
    fault: spin::Mutex<Option<String>>,
}

impl Kernel {
    pub fn new(
        config: SchedConfig,
        vm: Arc<dyn AddressSpaceManager>,
        files: Arc<dyn FileLayer>,
        frames: Arc<dyn TrapFrameAllocator>,
        preemption: Box<dyn Preemption>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let procs = (0..config.nproc).map(|i| Proc::new(i, &config)).collect();
        let cpus = (0..config.ncpu).map(|id| Arc::new(Cpu::new(id, config.default_policy))).collect();
        Ok(Arc::new(Self {
            parents: SpinLock::new(vec![None; config.nproc].into_boxed_slice(), "wait_lock"),
            next_pid: SpinLock::new(1, "nextpid"),
            procs,
            cpus,
            clock: TickClock::new(),
            vm,
            files,
            frames,
            preemption,
            programs: spin::RwLock::new(HashMap::new()),
            init_proc: spin::Once::new(),
            halted: AtomicBool::new(false),
            fault: spin::Mutex::new(None),
            config,
        }))
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn procs(&self) -> &[Proc] {
        &self.procs
    }

    pub fn cpus(&self) -> &[Arc<Cpu>] {
        &self.cpus
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Current tick
    pub fn uptime(&self) -> Tick {
        self.clock.now()
    }

    /// Register `program` to run when a process enters user mode at `entry`
    pub fn register_program(&self, entry: usize, program: UserFn) {
        self.programs.write().insert(entry, program);
    }

    pub(crate) fn program_at(&self, entry: usize) -> Option<UserFn> {
        self.programs.read().get(&entry).cloned()
    }

    // ------------------------------------------------------------------------
    // Current process
    // ------------------------------------------------------------------------

    /// The process running on the calling core
    pub fn myproc(&self) -> Option<&Proc> {
        cpu::push_off();
        let slot = cpu::current().and_then(|c| c.current_slot());
        cpu::pop_off();
        slot.map(|i| &self.procs[i])
    }

    /// The calling process, or a fatal error if called off-process
    pub(crate) fn current_proc(&self, what: &str) -> &Proc {
        match self.myproc() {
            Some(p) => p,
            None => panic!("{}: no current process", what),
        }
    }

    pub(crate) fn current_cpu(&self, what: &str) -> Arc<Cpu> {
        match cpu::current() {
            Some(c) => c,
            None => panic!("{}: not running on a cpu", what),
        }
    }

    /// Slot of the root process, once created
    pub fn init_slot(&self) -> Option<usize> {
        self.init_proc.get().copied()
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    fn alloc_pid(&self) -> Pid {
        let mut next = self.next_pid.lock();
        let pid = *next;
        *next += 1;
        pid
    }

    /// Claim an UNUSED slot.
    ///
    /// On success the slot is USED, owns a trap frame, an empty address space
    /// and a kernel thread parked until its first dispatch, and is returned
    /// with its lock held.
    pub fn allocate(self: &Arc<Self>) -> Result<(&Proc, SpinLockGuard<'_, ProcInner>)> {
        for p in self.procs.iter() {
            let mut inner = p.lock();
            if inner.state != ProcState::Unused {
                continue;
            }

            inner.pid = self.alloc_pid();
            inner.state = ProcState::Used;
            inner.sched = SchedParams::fresh(self.config.priority_sentinel);
            inner.ctime = self.clock.now();
            inner.stime = None;
            inner.endtime = None;

            if let Err(e) = self.provision(p, &mut inner) {
                log::warn!("allocate: slot {} provisioning failed: {}", p.idx, e);
                self.release(p, &mut inner);
                return Err(e);
            }
            log::debug!("allocate: pid {} in slot {}", inner.pid, p.idx);
            return Ok((p, inner));
        }
        Err(Error::NoFreeProc)
    }

    fn provision(self: &Arc<Self>, p: &Proc, inner: &mut ProcInner) -> Result<()> {
        // Safety: slot lock held and the slot has never run in this generation
        let data = unsafe { p.data_mut() };
        data.trapframe = Some(self.frames.alloc().ok_or(Error::OutOfMemory)?);
        data.space = Some(self.vm.create_space()?);

        let kernel = Arc::clone(self);
        let ctx = Context::spawn(format!("proc{}", p.idx), self.config.kstack_size, move || {
            trap::process_main(kernel)
        })
        .map_err(|_| Error::OutOfMemory)?;
        inner.context = Some(ctx);
        Ok(())
    }

    /// Return a slot to UNUSED, freeing everything it owns.
    ///
    /// The slot lock must be held. Parentage is cleared by the caller, which
    /// holds the parent-child lock when it matters.
    pub fn release(&self, p: &Proc, inner: &mut ProcInner) {
        if !p.inner.holding() {
            panic!("release: slot lock not held");
        }
        // Safety: slot lock held and the slot is not running
        let data = unsafe { p.data_mut() };
        if let Some(tf) = data.trapframe.take() {
            self.frames.free(tf);
        }
        if let Some(space) = data.space.take() {
            self.vm.destroy_space(space, p.size());
        }
        debug_assert!(data.ofile.iter().all(Option::is_none));
        debug_assert!(data.cwd.is_none());
        if let Some(ctx) = inner.context.take() {
            ctx.retire();
        }
        p.set_size(0);
        *inner = ProcInner::new(self.config.priority_sentinel);
    }

    /// Create the root process, which runs the program at `entry`
    pub fn userinit(self: &Arc<Self>, entry: usize) -> Result<Pid> {
        let (p, mut inner) = self.allocate()?;

        // Safety: slot lock held, not yet runnable
        let data = unsafe { p.data_mut() };
        let space = data.space.ok_or(Error::OutOfMemory)?;
        match self.vm.grow(space, 0, self.config.page_size) {
            Ok(size) => p.set_size(size),
            Err(e) => {
                self.release(p, &mut inner);
                return Err(e);
            }
        }
        if let Some(tf) = data.trapframe.as_deref_mut() {
            tf.epc = entry;
            tf.sp = self.config.page_size;
            tf.a0 = 1;
        }
        data.cwd = self.files.lookup_path(ROOT_PATH);

        self.init_proc.call_once(|| p.idx);
        inner.name = name_from("initcode");
        inner.state = ProcState::Runnable;
        inner.sched.wait_st_time = Some(self.clock.now());
        Ok(inner.pid)
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// Pid of the parent of the slot `idx`
    pub fn parent_pid(&self, idx: usize) -> Option<Pid> {
        let parents = self.parents.lock();
        parents[idx].map(|parent| self.procs[parent].lock().pid)
    }

    /// Scheduling accounting of a live process
    pub fn sched_snapshot(&self, pid: Pid) -> Option<SchedParams> {
        self.procs.iter().find_map(|p| {
            let inner = p.lock();
            (inner.state != ProcState::Unused && inner.pid == pid).then(|| inner.sched.clone())
        })
    }

    pub fn state_of(&self, pid: Pid) -> Option<ProcState> {
        self.procs.iter().find_map(|p| {
            let inner = p.lock();
            (inner.state != ProcState::Unused && inner.pid == pid).then_some(inner.state)
        })
    }

    // ------------------------------------------------------------------------
    // Policy and batch epochs
    // ------------------------------------------------------------------------

    /// Select the calling core's policy from a raw value; returns the previous one.
    ///
    /// The value is not checked here: an unknown policy stops the core at
    /// its next scheduling pass.
    pub fn schedpolicy(&self, raw: i32) -> i32 {
        let previous = self.current_cpu("schedpolicy").exchange_policy(raw);
        log::debug!("schedpolicy: {} -> {}", previous, raw);
        previous
    }

    /// Select the policy of core `cpu` from outside the machine
    pub fn set_policy(&self, cpu: usize, policy: SchedPolicy) -> Result<i32> {
        let cpu = self.cpus.get(cpu).ok_or(Error::InvalidConfig("no such cpu"))?;
        Ok(cpu.set_policy(policy))
    }

    /// Announce the start of a batch epoch on core `cpu`
    pub fn begin_batch_epoch(&self, cpu: usize, tick: Tick) -> Result<()> {
        let cpu = self.cpus.get(cpu).ok_or(Error::InvalidConfig("no such cpu"))?;
        cpu.begin_batch_epoch(tick);
        Ok(())
    }

    pub fn batch_stats(&self, cpu: usize) -> Option<BatchStats> {
        self.cpus.get(cpu).map(|c| c.batch().clone())
    }

    pub fn batch_summaries(&self, cpu: usize) -> Vec<BatchSummary> {
        self.cpus.get(cpu).map(|c| c.summaries()).unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Machine state
    // ------------------------------------------------------------------------

    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Record a fatal error and stop every scheduler loop
    pub fn record_fault(&self, msg: String) {
        log::error!("kernel fault: {}", msg);
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(msg);
        }
        drop(fault);
        self.halt();
    }

    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Let every parked process thread go once no scheduler is left to resume it.
    ///
    /// Retired threads unwind with [`Abandoned`](super::context::Abandoned).
    /// Guards they carried into the switch belong to a core, so dropping them
    /// off that core leaves the lock word alone.
    pub(crate) fn retire_all(&self) {
        for p in self.procs.iter() {
            if let Some(ctx) = p.lock().context.as_ref() {
                ctx.retire();
            }
        }
    }
}

/// Truncating conversion into a process name
pub(crate) fn name_from(s: &str) -> ProcName {
    let mut name = ProcName::new();
    for c in s.chars() {
        if name.push(c).is_err() {
            break;
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HeapFrames, HostFiles, HostSpaces};
    use crate::trap::TimerPreemption;

    fn kernel(nproc: usize) -> (Arc<Kernel>, Arc<HeapFrames>, Arc<HostSpaces>) {
        let frames = Arc::new(HeapFrames::new());
        let spaces = Arc::new(HostSpaces::new());
        let config = SchedConfig { nproc, ..SchedConfig::default() };
        let k = Kernel::new(
            config,
            spaces.clone(),
            Arc::new(HostFiles::new()),
            frames.clone(),
            Box::new(TimerPreemption),
        )
        .expect("valid config");
        (k, frames, spaces)
    }

    #[test]
    fn test_allocate_assigns_increasing_pids() {
        let (k, _, _) = kernel(4);
        let (p1, g1) = k.allocate().expect("first slot");
        assert_eq!((g1.pid, g1.state), (1, ProcState::Used));
        assert_eq!(g1.sched.priority, -1_000_000);
        assert_eq!(g1.sched.wait_st_time, None);
        assert_eq!(g1.stime, None);
        drop(g1);
        let (p2, g2) = k.allocate().expect("second slot");
        assert_eq!(g2.pid, 2);
        assert_ne!(p1.index(), p2.index());
    }

    #[test]
    fn test_table_full() {
        let (k, _, _) = kernel(2);
        for _ in 0..2 {
            // Each guard must go before the next scan reaches its slot
            drop(k.allocate().expect("slot"));
        }
        assert_eq!(k.allocate().err(), Some(Error::NoFreeProc));
    }

    #[test]
    fn test_release_frees_owned_resources() {
        let (k, frames, spaces) = kernel(2);
        let (p, mut inner) = k.allocate().expect("slot");
        assert_eq!(frames.outstanding(), 1);
        assert_eq!(spaces.live_spaces(), 1);
        k.release(p, &mut inner);
        assert_eq!(inner.state, ProcState::Unused);
        assert_eq!(inner.pid, 0);
        drop(inner);
        assert_eq!(frames.outstanding(), 0);
        assert_eq!(spaces.live_spaces(), 0);
        // The slot is immediately reusable
        let (again, _g) = k.allocate().expect("reuse");
        assert_eq!(again.index(), p.index());
    }

    #[test]
    fn test_trapframe_exhaustion_releases_partial_slot() {
        let frames = Arc::new(HeapFrames::with_limit(0));
        let spaces = Arc::new(HostSpaces::new());
        let k = Kernel::new(
            SchedConfig::default(),
            spaces.clone(),
            Arc::new(HostFiles::new()),
            frames,
            Box::new(TimerPreemption),
        )
        .expect("valid config");
        assert_eq!(k.allocate().err(), Some(Error::OutOfMemory));
        assert_eq!(spaces.live_spaces(), 0);
        assert_eq!(k.procs()[0].lock().state, ProcState::Unused);
    }

    #[test]
    fn test_userinit_prepares_root() {
        let (k, _, _) = kernel(4);
        let pid = k.userinit(0x1000).expect("init");
        assert_eq!(pid, 1);
        assert_eq!(k.init_slot(), Some(0));
        let p = &k.procs()[0];
        let inner = p.lock();
        assert_eq!(inner.state, ProcState::Runnable);
        assert_eq!(inner.name.as_str(), "initcode");
        assert_eq!(p.size(), 4096);
    }

    #[test]
    fn test_name_truncates() {
        assert_eq!(name_from("a-very-long-process-name").len(), MAXNAME);
    }
}
