// Synchronization primitives for the scheduling core
// Provides RawSpinLock and SpinLock<T> with per-core ownership tracking
//
// A lock is owned by the core that acquired it, not by the host thread, so the
// scheduler may acquire a process lock and the process may release it after
// the context switch (and the reverse on the way back).

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::cpu::{lock_token, pop_off, push_off};

/// Spins before the waiting host thread gives up its timeslice
const SPINS_BEFORE_YIELD: u32 = 64;

// ============================================================================
// RawSpinLock
// ============================================================================

/// Raw spinlock for low-level synchronization
pub struct RawSpinLock {
    locked: AtomicBool,
    // Owner token, 0 while free
    owner: AtomicUsize,
    // Lock analytics (very lightweight)
    acquire_count: AtomicU64,
    contended_count: AtomicU64,
}

impl RawSpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicUsize::new(0),
            acquire_count: AtomicU64::new(0),
            contended_count: AtomicU64::new(0),
        }
    }

    pub fn lock(&self) {
        // Disable interrupts to prevent deadlock with the timer path
        push_off();
        if self.holding() {
            panic!("acquire");
        }

        let mut contended = false;
        let mut spins = 0u32;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            contended = true;
            spins += 1;
            if spins % SPINS_BEFORE_YIELD == 0 {
                std::thread::yield_now();
            } else {
                core::hint::spin_loop();
            }
        }
        self.acquire_count.fetch_add(1, Ordering::Relaxed);
        if contended {
            self.contended_count.fetch_add(1, Ordering::Relaxed);
        }

        self.owner.store(lock_token(), Ordering::Relaxed);
    }

    pub fn unlock(&self) {
        if !self.holding() {
            // Guards dropped while a process thread unwinds out of exit may
            // belong to a core the thread no longer runs on. The lock stays
            // set and its owner's push_off count is untouched: that core's
            // scheduler releases it after the switch back.
            if std::thread::panicking() {
                return;
            }
            panic!("release");
        }
        self.owner.store(0, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        pop_off();
    }

    /// Check if the lock is currently held
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Check if the current CPU is holding the lock
    pub fn holding(&self) -> bool {
        self.is_locked() && self.owner.load(Ordering::Relaxed) == lock_token()
    }

    /// Get total lock acquisitions (for diagnostics)
    pub fn acquire_count(&self) -> u64 {
        self.acquire_count.load(Ordering::Relaxed)
    }

    /// Get total contended acquisitions (for diagnostics)
    pub fn contended_count(&self) -> u64 {
        self.contended_count.load(Ordering::Relaxed)
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SpinLock<T> - Spinlock protecting data with RAII guard
// ============================================================================

/// A mutual exclusion primitive protecting data of type T
pub struct SpinLock<T: ?Sized> {
    name: &'static str,
    lock: RawSpinLock,
    data: UnsafeCell<T>,
}

// Safety: SpinLock provides synchronized access
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new lock protecting the given data
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            name,
            lock: RawSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes the lock and returns the inner data
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the lock, spinning until available
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock.lock();
        SpinLockGuard { lock: self }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the calling core holds this lock
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }

    pub fn raw(&self) -> &RawSpinLock {
        &self.lock
    }

    /// Wrap a lock this core already holds in a guard.
    ///
    /// Used on the far side of a context switch, where the acquisition was
    /// made by the scheduler and the release belongs to the process.
    ///
    /// # Safety
    /// No other live guard of this lock may be used until the returned
    /// guard is dropped or forgotten.
    pub unsafe fn adopt(&self) -> SpinLockGuard<'_, T> {
        if !self.holding() {
            panic!("adopt {}: not held", self.name);
        }
        SpinLockGuard { lock: self }
    }

    /// Force unlock
    /// # Safety
    /// Caller must hold the lock and must not use any guard of it afterwards
    pub unsafe fn force_unlock(&self) {
        self.lock.unlock();
    }
}

/// RAII guard for SpinLock
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<'a, T: ?Sized> SpinLockGuard<'a, T> {
    /// The lock this guard belongs to
    pub fn spinlock(guard: &Self) -> &'a SpinLock<T> {
        guard.lock
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: We hold the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: We hold the lock exclusively
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.lock.unlock();
    }
}
