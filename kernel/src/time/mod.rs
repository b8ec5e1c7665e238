//! Tick clock
//! A lock-protected monotonic counter with a lock-free mirror for readers

use std::sync::atomic::{AtomicU64, Ordering};

use ksched_api::{Chan, Tick};

use crate::sync::{SpinLock, SpinLockGuard};

/// Global tick counter.
///
/// Writers and timed sleepers go through the lock; everyone else reads the
/// mirror, so accounting paths never need to know whether they already hold
/// the clock lock.
pub struct TickClock {
    ticks: SpinLock<Tick>,
    mirror: AtomicU64,
}

impl TickClock {
    pub const fn new() -> Self {
        Self {
            ticks: SpinLock::new(0, "time"),
            mirror: AtomicU64::new(0),
        }
    }

    /// Current tick, without taking the lock
    #[inline]
    pub fn now(&self) -> Tick {
        self.mirror.load(Ordering::Acquire)
    }

    /// Lock the counter (timed sleep waits under this lock)
    pub fn lock(&self) -> SpinLockGuard<'_, Tick> {
        self.ticks.lock()
    }

    /// Advance by one tick under an already held guard
    pub fn advance(&self, ticks: &mut SpinLockGuard<'_, Tick>) -> Tick {
        **ticks += 1;
        self.mirror.store(**ticks, Ordering::Release);
        **ticks
    }

    /// Channel sleepers on the tick counter wait on
    pub fn chan(&self) -> Chan {
        Chan::of(&self.ticks)
    }

    pub fn is_locked_by_me(&self) -> bool {
        self.ticks.holding()
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_tracks_counter() {
        let clock = TickClock::new();
        assert_eq!(clock.now(), 0);
        {
            let mut ticks = clock.lock();
            assert!(clock.is_locked_by_me());
            clock.advance(&mut ticks);
            clock.advance(&mut ticks);
            // Readers never need the lock
            assert_eq!(clock.now(), 2);
        }
        assert!(!clock.is_locked_by_me());
        assert_eq!(*clock.lock(), 2);
    }
}
