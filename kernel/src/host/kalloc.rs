//! Trap frame allocation on the host heap

use std::sync::atomic::{AtomicUsize, Ordering};

use ksched_api::{TrapFrame, TrapFrameAllocator};

/// Heap-backed trap frames with an optional cap on live frames
#[derive(Debug, Default)]
pub struct HeapFrames {
    outstanding: AtomicUsize,
    limit: Option<usize>,
}

impl HeapFrames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator that refuses to hand out more than `limit` frames at once
    pub fn with_limit(limit: usize) -> Self {
        Self { outstanding: AtomicUsize::new(0), limit: Some(limit) }
    }

    /// Frames allocated and not yet freed
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl TrapFrameAllocator for HeapFrames {
    fn alloc(&self) -> Option<Box<TrapFrame>> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .ok()?;
        Some(Box::default())
    }

    fn free(&self, frame: Box<TrapFrame>) {
        drop(frame);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
