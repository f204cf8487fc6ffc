//! Concurrency slot accounting for worker pools
//!
//! Occupancy is a single atomic counter that only moves up through a
//! compare-and-swap bounded by the capacity, so no reader can ever observe
//! more occupied slots than the pool owns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed set of concurrency slots shared between the claim loop and job tasks
#[derive(Debug)]
pub struct SlotTracker {
    capacity: usize,
    occupied: AtomicUsize,
}

impl SlotTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            occupied: AtomicUsize::new(0),
        }
    }

    /// Occupy one slot if any is free
    ///
    /// The slot is freed when the returned guard is dropped, including
    /// during unwinding.
    pub fn try_occupy(self: &Arc<Self>) -> Option<SlotGuard> {
        self.occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |occupied| {
                (occupied < self.capacity).then_some(occupied + 1)
            })
            .ok()
            .map(|_| SlotGuard {
                slots: Arc::clone(self),
            })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.occupied())
    }

    fn release(&self) {
        self.occupied.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One occupied slot
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<SlotTracker>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.release();
    }
}
