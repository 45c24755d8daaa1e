//! Per-worker shared state: parking, steal eligibility, group order.

use std::sync::atomic::{AtomicBool, AtomicU32};

use smallvec::SmallVec;

use keel_core::GroupId;

use crate::event::WakeEvent;

/// State shared between a worker thread and the rest of the scheduler.
/// Everything but the atomics and the wake event is immutable after
/// construction.
pub(crate) struct WorkerShared {
    /// The event this worker parks on.
    pub(crate) wake: WakeEvent,
    /// True while the worker is parked (or about to park). Producers
    /// read it after every enqueue to decide whether a wake is needed.
    pub(crate) parked: AtomicBool,
    /// Workgroups this worker belongs to, highest priority first
    /// (declaration order breaks ties).
    pub(crate) priority_order: SmallVec<[GroupId; 8]>,
    /// Smallest worker index this worker may steal from.
    pub(crate) steal_range_start: u32,
    /// One past the largest worker index this worker may steal from.
    pub(crate) steal_range_end: u32,
    /// Bit `j` set: this worker may steal from worker `j`. The union of
    /// all sibling ranges, minus the worker's own bit.
    pub(crate) steal_mask: u64,
    /// Rotating start position for steal scans.
    pub(crate) next_steal: AtomicU32,
}

impl WorkerShared {
    pub(crate) fn new(
        priority_order: SmallVec<[GroupId; 8]>,
        steal_range_start: u32,
        steal_range_end: u32,
        steal_mask: u64,
    ) -> Self {
        Self {
            wake: WakeEvent::new(),
            parked: AtomicBool::new(false),
            priority_order,
            steal_range_start,
            steal_range_end,
            steal_mask,
            next_steal: AtomicU32::new(0),
        }
    }
}
