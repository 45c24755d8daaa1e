//! Workgroup descriptors and the per-group ring arrays.

use keel_core::WorkerId;

use crate::ring::MpmcRing;
use crate::task::WorkItem;

/// Caller-facing description of one workgroup.
///
/// Workgroups are assigned contiguous, non-overlapping worker ranges in
/// declaration order.
#[derive(Clone, Copy, Debug)]
pub struct WorkgroupDesc {
    /// Number of worker threads in this group. Must be nonzero.
    pub thread_count: u32,
    /// Priority rank; `0` is the highest.
    pub priority: u32,
}

impl WorkgroupDesc {
    /// Describe a group of `thread_count` workers at `priority`.
    pub fn new(thread_count: u32, priority: u32) -> Self {
        Self {
            thread_count,
            priority,
        }
    }
}

/// A built workgroup: its worker range, priority, and one ring per
/// member worker. Immutable after scheduler construction.
pub(crate) struct Workgroup {
    pub(crate) start: u32,
    pub(crate) end: u32,
    pub(crate) priority: u32,
    rings: Box<[MpmcRing<WorkItem>]>,
}

impl Workgroup {
    pub(crate) fn new(start: u32, count: u32, priority: u32, ring_capacity: usize) -> Self {
        let rings = (0..count).map(|_| MpmcRing::new(ring_capacity)).collect();
        Self {
            start,
            end: start + count,
            priority,
            rings,
        }
    }

    pub(crate) fn thread_count(&self) -> u32 {
        self.end - self.start
    }

    pub(crate) fn contains(&self, worker: WorkerId) -> bool {
        worker.0 >= self.start && worker.0 < self.end
    }

    /// The ring owned by `worker` within this group.
    pub(crate) fn ring_of(&self, worker: WorkerId) -> &MpmcRing<WorkItem> {
        debug_assert!(self.contains(worker));
        &self.rings[(worker.0 - self.start) as usize]
    }

    /// The ring at a lane offset within the group.
    pub(crate) fn ring_at(&self, lane: u32) -> &MpmcRing<WorkItem> {
        &self.rings[lane as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_membership() {
        let g = Workgroup::new(2, 3, 0, 8);
        assert!(!g.contains(WorkerId(1)));
        assert!(g.contains(WorkerId(2)));
        assert!(g.contains(WorkerId(4)));
        assert!(!g.contains(WorkerId(5)));
        assert_eq!(g.thread_count(), 3);
    }

    #[test]
    fn each_member_owns_a_ring() {
        let g = Workgroup::new(4, 2, 1, 8);
        fn nop(_arg: u64, _ctx: &crate::task::ExecutionContext<'_>) {}
        g.ring_of(WorkerId(4)).push(WorkItem::new(nop, 1)).unwrap();
        assert_eq!(g.ring_of(WorkerId(4)).len(), 1);
        assert!(g.ring_of(WorkerId(5)).is_empty());
    }
}
