//! Keel: a systems-infrastructure toolkit built around two subsystems —
//! an arena-backed coalescing allocator with pluggable placement
//! strategies, and a work-stealing task scheduler with priority
//! workgroups.
//!
//! This is the top-level facade crate re-exporting the public API from
//! the Keel sub-crates. For most users, adding `keel` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use keel::prelude::*;
//!
//! // Carve blocks out of source-backed arenas, best-fit placement.
//! let mut allocator = CoalescingAllocator::new(AllocConfig::default()).unwrap();
//! let block = allocator.allocate(1024, 64).unwrap();
//! assert_eq!(block.ptr().as_ptr() as usize % 64, 0);
//! allocator.deallocate(block);
//! assert!(allocator.validate());
//!
//! // Run work on a two-worker group; worker 1 steals when worker 0 lags.
//! fn hello(_arg: u64, _ctx: &ExecutionContext<'_>) {}
//! let mut scheduler = Scheduler::new(
//!     SchedulerConfig::default(),
//!     &[WorkgroupDesc::new(2, 0)],
//! )
//! .unwrap();
//! scheduler.begin().unwrap();
//! scheduler
//!     .submit(GroupId(0), WorkerId(0), WorkItem::new(hello, 0))
//!     .unwrap();
//! scheduler.end();
//! assert_eq!(scheduler.metrics().submitted, scheduler.metrics().executed);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`alloc`] | `keel-alloc` | Coalescing allocator, pool allocator, strategies, memory sources |
//! | [`sched`] | `keel-sched` | Scheduler, workgroups, MPMC ring, events, block queue |
//! | [`types`] | `keel-core` | IDs and shared error enums |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Allocators, placement strategies, and memory sources (`keel-alloc`).
pub use keel_alloc as alloc;

/// Core IDs and error types (`keel-core`).
pub use keel_core as types;

/// Scheduler, rings, and events (`keel-sched`).
pub use keel_sched as sched;

/// Common imports for typical Keel usage.
///
/// ```rust
/// use keel::prelude::*;
/// ```
pub mod prelude {
    // Allocation
    pub use keel_alloc::{
        AllocConfig, Allocation, BestFit, BsearchAlgo, CoalescingAllocator, FirstFit,
        MemorySource, PoolAllocator, PoolConfig, SystemSource,
    };

    // Scheduling
    pub use keel_sched::{
        ExecutionContext, Scheduler, SchedulerConfig, TaskHandle, WorkFn, WorkItem, WorkgroupDesc,
    };

    // IDs and errors
    pub use keel_core::{AllocError, GroupId, SubmitError, WorkerId};
}
