//! Work-stealing task scheduling for the Keel toolkit.
//!
//! A fixed pool of worker threads is partitioned into priority
//! workgroups; each worker owns one bounded MPMC ring per group it
//! belongs to, and steals from group peers when its own rings run dry.
//! This crate is one of three that may contain `unsafe` code (along
//! with `keel-alloc` and `keel-ffi`); it is confined to the ring cells
//! and the sync-task payload word.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod event;
pub mod queue;
pub mod ring;
pub mod scheduler;
pub mod task;
pub mod workgroup;

pub(crate) mod worker;

// Re-export the public surface at crate root for convenience.
pub use event::WakeEvent;
pub use queue::BlockQueue;
pub use ring::MpmcRing;
pub use scheduler::{ConfigError, Scheduler, SchedulerConfig, SchedulerMetrics};
pub use task::{ExecutionContext, TaskHandle, WorkFn, WorkItem};
pub use workgroup::WorkgroupDesc;
