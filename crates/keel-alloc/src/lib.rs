//! Arena-backed coalescing allocation for the Keel toolkit.
//!
//! Provides the coalescing arena allocator with pluggable placement
//! strategies, the fixed-slot pool allocator, and the thin memory-source
//! abstraction they draw arenas and pages from. This crate is one of
//! three that may contain `unsafe` code (along with `keel-sched` and
//! `keel-ffi`).

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod arena;
pub mod best_fit;
pub mod block;
pub mod coalescing;
pub mod config;
pub mod first_fit;
pub mod pool;
pub mod source;
pub mod stats;
pub mod strategy;

// Re-export the public surface at crate root for convenience.
pub use best_fit::{BestFit, BsearchAlgo};
pub use block::BlockIndex;
pub use coalescing::{Allocation, CoalescingAllocator};
pub use config::{AllocConfig, ConfigError, PoolConfig};
pub use first_fit::FirstFit;
pub use pool::PoolAllocator;
pub use source::{Advice, ArenaMemory, MemorySource, Protection, SystemSource};
pub use stats::{StatSnapshot, StatsMode};
pub use strategy::{FreeSlot, PlacementStrategy};
