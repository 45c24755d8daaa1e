//! Core types and errors for the Keel systems toolkit.
//!
//! This is the leaf crate with zero internal Keel dependencies. It defines
//! the strongly-typed identifiers and the error enums shared by the
//! allocator (`keel-alloc`) and scheduler (`keel-sched`) crates.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;

// Re-export core types at crate root for convenience.
pub use error::{AllocError, SubmitError};
pub use id::{GroupId, WorkerId};
