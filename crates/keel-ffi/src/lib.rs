//! C FFI bindings for the Keel allocator and scheduler.
//!
//! Exposes a C-compatible API over `keel-alloc` and `keel-sched`:
//! opaque `u64` handles, `repr(i32)` status codes (`KEEL_OK` = 0,
//! errors negative), and `catch_unwind` at every boundary. This crate
//! is one of three that may contain `unsafe` code (along with
//! `keel-alloc` and `keel-sched`).

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod alloc;
pub mod handle;
pub mod sched;
pub mod status;

pub use status::KeelStatus;
