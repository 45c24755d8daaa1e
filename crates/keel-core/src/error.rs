//! Error types shared across the Keel crates.
//!
//! Organized by subsystem: allocation (`keel-alloc`) and task submission
//! (`keel-sched`). Invariant violations are not represented here — they
//! are programming errors and abort via `debug_assert!`/panic.

use std::error::Error;
use std::fmt;

use crate::id::GroupId;

/// Errors from the allocator subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The underlying memory source could not supply a new arena or page.
    SourceExhausted {
        /// Number of bytes that were requested from the source.
        requested: usize,
    },
    /// The request can never be satisfied (e.g. exceeds the addressable
    /// range of the allocator's size type).
    RequestTooLarge {
        /// The unsatisfiable request size in bytes.
        requested: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceExhausted { requested } => {
                write!(f, "memory source exhausted: requested {requested} bytes")
            }
            Self::RequestTooLarge { requested } => {
                write!(f, "request of {requested} bytes exceeds addressable range")
            }
        }
    }
}

impl Error for AllocError {}

/// Errors from scheduler task submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// Every ring in the target workgroup was full after the bounded
    /// fallback cycle. The work item was not enqueued anywhere.
    Rejected {
        /// The workgroup whose queues were saturated.
        group: GroupId,
    },
    /// The scheduler has been stopped; no further work is accepted.
    Shutdown,
    /// The group id or worker hint does not name a registered workgroup
    /// or worker.
    UnknownGroup {
        /// The offending group id.
        group: GroupId,
    },
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { group } => {
                write!(f, "workgroup {group} queues saturated; submission rejected")
            }
            Self::Shutdown => write!(f, "scheduler has shut down"),
            Self::UnknownGroup { group } => write!(f, "unknown workgroup {group}"),
        }
    }
}

impl Error for SubmitError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_error_display() {
        let e = AllocError::SourceExhausted { requested: 4096 };
        assert_eq!(e.to_string(), "memory source exhausted: requested 4096 bytes");
    }

    #[test]
    fn submit_error_display() {
        let e = SubmitError::Rejected { group: GroupId(2) };
        assert!(e.to_string().contains("workgroup 2"));
        assert_eq!(SubmitError::Shutdown.to_string(), "scheduler has shut down");
    }
}
