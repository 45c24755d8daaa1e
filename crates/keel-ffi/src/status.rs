//! C-compatible status codes.
//!
//! [`KeelStatus`] is a `repr(i32)` enum covering every error condition
//! the FFI surface can report. Conversions from the Rust error types of
//! `keel-core`, `keel-alloc`, and `keel-sched` are provided.

use keel_core::{AllocError, SubmitError};

/// C-compatible status code returned by all FFI functions.
///
/// `Ok` = 0, all errors are negative. Values are ABI-stable.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeelStatus {
    /// Success.
    Ok = 0,
    /// Handle is invalid or was already destroyed.
    InvalidHandle = -1,
    /// An argument is null, out of range, or otherwise invalid.
    InvalidArgument = -2,
    /// The underlying memory source is exhausted.
    AllocationFailed = -3,
    /// The request exceeds the allocator's addressable range.
    RequestTooLarge = -4,
    /// Scheduler queues are saturated past the fallback budget.
    SubmissionRejected = -5,
    /// The scheduler has shut down.
    Shutdown = -6,
    /// The group id does not name a registered workgroup.
    UnknownGroup = -7,
    /// Configuration validation failed.
    ConfigError = -8,
    /// `validate()` found broken invariants.
    ValidationFailed = -9,
    /// Internal error (e.g. a poisoned lock after a prior panic).
    InternalError = -20,
    /// A Rust panic was caught at the FFI boundary.
    Panicked = -128,
}

impl From<&AllocError> for KeelStatus {
    fn from(e: &AllocError) -> Self {
        match e {
            AllocError::SourceExhausted { .. } => KeelStatus::AllocationFailed,
            AllocError::RequestTooLarge { .. } => KeelStatus::RequestTooLarge,
        }
    }
}

impl From<&SubmitError> for KeelStatus {
    fn from(e: &SubmitError) -> Self {
        match e {
            SubmitError::Rejected { .. } => KeelStatus::SubmissionRejected,
            SubmitError::Shutdown => KeelStatus::Shutdown,
            SubmitError::UnknownGroup { .. } => KeelStatus::UnknownGroup,
        }
    }
}

impl From<&keel_alloc::ConfigError> for KeelStatus {
    fn from(_e: &keel_alloc::ConfigError) -> Self {
        KeelStatus::ConfigError
    }
}

impl From<&keel_sched::ConfigError> for KeelStatus {
    fn from(_e: &keel_sched::ConfigError) -> Self {
        KeelStatus::ConfigError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::GroupId;

    #[test]
    fn codes_are_stable() {
        assert_eq!(KeelStatus::Ok as i32, 0);
        assert_eq!(KeelStatus::InvalidHandle as i32, -1);
        assert_eq!(KeelStatus::Panicked as i32, -128);
    }

    #[test]
    fn conversions_cover_error_kinds() {
        assert_eq!(
            KeelStatus::from(&AllocError::SourceExhausted { requested: 1 }),
            KeelStatus::AllocationFailed
        );
        assert_eq!(
            KeelStatus::from(&SubmitError::Rejected { group: GroupId(0) }),
            KeelStatus::SubmissionRejected
        );
        assert_eq!(KeelStatus::from(&SubmitError::Shutdown), KeelStatus::Shutdown);
    }
}
