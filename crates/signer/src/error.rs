use std::time::Duration;

/// Signing failures. None of them are retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("no clock available to timestamp the signature")]
    ClockUnavailable,

    #[error("signing key rejected by HMAC")]
    InvalidKey,

    #[error("presigned URL expiry {requested:?} exceeds the maximum of {max:?}")]
    InvalidExpiry { requested: Duration, max: Duration },
}
