use geos3_checksum::ChecksumError;

/// Failures of the request execution layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection reset: {0}")]
    Reset(String),

    #[error("body transfer failed: {0}")]
    Body(String),

    #[error("integrity check failed: {0}")]
    Integrity(#[from] ChecksumError),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the request may have been received by the server.
    ///
    /// Only a failed connection guarantees it was not.
    pub fn may_have_reached_server(&self) -> bool {
        !matches!(self, Self::Connect(_))
    }
}
