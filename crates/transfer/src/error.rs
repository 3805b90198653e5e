use geos3_client::ClientError;

use crate::session::SessionStatus;

/// Errors produced by multipart transfers.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("part {part_number} failed after {attempts} attempts: {source}")]
    PartFailed {
        part_number: u32,
        attempts: u32,
        source: ClientError,
    },

    #[error("content verification failed{}: expected {expected}, got {actual}", part_label(.part_number))]
    ContentVerificationFailed {
        /// `None` when the whole object failed verification.
        part_number: Option<u32>,
        expected: String,
        actual: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid part plan: {0}")]
    InvalidPlan(String),

    #[error("invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("invalid resume context: {0}")]
    InvalidResume(String),

    #[error("multipart upload {0} is no longer live")]
    UploadNotLive(String),

    #[error("source changed since the transfer started: {0}")]
    SourceChanged(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transfer aborted")]
    Aborted,
}

fn part_label(part_number: &Option<u32>) -> String {
    match part_number {
        Some(n) => format!(" for part {n}"),
        None => " for the whole object".into(),
    }
}

impl TransferError {
    /// The part a failure is attributed to, if any.
    pub fn part_number(&self) -> Option<u32> {
        match self {
            Self::PartFailed { part_number, .. } => Some(*part_number),
            Self::ContentVerificationFailed { part_number, .. } => *part_number,
            _ => None,
        }
    }

    /// The underlying client error, when the failure came from a request.
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            Self::Client(e) | Self::PartFailed { source: e, .. } => Some(e),
            _ => None,
        }
    }
}
