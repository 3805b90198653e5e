use std::time::Duration;

use geos3_checksum::ChecksumValue;
use geos3_client::ClientError;

use crate::TransferError;

/// Notifications emitted while a transfer runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Started {
        session_id: String,
        total_bytes: u64,
        part_count: u32,
        resumed: bool,
    },
    PartStarted {
        part: u32,
        attempt: u32,
    },
    PartCompleted {
        part: u32,
        bytes: u64,
    },
    PartRetrying {
        part: u32,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// A part's content did not match what the other side reported.
    ChecksumMismatch {
        part: u32,
        expected: String,
        actual: String,
    },
    Progress {
        transferred: u64,
        total: u64,
        bytes_per_second: f64,
    },
    Finalizing,
    Completed {
        etag: Option<String>,
    },
    Failed {
        error: String,
    },
    Aborted,
}

/// What a finished transfer produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub session_id: String,
    pub bucket: String,
    pub key: String,
    pub upload_id: Option<String>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub size: u64,
    pub part_count: u32,
    /// Whole-object checksum, when one was configured.
    pub checksum: Option<ChecksumValue>,
}

/// Terminal outcome of [`run`](crate::MultipartUpload::run).
///
/// A failed cleanup is reported next to the outcome and never replaces
/// the cause.
#[derive(Debug)]
pub enum TransferResult {
    Completed(TransferSummary),
    Failed {
        error: TransferError,
        cleanup_error: Option<ClientError>,
    },
    Aborted {
        cleanup_error: Option<ClientError>,
    },
}

impl TransferResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn summary(&self) -> Option<&TransferSummary> {
        match self {
            Self::Completed(summary) => Some(summary),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TransferError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn cleanup_error(&self) -> Option<&ClientError> {
        match self {
            Self::Failed { cleanup_error, .. } | Self::Aborted { cleanup_error } => {
                cleanup_error.as_ref()
            }
            Self::Completed(_) => None,
        }
    }

    pub fn into_result(self) -> Result<TransferSummary, TransferError> {
        match self {
            Self::Completed(summary) => Ok(summary),
            Self::Failed { error, .. } => Err(error),
            Self::Aborted { .. } => Err(TransferError::Aborted),
        }
    }
}
