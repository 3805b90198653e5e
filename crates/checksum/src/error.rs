use crate::{ChecksumAlgorithm, ChecksumValue};

/// Errors produced while computing, parsing or comparing checksums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChecksumError {
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Mismatch {
        expected: ChecksumValue,
        actual: ChecksumValue,
    },

    #[error("algorithm mismatch: expected {expected}, got {actual}")]
    AlgorithmMismatch {
        expected: ChecksumAlgorithm,
        actual: ChecksumAlgorithm,
    },

    #[error("{0} checksums cannot be combined")]
    NotCombinable(ChecksumAlgorithm),

    #[error("checksum has no recorded length, cannot combine")]
    MissingLength,

    #[error("invalid checksum: {0}")]
    Parse(String),
}
