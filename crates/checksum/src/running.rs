use std::fmt;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::{ChecksumAlgorithm, ChecksumError, ChecksumValue};

#[derive(Clone)]
enum DigestState {
    Crc32(crc32fast::Hasher),
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl DigestState {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Crc32 => Self::Crc32(crc32fast::Hasher::new()),
            ChecksumAlgorithm::Md5 => Self::Md5(Md5::new()),
            ChecksumAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32(h) => h.update(data),
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    /// Finalizes a copy of the state, leaving `self` usable.
    fn snapshot(&self) -> Vec<u8> {
        match self {
            Self::Crc32(h) => h.clone().finalize().to_be_bytes().to_vec(),
            Self::Md5(h) => h.clone().finalize().to_vec(),
            Self::Sha1(h) => h.clone().finalize().to_vec(),
            Self::Sha256(h) => h.clone().finalize().to_vec(),
        }
    }
}

/// An incremental digest over every byte passed to [`update`](Self::update).
///
/// The value can be read at any time with
/// [`current_value`](Self::current_value). A retried transfer must call
/// [`reset`](Self::reset) before replaying bytes, otherwise the bytes of
/// the failed attempt stay folded into the digest.
#[derive(Clone)]
pub struct RunningChecksum {
    algorithm: ChecksumAlgorithm,
    state: DigestState,
    bytes_seen: u64,
}

impl RunningChecksum {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithm,
            state: DigestState::new(algorithm),
            bytes_seen: 0,
        }
    }

    /// One-shot digest of `data`.
    pub fn digest(algorithm: ChecksumAlgorithm, data: &[u8]) -> ChecksumValue {
        let mut running = Self::new(algorithm);
        running.update(data);
        running.finalize()
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
        self.bytes_seen += data.len() as u64;
    }

    /// Digest of the bytes observed so far. Does not consume the state.
    pub fn current_value(&self) -> ChecksumValue {
        ChecksumValue::new(self.algorithm, self.state.snapshot()).with_length(self.bytes_seen)
    }

    /// Discards everything observed so far.
    pub fn reset(&mut self) {
        self.state = DigestState::new(self.algorithm);
        self.bytes_seen = 0;
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn finalize(self) -> ChecksumValue {
        self.current_value()
    }

    /// Appends `other` as if its bytes had followed the bytes seen here.
    pub fn combine(&mut self, other: &RunningChecksum) -> Result<(), ChecksumError> {
        match (&mut self.state, &other.state) {
            (DigestState::Crc32(mine), DigestState::Crc32(theirs)) => {
                mine.combine(theirs);
                self.bytes_seen += other.bytes_seen;
                Ok(())
            }
            _ if self.algorithm != other.algorithm => Err(ChecksumError::AlgorithmMismatch {
                expected: self.algorithm,
                actual: other.algorithm,
            }),
            _ => Err(ChecksumError::NotCombinable(self.algorithm)),
        }
    }
}

impl fmt::Debug for RunningChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningChecksum")
            .field("algorithm", &self.algorithm)
            .field("bytes_seen", &self.bytes_seen)
            .finish()
    }
}

/// Folds ordered per-part CRC32 values into the CRC32 of the whole object.
///
/// Each part must carry its length.
pub fn combine_crc32(parts: &[ChecksumValue]) -> Result<ChecksumValue, ChecksumError> {
    let mut whole = crc32fast::Hasher::new();
    let mut total = 0u64;
    for part in parts {
        if part.algorithm() != ChecksumAlgorithm::Crc32 {
            return Err(ChecksumError::NotCombinable(part.algorithm()));
        }
        let len = part.length().ok_or(ChecksumError::MissingLength)?;
        let crc = <[u8; 4]>::try_from(part.digest())
            .map(u32::from_be_bytes)
            .map_err(|_| ChecksumError::Parse("CRC32 digest must be 4 bytes".into()))?;
        whole.combine(&crc32fast::Hasher::new_with_initial_len(crc, len));
        total += len;
    }
    Ok(ChecksumValue::new(
        ChecksumAlgorithm::Crc32,
        whole.finalize().to_be_bytes().to_vec(),
    )
    .with_length(total))
}
