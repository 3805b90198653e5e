use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{ChecksumAlgorithm, ChecksumError};

/// A finalized digest tagged with the algorithm that produced it.
///
/// Equality compares the algorithm and the raw digest bytes. The optional
/// `length` records how many bytes were digested; it is informational and
/// ignored by comparisons, except when combining CRC32 values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(with = "hex::serde")]
    digest: Vec<u8>,
}

impl ChecksumValue {
    pub fn new(algorithm: ChecksumAlgorithm, digest: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm,
            length: None,
            digest: digest.into(),
        }
    }

    /// Attaches the number of bytes the digest covers.
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Parses a hex digest, rejecting values of the wrong size.
    pub fn from_hex(algorithm: ChecksumAlgorithm, value: &str) -> Result<Self, ChecksumError> {
        let digest = hex::decode(value.trim())
            .map_err(|e| ChecksumError::Parse(format!("{algorithm} hex digest: {e}")))?;
        Self::checked(algorithm, digest)
    }

    /// Parses a base64 digest as carried by `Content-MD5`.
    pub fn from_base64(algorithm: ChecksumAlgorithm, value: &str) -> Result<Self, ChecksumError> {
        let digest = STANDARD
            .decode(value.trim())
            .map_err(|e| ChecksumError::Parse(format!("{algorithm} base64 digest: {e}")))?;
        Self::checked(algorithm, digest)
    }

    fn checked(algorithm: ChecksumAlgorithm, digest: Vec<u8>) -> Result<Self, ChecksumError> {
        if digest.len() != algorithm.digest_len() {
            return Err(ChecksumError::Parse(format!(
                "{algorithm} digest must be {} bytes, got {}",
                algorithm.digest_len(),
                digest.len()
            )));
        }
        Ok(Self::new(algorithm, digest))
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.digest)
    }

    /// Checks `actual` against `self` as the expected value.
    pub fn verify(&self, actual: &ChecksumValue) -> Result<(), ChecksumError> {
        if self.algorithm != actual.algorithm {
            return Err(ChecksumError::AlgorithmMismatch {
                expected: self.algorithm,
                actual: actual.algorithm,
            });
        }
        if self.digest != actual.digest {
            return Err(ChecksumError::Mismatch {
                expected: self.clone(),
                actual: actual.clone(),
            });
        }
        Ok(())
    }
}

impl PartialEq for ChecksumValue {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.digest == other.digest
    }
}

impl Eq for ChecksumValue {}

impl Hash for ChecksumValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.algorithm.hash(state);
        self.digest.hash(state);
    }
}

/// Formats as `ALG/length/hex`, or `ALG/hex` when the length is unknown.
impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.length {
            Some(len) => write!(f, "{}/{}/{}", self.algorithm, len, self.to_hex()),
            None => write!(f, "{}/{}", self.algorithm, self.to_hex()),
        }
    }
}

impl FromStr for ChecksumValue {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split('/').collect();
        match fields.as_slice() {
            [alg, digest] => Self::from_hex(alg.parse()?, digest),
            [alg, len, digest] => {
                let length = len
                    .parse::<u64>()
                    .map_err(|e| ChecksumError::Parse(format!("length {len:?}: {e}")))?;
                Ok(Self::from_hex(alg.parse()?, digest)?.with_length(length))
            }
            _ => Err(ChecksumError::Parse(format!("malformed checksum: {s}"))),
        }
    }
}
