use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use geos3_checksum::ChecksumError;
use geos3_protocol::TransportError;
use geos3_protocol::constants::{RETRY_AFTER, X_AMZ_REQUEST_ID};
use geos3_signer::SigningError;

use crate::xml;

/// Error codes that mean the signature is stale and a fresh one may succeed.
const AUTH_EXPIRED_CODES: &[&str] = &[
    "RequestTimeTooSkewed",
    "RequestExpired",
    "ExpiredToken",
    "SignatureExpired",
];

const THROTTLING_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequests",
];

const DIGEST_CODES: &[&str] = &["BadDigest", "InvalidDigest", "XAmzContentSHA256Mismatch"];

/// An error response decoded from a remote site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status, self.code, self.message)?;
        if let Some(id) = &self.request_id {
            write!(f, " (request {id})")?;
        }
        Ok(())
    }
}

/// Everything a request through the client can fail with.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication expired: {0}")]
    AuthExpired(RemoteError),

    #[error("throttled: {error}")]
    Throttled {
        error: RemoteError,
        retry_after: Option<Duration>,
    },

    #[error("server error: {0}")]
    Server(RemoteError),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("remote rejected request: {0}")]
    RemoteRejection(RemoteError),

    #[error("no healthy endpoint available")]
    NoHealthyEndpoint,

    #[error("session aborted")]
    SessionAborted,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Integrity(inner) => inner.into(),
            other => Self::Transport(other),
        }
    }
}

impl From<ChecksumError> for ClientError {
    fn from(error: ChecksumError) -> Self {
        match error {
            ChecksumError::Mismatch { expected, actual } => Self::ChecksumMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            },
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl ClientError {
    /// Maps a non-2xx response onto the error taxonomy.
    ///
    /// `body` is the raw response body; an S3 `<Error>` document supplies
    /// the code and message when present.
    pub fn from_status(status: u16, headers: &BTreeMap<String, String>, body: &[u8]) -> Self {
        let document = if body.is_empty() {
            None
        } else {
            xml::parse_error(&String::from_utf8_lossy(body)).ok()
        };
        let (code, message, doc_request_id) = match document {
            Some(doc) => (doc.code, doc.message, doc.request_id),
            None => (None, None, None),
        };
        let code = code.unwrap_or_else(|| default_code(status).to_string());
        let remote = RemoteError {
            status,
            message: message.unwrap_or_else(|| format!("HTTP {status}")),
            request_id: doc_request_id.or_else(|| headers.get(X_AMZ_REQUEST_ID).cloned()),
            code,
        };

        if AUTH_EXPIRED_CODES.contains(&remote.code.as_str()) {
            return Self::AuthExpired(remote);
        }
        if status == 429 || THROTTLING_CODES.contains(&remote.code.as_str()) {
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Self::Throttled {
                error: remote,
                retry_after,
            };
        }
        if DIGEST_CODES.contains(&remote.code.as_str()) {
            return Self::ChecksumMismatch {
                expected: "request digest".into(),
                actual: remote.to_string(),
            };
        }
        match status {
            501 => Self::RemoteRejection(remote),
            500..=599 => Self::Server(remote),
            400..=499 => Self::RemoteRejection(remote),
            _ => Self::Protocol(format!("unexpected response: {remote}")),
        }
    }

    /// The decoded remote error, for variants that carry one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::AuthExpired(e) | Self::Server(e) | Self::RemoteRejection(e) => Some(e),
            Self::Throttled { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.remote().map(|e| e.code.as_str())
    }

    pub fn is_not_found(&self) -> bool {
        self.remote().is_some_and(|e| {
            e.status == 404 || matches!(e.code.as_str(), "NoSuchKey" | "NoSuchUpload")
        })
    }
}

fn default_code(status: u16) -> &'static str {
    match status {
        400 => "BadRequest",
        403 => "AccessDenied",
        404 => "NotFound",
        412 => "PreconditionFailed",
        416 => "InvalidRange",
        429 => "TooManyRequests",
        500 => "InternalError",
        501 => "NotImplemented",
        503 => "ServiceUnavailable",
        _ => "Unknown",
    }
}
