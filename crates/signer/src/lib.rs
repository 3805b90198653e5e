//! Request signing for S3-compatible stores.
//!
//! Two incompatible algorithms are supported, selected once per client:
//! [`SignerV2`] (HMAC-SHA1 over a header subset) and [`SignerV4`]
//! (HMAC-SHA256 over a full canonical request with a derived signing key).
//! Both consume a [`CanonicalRequest`] built fresh for every attempt, so a
//! retried request is always signed with a new timestamp.

mod canonical;
mod clock;
mod crypto;
mod error;
mod v2;
mod v4;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use geos3_protocol::constants::AUTHORIZATION;
use geos3_protocol::{Credential, Endpoint, Request, SignedRequest};
use serde::{Deserialize, Serialize};

pub use canonical::CanonicalRequest;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SigningError;
pub use v2::SignerV2;
pub use v4::SignerV4;

/// How long a signature is accepted around its signing time.
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureVersion {
    V2,
    #[default]
    V4,
}

/// A signature algorithm.
///
/// Implementations are stateless and shared across every worker.
pub trait RequestSigner: Send + Sync + fmt::Debug {
    fn version(&self) -> SignatureVersion;

    fn validity(&self) -> Duration {
        DEFAULT_VALIDITY
    }

    /// Adds the headers the algorithm signs over (date, host, payload
    /// hash, session token) for a signature made at `timestamp`.
    fn prepare(
        &self,
        request: Request,
        endpoint: &Endpoint,
        credential: &Credential,
        timestamp: DateTime<Utc>,
    ) -> Request;

    fn canonicalize(&self, request: &Request) -> CanonicalRequest {
        CanonicalRequest::from_request(request)
    }

    /// Computes the `Authorization` header value.
    fn authorization(
        &self,
        canonical: &CanonicalRequest,
        credential: &Credential,
        timestamp: DateTime<Utc>,
    ) -> Result<String, SigningError>;

    /// Builds a query-string authenticated URL valid for `expires_in`.
    fn presign(
        &self,
        request: &Request,
        endpoint: &Endpoint,
        credential: &Credential,
        timestamp: DateTime<Utc>,
        expires_in: Duration,
    ) -> Result<String, SigningError>;
}

/// Signs `request` for `endpoint` at the clock's current time.
pub fn sign_request(
    signer: &dyn RequestSigner,
    request: &Request,
    endpoint: &Endpoint,
    credential: &Credential,
    clock: &dyn Clock,
) -> Result<SignedRequest, SigningError> {
    let timestamp = clock.now()?;
    let prepared = signer.prepare(
        request.clone().without_header(AUTHORIZATION),
        endpoint,
        credential,
        timestamp,
    );
    let canonical = signer.canonicalize(&prepared);
    let authorization = signer.authorization(&canonical, credential, timestamp)?;
    tracing::trace!(
        version = ?signer.version(),
        method = %prepared.method(),
        endpoint = %endpoint,
        "request signed"
    );
    Ok(SignedRequest::new(
        prepared.with_header(AUTHORIZATION, authorization),
        endpoint.clone(),
        timestamp,
        signer.validity(),
    ))
}

/// Builds the signer for a configured signature version.
pub fn signer_for(
    version: SignatureVersion,
    region: &str,
    service: &str,
    unsigned_payload: bool,
) -> Arc<dyn RequestSigner> {
    match version {
        SignatureVersion::V2 => Arc::new(SignerV2::new()),
        SignatureVersion::V4 => {
            Arc::new(SignerV4::new(region, service).with_unsigned_payload(unsigned_payload))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use geos3_protocol::Method;

    fn cred() -> Credential {
        Credential::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
    }

    fn endpoint() -> Endpoint {
        "http://site-a.example:9020".parse().unwrap()
    }

    fn request() -> Request {
        Request::for_object(Method::Put, "photos", "2024/beach.jpg")
            .with_query("partNumber", "2")
            .with_query("uploadId", "u-1")
            .with_header("content-type", "image/jpeg")
            .with_body(&b"part body"[..])
    }

    fn sign(signer: &dyn RequestSigner, clock: &dyn Clock) -> Result<SignedRequest, SigningError> {
        sign_request(signer, &request(), &endpoint(), &cred(), clock)
    }

    #[test]
    fn identical_inputs_sign_identically() {
        for version in [SignatureVersion::V2, SignatureVersion::V4] {
            let signer = signer_for(version, "us-east-1", "s3", false);
            let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 3, 9, 10, 30, 0).unwrap());
            let a = sign(signer.as_ref(), &clock).unwrap();
            let b = sign(signer.as_ref(), &clock).unwrap();
            assert_eq!(a.authorization(), b.authorization());
            assert!(a.authorization().is_some());
        }
    }

    #[test]
    fn resigning_later_changes_authorization() {
        for version in [SignatureVersion::V2, SignatureVersion::V4] {
            let signer = signer_for(version, "us-east-1", "s3", false);
            let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 3, 9, 10, 30, 0).unwrap());
            let first = sign(signer.as_ref(), &clock).unwrap();
            clock.advance(TimeDelta::seconds(1));
            let second = sign(signer.as_ref(), &clock).unwrap();
            assert_ne!(first.authorization(), second.authorization());
        }
    }

    #[test]
    fn stale_signature_falls_outside_validity() {
        let signer = signer_for(SignatureVersion::V4, "us-east-1", "s3", false);
        let t0 = Utc.with_ymd_and_hms(2024, 3, 9, 10, 30, 0).unwrap();
        let clock = ManualClock::at(t0);
        let signed = sign(signer.as_ref(), &clock).unwrap();
        assert!(signed.is_valid_at(t0 + TimeDelta::minutes(10)));
        assert!(!signed.is_valid_at(t0 + TimeDelta::minutes(20)));
    }

    #[test]
    fn missing_clock_is_a_signing_error() {
        let signer = signer_for(SignatureVersion::V4, "us-east-1", "s3", false);
        let clock = ManualClock::unavailable();
        let err = sign(signer.as_ref(), &clock).unwrap_err();
        assert!(matches!(err, SigningError::ClockUnavailable));
    }

    #[test]
    fn existing_authorization_is_replaced() {
        let signer = signer_for(SignatureVersion::V2, "us-east-1", "s3", false);
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 3, 9, 10, 30, 0).unwrap());
        let stale = request().with_header("Authorization", "AWS old:signature");
        let signed = sign_request(signer.as_ref(), &stale, &endpoint(), &cred(), &clock).unwrap();
        assert_ne!(signed.authorization(), Some("AWS old:signature"));
    }

    #[test]
    fn signature_version_serde() {
        let v: SignatureVersion = serde_json::from_str("\"v2\"").unwrap();
        assert_eq!(v, SignatureVersion::V2);
        assert_eq!(SignatureVersion::default(), SignatureVersion::V4);
    }
}
