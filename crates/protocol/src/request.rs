use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::Endpoint;
use crate::constants::AUTHORIZATION;
use crate::encoding::{encode_path, uri_encode};

/// HTTP methods used by the S3 API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }

    pub fn is_idempotent(self) -> bool {
        !matches!(self, Self::Post)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A logical S3 request, independent of the site it is sent to.
///
/// Header names are stored lower-cased. Query parameters without a value
/// (`?uploads`) are stored as `None`.
#[derive(Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    bucket: Option<String>,
    key: Option<String>,
    query: BTreeMap<String, Option<String>>,
    headers: BTreeMap<String, String>,
    body: Bytes,
    retry_safe: bool,
}

impl Request {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            bucket: None,
            key: None,
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
            retry_safe: method.is_idempotent(),
        }
    }

    pub fn for_bucket(method: Method, bucket: impl Into<String>) -> Self {
        let mut req = Self::new(method);
        req.bucket = Some(bucket.into());
        req
    }

    pub fn for_object(method: Method, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        let mut req = Self::for_bucket(method, bucket);
        req.key = Some(key.into());
        req
    }

    /// Addresses a key without a bucket path segment, as with
    /// virtual-hosted endpoints where the bucket is part of the host.
    pub fn for_key(method: Method, key: impl Into<String>) -> Self {
        let mut req = Self::new(method);
        req.key = Some(key.into());
        req
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), Some(value.into()));
        self
    }

    /// Adds a value-less sub-resource parameter such as `?uploads`.
    pub fn with_subresource(mut self, name: impl Into<String>) -> Self {
        self.query.insert(name.into(), None);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.into().trim().to_string());
        self
    }

    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.remove(&name.to_ascii_lowercase());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Marks whether an ambiguous failure may be retried. Defaults to the
    /// method's idempotency.
    pub fn with_retry_safe(mut self, retry_safe: bool) -> Self {
        self.retry_safe = retry_safe;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn query(&self) -> &BTreeMap<String, Option<String>> {
        &self.query
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query.get(name).and_then(|v| v.as_deref())
    }

    pub fn has_query(&self, name: &str) -> bool {
        self.query.contains_key(name)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn retry_safe(&self) -> bool {
        self.retry_safe
    }

    /// Unencoded path-style resource, `/bucket/key`.
    pub fn path(&self) -> String {
        match (self.bucket.as_deref(), self.key.as_deref()) {
            (Some(bucket), Some(key)) if !key.is_empty() => format!("/{bucket}/{key}"),
            (Some(bucket), _) => format!("/{bucket}"),
            (None, Some(key)) => format!("/{key}"),
            (None, None) => "/".to_string(),
        }
    }

    pub fn encoded_path(&self) -> String {
        encode_path(&self.path())
    }

    /// Identifier used for geo-pinning: the object key, or the bucket for
    /// bucket-level requests.
    pub fn geo_id(&self) -> Option<&str> {
        match self.key.as_deref() {
            Some(key) if !key.is_empty() => Some(key),
            _ => self.bucket.as_deref(),
        }
    }

    /// Full URL of this request on `endpoint`.
    pub fn url(&self, endpoint: &Endpoint) -> String {
        let query = self.query_string();
        if query.is_empty() {
            format!("{}{}", endpoint.base_url(), self.encoded_path())
        } else {
            format!("{}{}?{}", endpoint.base_url(), self.encoded_path(), query)
        }
    }

    /// Query string as sent on the wire (`uploads&uploadId=abc`).
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{}={}", uri_encode(k), uri_encode(v)),
                None => uri_encode(k),
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: BTreeMap<&str, &str> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let shown = if k == AUTHORIZATION { "<redacted>" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path())
            .field("query", &self.query)
            .field("headers", &headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SignedRequest
// ---------------------------------------------------------------------------

/// A request bound to a site and carrying its authorization.
///
/// Signatures are time-bound: a signed request is only accepted within
/// `valid_for` of `signed_at`, so retries must sign again.
#[derive(Clone)]
pub struct SignedRequest {
    request: Request,
    endpoint: Endpoint,
    signed_at: DateTime<Utc>,
    valid_for: Duration,
}

impl SignedRequest {
    pub fn new(
        request: Request,
        endpoint: Endpoint,
        signed_at: DateTime<Utc>,
        valid_for: Duration,
    ) -> Self {
        Self {
            request,
            endpoint,
            signed_at,
            valid_for,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn signed_at(&self) -> DateTime<Utc> {
        self.signed_at
    }

    pub fn valid_for(&self) -> Duration {
        self.valid_for
    }

    pub fn authorization(&self) -> Option<&str> {
        self.request.header(AUTHORIZATION)
    }

    /// Whether `now` falls inside the clock-skew window around the
    /// signing time.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match TimeDelta::from_std(self.valid_for) {
            Ok(window) => (now - self.signed_at).abs() <= window,
            Err(_) => true,
        }
    }

    pub fn url(&self) -> String {
        self.request.url(&self.endpoint)
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

impl fmt::Debug for SignedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedRequest")
            .field("endpoint", &self.endpoint.base_url())
            .field("request", &self.request)
            .field("signed_at", &self.signed_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn path_style_resource() {
        assert_eq!(
            Request::for_object(Method::Get, "b", "a/b c").path(),
            "/b/a/b c"
        );
        assert_eq!(
            Request::for_object(Method::Get, "b", "a/b c").encoded_path(),
            "/b/a/b%20c"
        );
        assert_eq!(Request::for_bucket(Method::Get, "b").path(), "/b");
        assert_eq!(
            Request::for_key(Method::Get, "test.txt").path(),
            "/test.txt"
        );
        assert_eq!(Request::new(Method::Get).path(), "/");
    }

    #[test]
    fn headers_are_case_insensitive() {
        let req = Request::new(Method::Put).with_header("Content-Type", " text/plain ");
        assert_eq!(req.header("content-type"), Some("text/plain"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("text/plain"));
        assert!(req.without_header("content-TYPE").headers().is_empty());
    }

    #[test]
    fn geo_id_prefers_key() {
        assert_eq!(
            Request::for_object(Method::Get, "b", "k").geo_id(),
            Some("k")
        );
        assert_eq!(
            Request::for_object(Method::Get, "b", "").geo_id(),
            Some("b")
        );
        assert_eq!(Request::new(Method::Get).geo_id(), None);
    }

    #[test]
    fn post_is_not_retry_safe_by_default() {
        assert!(!Request::new(Method::Post).retry_safe());
        assert!(Request::new(Method::Post).with_retry_safe(true).retry_safe());
        assert!(Request::new(Method::Put).retry_safe());
    }

    #[test]
    fn url_includes_sorted_query() {
        let req = Request::for_object(Method::Put, "b", "k")
            .with_query("uploadId", "a/b")
            .with_query("partNumber", "3");
        let signed = SignedRequest::new(
            req,
            "http://site:9020".parse().unwrap(),
            Utc::now(),
            Duration::from_secs(900),
        );
        assert_eq!(
            signed.url(),
            "http://site:9020/b/k?partNumber=3&uploadId=a%2Fb"
        );

        let flag = Request::for_object(Method::Post, "b", "k").with_subresource("uploads");
        assert_eq!(flag.query_string(), "uploads");
    }

    #[test]
    fn validity_window_is_symmetric() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let signed = SignedRequest::new(
            Request::new(Method::Get),
            "http://h".parse().unwrap(),
            at,
            Duration::from_secs(15 * 60),
        );
        assert!(signed.is_valid_at(at + TimeDelta::minutes(14)));
        assert!(signed.is_valid_at(at - TimeDelta::minutes(14)));
        assert!(!signed.is_valid_at(at + TimeDelta::minutes(16)));
        assert!(!signed.is_valid_at(at - TimeDelta::minutes(16)));
    }

    #[test]
    fn debug_redacts_authorization() {
        let req = Request::new(Method::Get).with_header("Authorization", "AWS key:sig");
        assert!(!format!("{req:?}").contains("key:sig"));
    }
}
