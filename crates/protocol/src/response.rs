use std::collections::BTreeMap;
use std::fmt;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};

use crate::TransportError;
use crate::constants::{CONTENT_LENGTH, ETAG, X_AMZ_REQUEST_ID};

/// Streaming response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Status, lower-cased headers and a streaming body.
pub struct Response {
    status: u16,
    headers: BTreeMap<String, String>,
    body: BodyStream,
}

impl Response {
    pub fn new(status: u16, headers: BTreeMap<String, String>, body: BodyStream) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            status,
            headers,
            body,
        }
    }

    /// A response whose body is already in memory.
    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let stream = if body.is_empty() {
            stream::empty().boxed()
        } else {
            stream::once(async move { Ok(body) }).boxed()
        };
        Self::new(status, BTreeMap::new(), stream)
    }

    pub fn empty(status: u16) -> Self {
        Self::from_bytes(status, Bytes::new())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The ETag header with surrounding quotes removed.
    pub fn etag(&self) -> Option<&str> {
        self.header(ETAG).map(|v| v.trim().trim_matches('"'))
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header(X_AMZ_REQUEST_ID)
    }

    /// Replaces the body stream, e.g. to wrap it in a checksum adapter.
    pub fn map_body(self, f: impl FnOnce(BodyStream) -> BodyStream) -> Self {
        Self {
            status: self.status,
            headers: self.headers,
            body: f(self.body),
        }
    }

    pub fn into_body(self) -> BodyStream {
        self.body
    }

    pub fn into_parts(self) -> (u16, BTreeMap<String, String>, BodyStream) {
        (self.status, self.headers, self.body)
    }

    /// Buffers the whole body. Meant for small XML documents.
    pub async fn collect(self) -> Result<Bytes, TransportError> {
        let mut body = self.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.collect().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_streamed_chunks() {
        let chunks = vec![Ok(Bytes::from_static(b"<a>")), Ok(Bytes::from_static(b"</a>"))];
        let resp = Response::new(200, BTreeMap::new(), stream::iter(chunks).boxed());
        assert_eq!(resp.text().await.unwrap(), "<a></a>");
    }

    #[tokio::test]
    async fn body_error_surfaces_on_collect() {
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(TransportError::Reset("peer went away".into())),
        ];
        let resp = Response::new(200, BTreeMap::new(), stream::iter(chunks).boxed());
        assert!(matches!(
            resp.collect().await,
            Err(TransportError::Reset(_))
        ));
    }

    #[test]
    fn header_helpers() {
        let mut headers = BTreeMap::new();
        headers.insert("ETag".to_string(), "\"abc123\"".to_string());
        headers.insert("Content-Length".to_string(), "42".to_string());
        let resp = Response::new(206, headers, stream::empty().boxed());

        assert!(resp.is_success());
        assert_eq!(resp.etag(), Some("abc123"));
        assert_eq!(resp.content_length(), Some(42));
        assert_eq!(resp.header("etag"), Some("\"abc123\""));
    }

    #[test]
    fn non_2xx_is_not_success() {
        assert!(!Response::empty(304).is_success());
        assert!(!Response::empty(503).is_success());
        assert!(Response::empty(204).is_success());
    }
}
