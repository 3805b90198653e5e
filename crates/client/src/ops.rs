//! S3 operation request builders and response readers.

use bytes::Bytes;

use geos3_protocol::constants::{
    CONTENT_MD5, CONTENT_TYPE, IF_MATCH, PARAM_MAX_PARTS, PARAM_PART_NUMBER,
    PARAM_PART_NUMBER_MARKER, PARAM_UPLOAD_ID, PARAM_UPLOADS, RANGE, X_AMZ_VERSION_ID,
};
use geos3_protocol::{Method, Request, Response};

use crate::ClientError;
use crate::error::RemoteError;
use crate::xml;

pub use crate::xml::{ListPartsPage, ListedPart};

/// Largest page ListParts is asked for.
pub const LIST_PARTS_PAGE: u32 = 1000;

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Range` header value (HTTP ranges are inclusive).
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompleteResult {
    pub location: Option<String>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub content_length: u64,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub content_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

pub fn initiate_multipart_upload(bucket: &str, key: &str, content_type: Option<&str>) -> Request {
    let request = Request::for_object(Method::Post, bucket, key).with_subresource(PARAM_UPLOADS);
    match content_type {
        Some(ct) => request.with_header(CONTENT_TYPE, ct),
        None => request,
    }
}

pub fn upload_part(
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: u32,
    body: Bytes,
) -> Request {
    Request::for_object(Method::Put, bucket, key)
        .with_query(PARAM_PART_NUMBER, part_number.to_string())
        .with_query(PARAM_UPLOAD_ID, upload_id)
        .with_body(body)
}

/// Completion is safe to repeat: the server answers a duplicate with the
/// same result or `NoSuchUpload`.
pub fn complete_multipart_upload(
    bucket: &str,
    key: &str,
    upload_id: &str,
    parts: &[CompletedPart],
) -> Request {
    let body = xml::complete_body(parts.iter().map(|p| (p.part_number, p.etag.as_str())));
    Request::for_object(Method::Post, bucket, key)
        .with_query(PARAM_UPLOAD_ID, upload_id)
        .with_header(CONTENT_TYPE, "application/xml")
        .with_body(body)
        .with_retry_safe(true)
}

pub fn abort_multipart_upload(bucket: &str, key: &str, upload_id: &str) -> Request {
    Request::for_object(Method::Delete, bucket, key).with_query(PARAM_UPLOAD_ID, upload_id)
}

pub fn list_parts(bucket: &str, key: &str, upload_id: &str, marker: Option<u32>) -> Request {
    let request = Request::for_object(Method::Get, bucket, key)
        .with_query(PARAM_UPLOAD_ID, upload_id)
        .with_query(PARAM_MAX_PARTS, LIST_PARTS_PAGE.to_string());
    match marker {
        Some(m) => request.with_query(PARAM_PART_NUMBER_MARKER, m.to_string()),
        None => request,
    }
}

pub fn head_object(bucket: &str, key: &str) -> Request {
    Request::for_object(Method::Head, bucket, key)
}

/// GET of a whole object or a range of it. `if_match` pins the read to
/// one version so parts of a download cannot straddle an overwrite.
pub fn get_object(
    bucket: &str,
    key: &str,
    range: Option<ByteRange>,
    if_match: Option<&str>,
) -> Request {
    let mut request = Request::for_object(Method::Get, bucket, key);
    if let Some(range) = range {
        request = request.with_header(RANGE, range.header_value());
    }
    if let Some(etag) = if_match {
        request = request.with_header(IF_MATCH, format!("\"{}\"", etag.trim_matches('"')));
    }
    request
}

pub fn put_object(bucket: &str, key: &str, body: Bytes, content_type: Option<&str>) -> Request {
    let request = Request::for_object(Method::Put, bucket, key).with_body(body);
    match content_type {
        Some(ct) => request.with_header(CONTENT_TYPE, ct),
        None => request,
    }
}

/// Writes `body` over `range` of an existing object. The server grows the
/// object when the range ends past it and checks the body against
/// `Content-MD5`.
pub fn put_object_range(
    bucket: &str,
    key: &str,
    range: ByteRange,
    body: Bytes,
    content_md5: &str,
) -> Request {
    Request::for_object(Method::Put, bucket, key)
        .with_header(RANGE, range.header_value())
        .with_header(CONTENT_MD5, content_md5)
        .with_body(body)
}

pub fn delete_object(bucket: &str, key: &str) -> Request {
    Request::for_object(Method::Delete, bucket, key)
}

// ---------------------------------------------------------------------------
// Response readers
// ---------------------------------------------------------------------------

async fn body_text(response: Response) -> Result<String, ClientError> {
    Ok(response.text().await?)
}

/// Fails with a server error when a 200 response carries an `<Error>`
/// document, which S3 does for long-running completions.
fn reject_embedded_error(status: u16, text: &str) -> Result<(), ClientError> {
    if xml::root_element(text)?.as_deref() != Some("Error") {
        return Ok(());
    }
    let doc = xml::parse_error(text)?;
    Err(ClientError::Server(RemoteError {
        status,
        code: doc.code.unwrap_or_else(|| "InternalError".into()),
        message: doc.message.unwrap_or_default(),
        request_id: doc.request_id,
    }))
}

pub async fn read_initiate(response: Response) -> Result<String, ClientError> {
    let status = response.status();
    let text = body_text(response).await?;
    reject_embedded_error(status, &text)?;
    xml::parse_initiate(&text)
}

pub fn read_part_etag(response: &Response) -> Result<String, ClientError> {
    response
        .etag()
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ClientError::Protocol("upload response has no ETag".into()))
}

pub async fn read_complete(response: Response) -> Result<CompleteResult, ClientError> {
    let status = response.status();
    let version_id = response.header(X_AMZ_VERSION_ID).map(str::to_string);
    let text = body_text(response).await?;
    reject_embedded_error(status, &text)?;
    let doc = xml::parse_complete(&text)?;
    Ok(CompleteResult {
        location: doc.location,
        etag: doc.etag,
        version_id,
    })
}

pub async fn read_list_parts(response: Response) -> Result<ListPartsPage, ClientError> {
    let text = body_text(response).await?;
    xml::parse_list_parts(&text)
}

pub fn read_object_info(response: &Response) -> Result<ObjectInfo, ClientError> {
    let content_length = response
        .content_length()
        .ok_or_else(|| ClientError::Protocol("HEAD response has no Content-Length".into()))?;
    Ok(ObjectInfo {
        content_length,
        etag: response.etag().map(str::to_string),
        version_id: response.header(X_AMZ_VERSION_ID).map(str::to_string),
        content_type: response.header(CONTENT_TYPE).map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geos3_protocol::constants::ETAG;

    #[test]
    fn byte_range_header_is_inclusive() {
        let range = ByteRange::new(0, 10);
        assert_eq!(range.header_value(), "bytes=0-9");
        assert_eq!(range.len(), 10);
        assert!(ByteRange::new(5, 5).is_empty());
    }

    #[test]
    fn request_shapes() {
        let r = initiate_multipart_upload("b", "k", Some("image/png"));
        assert_eq!(r.method(), Method::Post);
        assert_eq!(r.query_string(), "uploads");
        assert_eq!(r.header(CONTENT_TYPE), Some("image/png"));
        assert!(!r.retry_safe());

        let r = upload_part("b", "k", "u 1", 3, Bytes::from_static(b"data"));
        assert_eq!(r.query_string(), "partNumber=3&uploadId=u%201");
        assert!(r.retry_safe());

        let r = complete_multipart_upload(
            "b",
            "k",
            "u",
            &[CompletedPart {
                part_number: 1,
                etag: "aa".into(),
            }],
        );
        assert!(r.retry_safe());
        assert!(std::str::from_utf8(r.body()).unwrap().contains("<PartNumber>1</PartNumber>"));

        let r = list_parts("b", "k", "u", Some(1000));
        assert_eq!(r.query_value(PARAM_PART_NUMBER_MARKER), Some("1000"));

        let r = get_object("b", "k", Some(ByteRange::new(10, 20)), Some("abc"));
        assert_eq!(r.header(RANGE), Some("bytes=10-19"));
        assert_eq!(r.header(IF_MATCH), Some("\"abc\""));

        let r = put_object_range(
            "b",
            "k",
            ByteRange::new(4, 8),
            Bytes::from_static(b"data"),
            "x",
        );
        assert_eq!(r.method(), Method::Put);
        assert_eq!(r.header(RANGE), Some("bytes=4-7"));
        assert_eq!(r.header(CONTENT_MD5), Some("x"));
        assert!(r.retry_safe());

        let r = delete_object("b", "k");
        assert_eq!(r.method(), Method::Delete);
        assert!(r.retry_safe());
    }

    #[tokio::test]
    async fn embedded_error_in_complete_is_server_error() {
        let response =
            Response::from_bytes(200, xml::error_document("InternalError", "try again", None));
        let err = read_complete(response).await.unwrap_err();
        assert!(matches!(err, ClientError::Server(_)));
    }

    #[tokio::test]
    async fn complete_reads_version_header() {
        let body =
            "<CompleteMultipartUploadResult><ETag>\"x-2\"</ETag></CompleteMultipartUploadResult>";
        let response = Response::from_bytes(200, body).with_header(X_AMZ_VERSION_ID, "v7");
        let result = read_complete(response).await.unwrap();
        assert_eq!(result.etag.as_deref(), Some("x-2"));
        assert_eq!(result.version_id.as_deref(), Some("v7"));
    }

    #[test]
    fn part_etag_required() {
        assert!(read_part_etag(&Response::empty(200)).is_err());
        let response = Response::empty(200).with_header(ETAG, "\"abc\"");
        assert_eq!(read_part_etag(&response).unwrap(), "abc");
    }

    #[test]
    fn object_info_from_headers() {
        let response = Response::empty(200)
            .with_header("Content-Length", "42")
            .with_header(ETAG, "\"e\"");
        let info = read_object_info(&response).unwrap();
        assert_eq!(info.content_length, 42);
        assert_eq!(info.etag.as_deref(), Some("e"));
        assert!(read_object_info(&Response::empty(200)).is_err());
    }
}
