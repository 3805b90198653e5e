//! Header names, payload sentinels and signed sub-resources.

pub const AUTHORIZATION: &str = "authorization";
pub const CONTENT_LENGTH: &str = "content-length";
pub const CONTENT_MD5: &str = "content-md5";
pub const CONTENT_RANGE: &str = "content-range";
pub const CONTENT_TYPE: &str = "content-type";
pub const DATE: &str = "date";
pub const ETAG: &str = "etag";
pub const HOST: &str = "host";
pub const IF_MATCH: &str = "if-match";
pub const RANGE: &str = "range";
pub const RETRY_AFTER: &str = "retry-after";

pub const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";
pub const X_AMZ_DATE: &str = "x-amz-date";
pub const X_AMZ_REQUEST_ID: &str = "x-amz-request-id";
pub const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";
pub const X_AMZ_VERSION_ID: &str = "x-amz-version-id";
/// Server-asserted MD5 of the stored object; trumps the ETag when present.
pub const X_EMC_CONTENT_MD5: &str = "x-emc-content-md5";

pub const AMZ_HEADER_PREFIX: &str = "x-amz-";
pub const EMC_HEADER_PREFIX: &str = "x-emc-";

/// Payload hash sentinel for bodies that are not hashed into the signature.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
/// Payload hash sentinel for chunk-signed streaming uploads.
pub const STREAMING_PAYLOAD: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SERVICE: &str = "s3";

// Query parameters.
pub const PARAM_UPLOADS: &str = "uploads";
pub const PARAM_UPLOAD_ID: &str = "uploadId";
pub const PARAM_PART_NUMBER: &str = "partNumber";
pub const PARAM_PART_NUMBER_MARKER: &str = "part-number-marker";
pub const PARAM_MAX_PARTS: &str = "max-parts";

/// Query parameters that name a sub-resource and are therefore part of the
/// V2 string to sign. Sorted.
pub const SIGNED_SUBRESOURCES: &[&str] = &[
    "acl",
    "cors",
    "delete",
    "endpoint",
    "isstaleallowed",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "requestPayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "restore",
    "tagging",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];
