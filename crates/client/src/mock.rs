//! In-memory S3 endpoint for tests.
//!
//! [`MockS3`] implements [`Executor`] and speaks enough of the protocol for
//! the client and the transfer engine: objects, ranged reads and writes,
//! and the multipart upload lifecycle. Faults can be scripted per operation and
//! per part, and every call is counted.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tracing::trace;

use geos3_checksum::{ChecksumAlgorithm, ChecksumValue, RunningChecksum, multipart_etag};
use geos3_protocol::constants::{
    CONTENT_LENGTH, CONTENT_MD5, CONTENT_RANGE, CONTENT_TYPE, ETAG, IF_MATCH, PARAM_MAX_PARTS,
    PARAM_PART_NUMBER, PARAM_PART_NUMBER_MARKER, PARAM_UPLOAD_ID, PARAM_UPLOADS, RANGE,
    X_AMZ_REQUEST_ID, X_AMZ_VERSION_ID,
};
use geos3_protocol::{Endpoint, Method, Response, SignedRequest, TransportError};
use geos3_signer::Clock;

use crate::executor::Executor;
use crate::xml;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    PutObject,
    PutObjectRange,
    DeleteObject,
    GetObject,
    HeadObject,
    InitiateUpload,
    UploadPart,
    CompleteUpload,
    AbortUpload,
    ListParts,
    Unsupported,
}

impl MockOperation {
    fn of(request: &geos3_protocol::Request) -> Self {
        let multipart = request.has_query(PARAM_UPLOAD_ID);
        match request.method() {
            Method::Post if request.has_query(PARAM_UPLOADS) => Self::InitiateUpload,
            Method::Post if multipart => Self::CompleteUpload,
            Method::Put if multipart && request.has_query(PARAM_PART_NUMBER) => Self::UploadPart,
            Method::Put if request.header(RANGE).is_some() => Self::PutObjectRange,
            Method::Put => Self::PutObject,
            Method::Delete if multipart => Self::AbortUpload,
            Method::Delete => Self::DeleteObject,
            Method::Get if multipart => Self::ListParts,
            Method::Get => Self::GetObject,
            Method::Head => Self::HeadObject,
            _ => Self::Unsupported,
        }
    }
}

/// Which requests of an operation a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Any,
    Part(u32),
    /// Ranged GETs and PUTs starting at this offset.
    RangeStart(u64),
}

#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail before reaching the store.
    Transport(TransportError),
    /// Answer with an error status and S3 error code.
    Status { status: u16, code: String },
    /// Store the upload but report an ETag that does not match it.
    CorruptEtag,
    /// Serve GET bodies with the first byte flipped, or flip the first
    /// byte of a ranged PUT body before it is checked and stored.
    CorruptBody,
    /// Hold the request for a while, then serve it normally.
    Delay(Duration),
}

impl Fault {
    pub fn status(status: u16, code: impl Into<String>) -> Self {
        Self::Status {
            status,
            code: code.into(),
        }
    }

    pub fn reset() -> Self {
        Self::Transport(TransportError::Reset("connection reset by peer".into()))
    }
}

struct ScriptedFault {
    operation: MockOperation,
    target: Target,
    remaining: u32,
    fault: Fault,
}

struct StoredObject {
    data: Bytes,
    etag: String,
    version: u64,
}

struct MockUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Default)]
struct MockState {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, MockUpload>,
    calls: HashMap<MockOperation, u32>,
    part_attempts: HashMap<u32, u32>,
    range_attempts: HashMap<u64, u32>,
    faults: Vec<ScriptedFault>,
    endpoints: Vec<Endpoint>,
    next_upload: u64,
    next_version: u64,
}

type RequestHook = Arc<dyn Fn(MockOperation, &SignedRequest) + Send + Sync>;

#[derive(Default)]
pub struct MockS3 {
    state: Mutex<MockState>,
    hook: Mutex<Option<RequestHook>>,
    server_clock: Option<Arc<dyn Clock>>,
    latency: Option<Duration>,
    omit_range_md5: bool,
    request_ids: AtomicU64,
}

impl MockS3 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects requests whose signature is not valid at the server's time,
    /// like a site with a skewed clock.
    pub fn with_server_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.server_clock = Some(clock);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Serves ranged GETs without a `Content-MD5` header.
    pub fn without_range_md5(mut self) -> Self {
        self.omit_range_md5 = true;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `fault` to the next `times` matching requests.
    pub fn inject(&self, operation: MockOperation, target: Target, times: u32, fault: Fault) {
        self.state().faults.push(ScriptedFault {
            operation,
            target,
            remaining: times,
            fault,
        });
    }

    /// Called for every request before faults and the store see it.
    pub fn on_request(
        &self,
        hook: impl Fn(MockOperation, &SignedRequest) + Send + Sync + 'static,
    ) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn calls(&self, operation: MockOperation) -> u32 {
        self.state().calls.get(&operation).copied().unwrap_or(0)
    }

    /// UploadPart requests seen for one part number, failed ones included.
    pub fn part_attempts(&self, part_number: u32) -> u32 {
        self.state()
            .part_attempts
            .get(&part_number)
            .copied()
            .unwrap_or(0)
    }

    /// Ranged PUT requests seen for one start offset, failed ones included.
    pub fn range_attempts(&self, start: u64) -> u32 {
        self.state()
            .range_attempts
            .get(&start)
            .copied()
            .unwrap_or(0)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub fn object_etag(&self, bucket: &str, key: &str) -> Option<String> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.etag.clone())
    }

    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let etag = md5(&data).to_hex();
        let mut state = self.state();
        state.next_version += 1;
        let version = state.next_version;
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                etag,
                version,
            },
        );
    }

    pub fn open_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    pub fn uploaded_parts(&self, upload_id: &str) -> Vec<u32> {
        self.state()
            .uploads
            .get(upload_id)
            .map(|u| u.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Drops an upload as if the server had expired it.
    pub fn expire_upload(&self, upload_id: &str) -> bool {
        self.state().uploads.remove(upload_id).is_some()
    }

    /// Endpoints requests were sent to, in order.
    pub fn endpoints_seen(&self) -> Vec<Endpoint> {
        self.state().endpoints.clone()
    }

    fn take_fault(
        &self,
        operation: MockOperation,
        request: &geos3_protocol::Request,
    ) -> Option<Fault> {
        let part = request
            .query_value(PARAM_PART_NUMBER)
            .and_then(|p| p.parse::<u32>().ok());
        let range_start = request
            .header(RANGE)
            .and_then(parse_range_header)
            .map(|(start, _)| start);
        let mut state = self.state();
        let index = state.faults.iter().position(|f| {
            f.operation == operation
                && f.remaining > 0
                && match f.target {
                    Target::Any => true,
                    Target::Part(n) => part == Some(n),
                    Target::RangeStart(s) => range_start == Some(s),
                }
        })?;
        let scripted = &mut state.faults[index];
        scripted.remaining -= 1;
        let fault = scripted.fault.clone();
        if scripted.remaining == 0 {
            state.faults.remove(index);
        }
        Some(fault)
    }

    async fn handle(&self, signed: SignedRequest) -> Result<Response, TransportError> {
        let operation = MockOperation::of(signed.request());
        {
            let mut state = self.state();
            *state.calls.entry(operation).or_default() += 1;
            if operation == MockOperation::UploadPart
                && let Some(part) = signed
                    .request()
                    .query_value(PARAM_PART_NUMBER)
                    .and_then(|p| p.parse::<u32>().ok())
            {
                *state.part_attempts.entry(part).or_default() += 1;
            }
            if operation == MockOperation::PutObjectRange
                && let Some((start, _)) = signed
                    .request()
                    .header(RANGE)
                    .and_then(parse_range_header)
            {
                *state.range_attempts.entry(start).or_default() += 1;
            }
            state.endpoints.push(signed.endpoint().clone());
        }
        let hook = self.hook.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(hook) = hook {
            hook(operation, &signed);
        }
        trace!(?operation, path = %signed.request().path(), "mock request");

        if let Some(clock) = &self.server_clock {
            let fresh = clock.now().map(|now| signed.is_valid_at(now)).unwrap_or(false);
            if !fresh {
                return Ok(self.error(
                    403,
                    "RequestTimeTooSkewed",
                    "The difference between the request time and the server's time is too large.",
                ));
            }
        }

        let fault = self.take_fault(operation, signed.request());
        match &fault {
            Some(Fault::Transport(e)) => return Err(e.clone()),
            Some(Fault::Status { status, code }) => {
                return Ok(self.error(*status, code, "Injected failure"));
            }
            Some(Fault::Delay(delay)) => tokio::time::sleep(*delay).await,
            _ => {}
        }

        let request = signed.request();
        let (Some(bucket), Some(key)) = (request.bucket(), request.key()) else {
            return Ok(self.error(400, "InvalidRequest", "bucket and key are required"));
        };
        let response = match operation {
            MockOperation::PutObject => self.put_object(bucket, key, request, fault.as_ref()),
            MockOperation::PutObjectRange => {
                self.put_object_range(bucket, key, request, fault.as_ref())
            }
            MockOperation::DeleteObject => self.delete_object(bucket, key),
            MockOperation::GetObject => self.get_object(bucket, key, request, fault.as_ref()),
            MockOperation::HeadObject => self.head_object(bucket, key),
            MockOperation::InitiateUpload => self.initiate(bucket, key),
            MockOperation::UploadPart => self.upload_part(request, fault.as_ref()),
            MockOperation::CompleteUpload => self.complete(bucket, key, request),
            MockOperation::AbortUpload => self.abort(request),
            MockOperation::ListParts => self.list_parts(request),
            MockOperation::Unsupported => self.error(405, "MethodNotAllowed", "unsupported"),
        };
        Ok(response)
    }

    // -- Responses ----------------------------------------------------------

    fn request_id(&self) -> String {
        format!(
            "mock-{}",
            self.request_ids.fetch_add(1, Ordering::Relaxed) + 1
        )
    }

    fn error(&self, status: u16, code: &str, message: &str) -> Response {
        let id = self.request_id();
        let body = if status == 404 && code == "NotFound" {
            String::new()
        } else {
            xml::error_document(code, message, Some(&id))
        };
        Response::from_bytes(status, body)
            .with_header(CONTENT_TYPE, "application/xml")
            .with_header(X_AMZ_REQUEST_ID, id)
    }

    fn ok(&self, status: u16, body: impl Into<Bytes>) -> Response {
        Response::from_bytes(status, body).with_header(X_AMZ_REQUEST_ID, self.request_id())
    }

    fn check_content_md5(
        &self,
        request: &geos3_protocol::Request,
        body: &[u8],
    ) -> Option<Response> {
        let header = request.header(CONTENT_MD5)?;
        let sent = ChecksumValue::from_base64(ChecksumAlgorithm::Md5, header).ok();
        if sent.as_ref() == Some(&md5(body)) {
            None
        } else {
            Some(self.error(
                400,
                "BadDigest",
                "The Content-MD5 you specified did not match what we received.",
            ))
        }
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        request: &geos3_protocol::Request,
        fault: Option<&Fault>,
    ) -> Response {
        if let Some(rejected) = self.check_content_md5(request, request.body()) {
            return rejected;
        }
        self.insert_object(bucket, key, request.body().clone());
        let etag = match fault {
            Some(Fault::CorruptEtag) => corrupt_etag(request.body()),
            _ => md5(request.body()).to_hex(),
        };
        self.ok(200, Bytes::new()).with_header(ETAG, format!("\"{etag}\""))
    }

    /// Writes the body over `Range` of an existing object, growing it with
    /// zeros when the range starts past its end.
    fn put_object_range(
        &self,
        bucket: &str,
        key: &str,
        request: &geos3_protocol::Request,
        fault: Option<&Fault>,
    ) -> Response {
        let mut body = request.body().clone();
        if matches!(fault, Some(Fault::CorruptBody)) && !body.is_empty() {
            let mut corrupted = body.to_vec();
            corrupted[0] ^= 0xff;
            body = Bytes::from(corrupted);
        }
        if let Some(rejected) = self.check_content_md5(request, &body) {
            return rejected;
        }
        let Some((start, Some(end))) = request.header(RANGE).and_then(parse_range_header) else {
            return self.error(400, "InvalidRange", "A closed byte range is required.");
        };
        if end - start + 1 != body.len() as u64 {
            return self.error(
                400,
                "InvalidRange",
                "The range does not match the request body.",
            );
        }

        let mut state = self.state();
        state.next_version += 1;
        let version = state.next_version;
        let Some(object) = state.objects.get_mut(&(bucket.to_string(), key.to_string())) else {
            return self.error(404, "NoSuchKey", "The specified key does not exist.");
        };
        let mut data = object.data.to_vec();
        let end = end as usize + 1;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start as usize..end].copy_from_slice(&body);
        object.data = Bytes::from(data);
        object.etag = md5(&object.data).to_hex();
        object.version = version;
        let etag = object.etag.clone();
        drop(state);
        self.ok(200, Bytes::new())
            .with_header(ETAG, format!("\"{etag}\""))
            .with_header(X_AMZ_VERSION_ID, version.to_string())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Response {
        self.state()
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        self.ok(204, Bytes::new())
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
        request: &geos3_protocol::Request,
        fault: Option<&Fault>,
    ) -> Response {
        let state = self.state();
        let Some(object) = state.objects.get(&(bucket.to_string(), key.to_string())) else {
            return self.error(404, "NoSuchKey", "The specified key does not exist.");
        };
        if let Some(wanted) = request.header(IF_MATCH)
            && wanted.trim_matches('"') != object.etag
        {
            return self.error(
                412,
                "PreconditionFailed",
                "At least one of the preconditions you specified did not hold.",
            );
        }
        let total = object.data.len() as u64;
        let etag = object.etag.clone();
        let version = object.version;
        let (status, mut body, content_range) = match request.header(RANGE) {
            Some(header) => match parse_range_header(header) {
                Some((start, end)) if start < total => {
                    let end = end.unwrap_or(total - 1).min(total - 1);
                    (
                        206,
                        object.data.slice(start as usize..=end as usize),
                        Some(format!("bytes {start}-{end}/{total}")),
                    )
                }
                _ => {
                    return self.error(
                        416,
                        "InvalidRange",
                        "The requested range is not satisfiable",
                    );
                }
            },
            None => (200, object.data.clone(), None),
        };
        drop(state);

        let range_md5 = content_range
            .as_ref()
            .filter(|_| !self.omit_range_md5)
            .map(|_| md5(&body).to_base64());
        if matches!(fault, Some(Fault::CorruptBody)) && !body.is_empty() {
            let mut corrupted = body.to_vec();
            corrupted[0] ^= 0xff;
            body = Bytes::from(corrupted);
        }
        let length = body.len();
        let mut response = self
            .ok(status, body)
            .with_header(ETAG, format!("\"{etag}\""))
            .with_header(CONTENT_LENGTH, length.to_string())
            .with_header(X_AMZ_VERSION_ID, version.to_string());
        if let Some(range) = content_range {
            response = response.with_header(CONTENT_RANGE, range);
        }
        if let Some(digest) = range_md5 {
            response = response.with_header(CONTENT_MD5, digest);
        }
        response
    }

    fn head_object(&self, bucket: &str, key: &str) -> Response {
        let found = self
            .state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| (o.data.len(), o.etag.clone(), o.version));
        match found {
            Some((len, etag, version)) => self
                .ok(200, Bytes::new())
                .with_header(CONTENT_LENGTH, len.to_string())
                .with_header(ETAG, format!("\"{etag}\""))
                .with_header(X_AMZ_VERSION_ID, version.to_string()),
            None => self.error(404, "NotFound", ""),
        }
    }

    fn initiate(&self, bucket: &str, key: &str) -> Response {
        let upload_id = {
            let mut state = self.state();
            state.next_upload += 1;
            let id = format!("upload-{}", state.next_upload);
            state.uploads.insert(
                id.clone(),
                MockUpload {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    parts: BTreeMap::new(),
                },
            );
            id
        };
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <InitiateMultipartUploadResult><Bucket>{bucket}</Bucket><Key>{key}</Key>\
             <UploadId>{upload_id}</UploadId></InitiateMultipartUploadResult>"
        );
        self.ok(200, body)
    }

    fn upload_part(&self, request: &geos3_protocol::Request, fault: Option<&Fault>) -> Response {
        let upload_id = request.query_value(PARAM_UPLOAD_ID).unwrap_or_default();
        let Some(part_number) = request
            .query_value(PARAM_PART_NUMBER)
            .and_then(|p| p.parse::<u32>().ok())
            .filter(|n| (1..=10_000).contains(n))
        else {
            return self.error(
                400,
                "InvalidArgument",
                "Part number must be an integer between 1 and 10000",
            );
        };
        if let Some(rejected) = self.check_content_md5(request, request.body()) {
            return rejected;
        }
        let body = request.body().clone();
        let real_etag = md5(&body).to_hex();
        {
            let mut state = self.state();
            let Some(upload) = state.uploads.get_mut(upload_id) else {
                return self.error(404, "NoSuchUpload", "The specified upload does not exist.");
            };
            upload.parts.insert(part_number, (body.clone(), real_etag.clone()));
        }
        let etag = match fault {
            Some(Fault::CorruptEtag) => corrupt_etag(&body),
            _ => real_etag,
        };
        self.ok(200, Bytes::new()).with_header(ETAG, format!("\"{etag}\""))
    }

    fn complete(&self, bucket: &str, key: &str, request: &geos3_protocol::Request) -> Response {
        let upload_id = request.query_value(PARAM_UPLOAD_ID).unwrap_or_default();
        let listed = match xml::parse_complete_request(&String::from_utf8_lossy(request.body())) {
            Ok(parts) if !parts.is_empty() => parts,
            _ => {
                return self.error(
                    400,
                    "MalformedXML",
                    "The XML you provided was not well-formed.",
                );
            }
        };
        if listed.windows(2).any(|w| w[0].0 >= w[1].0) {
            return self.error(
                400,
                "InvalidPartOrder",
                "The list of parts was not in ascending order.",
            );
        }

        let mut state = self.state();
        let Some(upload) = state.uploads.get(upload_id) else {
            return self.error(404, "NoSuchUpload", "The specified upload does not exist.");
        };
        if upload.bucket != bucket || upload.key != key {
            return self.error(404, "NoSuchUpload", "The specified upload does not exist.");
        }
        let mut data = Vec::new();
        let mut digests = Vec::with_capacity(listed.len());
        for (number, etag) in &listed {
            match upload.parts.get(number) {
                Some((bytes, stored)) if stored == etag => {
                    data.extend_from_slice(bytes);
                    digests.push(md5(bytes));
                }
                _ => {
                    return self.error(
                        400,
                        "InvalidPart",
                        "One or more of the specified parts could not be found.",
                    );
                }
            }
        }
        state.uploads.remove(upload_id);
        drop(state);

        let etag = match multipart_etag(&digests) {
            Ok(etag) => etag,
            Err(e) => return self.error(500, "InternalError", &e.to_string()),
        };
        self.insert_object(bucket, key, data);
        let version = {
            let mut state = self.state();
            let entry = state.objects.get_mut(&(bucket.to_string(), key.to_string()));
            match entry {
                Some(object) => {
                    object.etag = etag.clone();
                    object.version
                }
                None => 0,
            }
        };
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <CompleteMultipartUploadResult><Location>/{bucket}/{key}</Location>\
             <Bucket>{bucket}</Bucket><Key>{key}</Key><ETag>\"{etag}\"</ETag>\
             </CompleteMultipartUploadResult>"
        );
        self.ok(200, body).with_header(X_AMZ_VERSION_ID, version.to_string())
    }

    fn abort(&self, request: &geos3_protocol::Request) -> Response {
        let upload_id = request.query_value(PARAM_UPLOAD_ID).unwrap_or_default();
        if self.state().uploads.remove(upload_id).is_some() {
            self.ok(204, Bytes::new())
        } else {
            self.error(404, "NoSuchUpload", "The specified upload does not exist.")
        }
    }

    fn list_parts(&self, request: &geos3_protocol::Request) -> Response {
        let upload_id = request.query_value(PARAM_UPLOAD_ID).unwrap_or_default();
        let marker: u32 = request
            .query_value(PARAM_PART_NUMBER_MARKER)
            .and_then(|m| m.parse().ok())
            .unwrap_or(0);
        let max_parts: usize = request
            .query_value(PARAM_MAX_PARTS)
            .and_then(|m| m.parse().ok())
            .unwrap_or(1000);

        let state = self.state();
        let Some(upload) = state.uploads.get(upload_id) else {
            return self.error(404, "NoSuchUpload", "The specified upload does not exist.");
        };
        let remaining: Vec<_> = upload.parts.range(marker.saturating_add(1)..).collect();
        let truncated = remaining.len() > max_parts;
        let page = &remaining[..remaining.len().min(max_parts)];
        let mut body = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <ListPartsResult><UploadId>{upload_id}</UploadId>\
             <IsTruncated>{truncated}</IsTruncated>"
        );
        if let Some((last, _)) = page.last() {
            body.push_str(&format!("<NextPartNumberMarker>{last}</NextPartNumberMarker>"));
        }
        for (number, (bytes, etag)) in page {
            body.push_str(&format!(
                "<Part><PartNumber>{number}</PartNumber><ETag>\"{etag}\"</ETag>\
                 <Size>{}</Size></Part>",
                bytes.len()
            ));
        }
        body.push_str("</ListPartsResult>");
        drop(state);
        self.ok(200, body)
    }
}

impl Executor for MockS3 {
    fn execute(&self, request: SignedRequest) -> BoxFuture<'_, Result<Response, TransportError>> {
        Box::pin(async move {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            self.handle(request).await
        })
    }
}

fn md5(data: &[u8]) -> ChecksumValue {
    RunningChecksum::digest(ChecksumAlgorithm::Md5, data)
}

fn corrupt_etag(data: &[u8]) -> String {
    let mut salted = data.to_vec();
    salted.extend_from_slice(b"corrupt");
    md5(&salted).to_hex()
}

/// Parses `bytes=start-[end]` into an inclusive range.
fn parse_range_header(header: &str) -> Option<(u64, Option<u64>)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        e => Some(e.parse().ok()?),
    };
    if end.is_some_and(|e| e < start) {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parsing() {
        assert_eq!(parse_range_header("bytes=0-9"), Some((0, Some(9))));
        assert_eq!(parse_range_header("bytes=5-"), Some((5, None)));
        assert_eq!(parse_range_header("bytes=9-0"), None);
        assert_eq!(parse_range_header("items=0-1"), None);
    }

    #[test]
    fn operation_classification() {
        use geos3_protocol::Request;
        let op = |r: Request| MockOperation::of(&r);
        assert_eq!(
            op(Request::for_object(Method::Post, "b", "k").with_subresource("uploads")),
            MockOperation::InitiateUpload
        );
        assert_eq!(
            op(Request::for_object(Method::Put, "b", "k")
                .with_query("partNumber", "1")
                .with_query("uploadId", "u")),
            MockOperation::UploadPart
        );
        assert_eq!(
            op(Request::for_object(Method::Get, "b", "k").with_query("uploadId", "u")),
            MockOperation::ListParts
        );
        assert_eq!(
            op(Request::for_object(Method::Get, "b", "k")),
            MockOperation::GetObject
        );
        assert_eq!(
            op(Request::for_object(Method::Put, "b", "k").with_header(RANGE, "bytes=0-9")),
            MockOperation::PutObjectRange
        );
        assert_eq!(
            op(Request::for_object(Method::Delete, "b", "k")),
            MockOperation::DeleteObject
        );
    }
}
