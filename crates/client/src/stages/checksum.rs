use futures_util::StreamExt;
use tracing::warn;

use geos3_checksum::{
    ChecksumAlgorithm, ChecksumValue, ChecksummedStream, RunningChecksum, md5_from_etag,
};
use geos3_protocol::constants::{CONTENT_MD5, RANGE, X_EMC_CONTENT_MD5};
use geos3_protocol::{Method, Request, Response};

use crate::ClientError;
use crate::config::ChecksumConfig;
use crate::pipeline::{Directives, Next, Stage, StageFuture};

/// Content-MD5 generation and write/read verification.
#[derive(Debug, Clone, Default)]
pub struct ChecksumStage {
    config: ChecksumConfig,
}

impl ChecksumStage {
    pub fn new(config: ChecksumConfig) -> Self {
        Self { config }
    }
}

/// The MD5 the server reports for the stored content, if any.
///
/// An explicit `x-emc-content-md5` wins over the ETag, which is only an
/// MD5 for single-part objects.
pub fn remote_md5(response: &Response) -> Option<ChecksumValue> {
    if let Some(value) = response.header(X_EMC_CONTENT_MD5) {
        let value = value.trim();
        return ChecksumValue::from_hex(ChecksumAlgorithm::Md5, value)
            .or_else(|_| ChecksumValue::from_base64(ChecksumAlgorithm::Md5, value))
            .ok();
    }
    response.etag().and_then(md5_from_etag)
}

impl Stage for ChecksumStage {
    fn name(&self) -> &'static str {
        "checksum"
    }

    fn handle<'a>(
        &'a self,
        request: &'a Request,
        mut directives: Directives,
        next: Next<'a>,
    ) -> StageFuture<'a> {
        Box::pin(async move {
            let config = &self.config;
            let sent_md5 = if !request.body().is_empty()
                && (config.generate_content_md5 || config.verify_write)
            {
                let md5 = RunningChecksum::digest(ChecksumAlgorithm::Md5, request.body());
                if config.generate_content_md5 && request.header(CONTENT_MD5).is_none() {
                    directives.headers.insert(CONTENT_MD5.into(), md5.to_base64());
                }
                Some(md5)
            } else {
                None
            };

            let response = next.run(request, directives).await?;

            // The ETag of a ranged write describes the whole object.
            let ranged = request.header(RANGE).is_some();
            if config.verify_write
                && !ranged
                && let Some(sent) = sent_md5
                && let Some(stored) = remote_md5(&response)
                && sent != stored
            {
                warn!(
                    path = %request.path(),
                    sent = %sent.to_hex(),
                    stored = %stored.to_hex(),
                    "stored content does not match what was sent"
                );
                return Err(ClientError::ChecksumMismatch {
                    expected: sent.to_string(),
                    actual: stored.to_string(),
                });
            }

            let whole_object =
                request.method() == Method::Get && response.status() == 200 && !ranged;
            if config.verify_read
                && whole_object
                && let Some(expected) = remote_md5(&response)
            {
                return Ok(response
                    .map_body(|body| ChecksummedStream::verifying(body, expected).boxed()));
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use futures_util::future::BoxFuture;
    use geos3_protocol::constants::ETAG;
    use geos3_protocol::{SignedRequest, TransportError};

    use crate::executor::Executor;
    use crate::pipeline::Pipeline;
    use crate::router::Route;

    struct Fixed {
        etag: Option<String>,
        body: &'static [u8],
        seen: Mutex<Vec<SignedRequest>>,
    }

    impl Fixed {
        fn new(etag: Option<String>, body: &'static [u8]) -> Arc<Self> {
            Arc::new(Self {
                etag,
                body,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Executor for Fixed {
        fn execute(
            &self,
            request: SignedRequest,
        ) -> BoxFuture<'_, Result<Response, TransportError>> {
            self.seen.lock().unwrap().push(request);
            let mut response = Response::from_bytes(200, self.body);
            if let Some(etag) = &self.etag {
                response = response.with_header(ETAG, format!("\"{etag}\""));
            }
            Box::pin(async move { Ok(response) })
        }
    }

    struct Routed;

    impl Stage for Routed {
        fn name(&self) -> &'static str {
            "route"
        }

        fn handle<'a>(
            &'a self,
            request: &'a Request,
            directives: Directives,
            next: Next<'a>,
        ) -> StageFuture<'a> {
            let route = Route {
                site: "s".into(),
                endpoint: "http://s:9020".parse().unwrap(),
                index: 0,
                primary: 0,
            };
            next.run(
                request,
                Directives {
                    route: Some(route),
                    ..directives
                },
            )
        }
    }

    fn md5_hex(data: &[u8]) -> String {
        RunningChecksum::digest(ChecksumAlgorithm::Md5, data).to_hex()
    }

    fn pipeline(executor: Arc<Fixed>) -> Pipeline {
        Pipeline::builder(executor)
            .stage(Routed)
            .stage(ChecksumStage::default())
            .build()
    }

    #[tokio::test]
    async fn adds_content_md5_and_accepts_matching_etag() {
        let executor = Fixed::new(Some(md5_hex(b"hello")), b"");
        let request = Request::for_object(Method::Put, "b", "k").with_body(&b"hello"[..]);
        pipeline(executor.clone()).send(&request).await.unwrap();

        let seen = executor.seen.lock().unwrap();
        assert_eq!(
            seen[0].request().header(CONTENT_MD5),
            Some("XUFAKrxLKna5cZ2REBfFkg==")
        );
    }

    #[tokio::test]
    async fn mismatched_etag_is_rejected() {
        let executor = Fixed::new(Some(md5_hex(b"other")), b"");
        let request = Request::for_object(Method::Put, "b", "k").with_body(&b"hello"[..]);
        let err = pipeline(executor).send(&request).await.unwrap_err();
        assert!(matches!(err, ClientError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn multipart_etag_is_not_compared() {
        let executor = Fixed::new(Some(format!("{}-3", md5_hex(b"x"))), b"");
        let request = Request::for_object(Method::Put, "b", "k").with_body(&b"hello"[..]);
        assert!(pipeline(executor).send(&request).await.is_ok());
    }

    #[tokio::test]
    async fn emc_header_wins_over_etag() {
        let response = Response::empty(200)
            .with_header(ETAG, format!("\"{}\"", md5_hex(b"a")))
            .with_header(X_EMC_CONTENT_MD5, md5_hex(b"b"));
        assert_eq!(remote_md5(&response).unwrap().to_hex(), md5_hex(b"b"));
    }

    #[tokio::test]
    async fn whole_object_read_is_verified() {
        let executor = Fixed::new(Some(md5_hex(b"expected")), b"corrupted");
        let request = Request::for_object(Method::Get, "b", "k");
        let response = pipeline(executor).send(&request).await.unwrap();
        let err = response.collect().await.unwrap_err();
        assert!(matches!(err, TransportError::Integrity(_)));

        let executor = Fixed::new(Some(md5_hex(b"expected")), b"expected");
        let response = pipeline(executor).send(&request).await.unwrap();
        assert_eq!(&response.collect().await.unwrap()[..], b"expected");
    }

    #[tokio::test]
    async fn ranged_write_is_not_compared_with_object_etag() {
        let executor = Fixed::new(Some(md5_hex(b"whole object")), b"");
        let request = Request::for_object(Method::Put, "b", "k")
            .with_header(RANGE, "bytes=0-4")
            .with_body(&b"hello"[..]);
        pipeline(executor.clone()).send(&request).await.unwrap();
        let seen = executor.seen.lock().unwrap();
        assert!(seen[0].request().header(CONTENT_MD5).is_some());
    }

    #[tokio::test]
    async fn ranged_read_is_not_verified() {
        let executor = Fixed::new(Some(md5_hex(b"expected")), b"part");
        let request = Request::for_object(Method::Get, "b", "k").with_header(RANGE, "bytes=0-3");
        let response = pipeline(executor).send(&request).await.unwrap();
        assert_eq!(&response.collect().await.unwrap()[..], b"part");
    }
}
