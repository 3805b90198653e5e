use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use geos3_protocol::{Credential, Method, Request, Response};
use geos3_signer::{Clock, RequestSigner, SystemClock, signer_for};

use crate::ClientError;
use crate::config::ClientConfig;
use crate::executor::{Executor, ReqwestExecutor};
use crate::fault::FaultInjectingExecutor;
use crate::health::{HealthView, SiteHealth};
use crate::ops::{self, ByteRange, CompleteResult, CompletedPart, ListedPart, ObjectInfo};
use crate::pipeline::{Pipeline, Stage};
use crate::retry::RetryPolicy;
use crate::router::{GeoPinningRouter, RoutingMode};
use crate::stages::{ChecksumStage, RetryStage, RoutingStage, SigningStage};

/// Geo-pinned S3 client.
///
/// Cheap to clone; all clones share one pipeline and executor.
#[derive(Clone)]
pub struct S3Client {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    pipeline: Pipeline,
    policy: RetryPolicy,
    router: GeoPinningRouter,
    health: Arc<dyn HealthView>,
    signer: Arc<dyn RequestSigner>,
    credential: Arc<Credential>,
    clock: Arc<dyn Clock>,
}

impl S3Client {
    pub fn builder(config: ClientConfig) -> S3ClientBuilder {
        S3ClientBuilder {
            config,
            credential: None,
            executor: None,
            health: None,
            clock: None,
            extra_stages: Vec::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Sends a request through the full pipeline, retries included.
    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        self.inner.pipeline.send(request).await
    }

    /// Sends a request exactly once; the caller owns retries.
    pub async fn send_once(&self, request: &Request) -> Result<Response, ClientError> {
        self.inner.pipeline.send_once(request).await
    }

    // -- Multipart ------------------------------------------------------------

    pub async fn initiate_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, ClientError> {
        let request = ops::initiate_multipart_upload(bucket, key, content_type);
        let upload_id = ops::read_initiate(self.send(&request).await?).await?;
        info!(
            bucket,
            key,
            upload_id = %upload_id,
            "multipart upload initiated"
        );
        Ok(upload_id)
    }

    /// Uploads one part with pipeline retries; returns its ETag.
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, ClientError> {
        let request = ops::upload_part(bucket, key, upload_id, part_number, body);
        ops::read_part_etag(&self.send(&request).await?)
    }

    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteResult, ClientError> {
        let request = ops::complete_multipart_upload(bucket, key, upload_id, parts);
        let result = ops::read_complete(self.send(&request).await?).await?;
        info!(
            bucket,
            key,
            upload_id,
            parts = parts.len(),
            "multipart upload completed"
        );
        Ok(result)
    }

    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), ClientError> {
        let request = ops::abort_multipart_upload(bucket, key, upload_id);
        self.send(&request).await?;
        info!(bucket, key, upload_id, "multipart upload aborted");
        Ok(())
    }

    /// Every part the server holds for an upload, following pagination.
    pub async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<ListedPart>, ClientError> {
        let mut parts = Vec::new();
        let mut marker = None;
        loop {
            let request = ops::list_parts(bucket, key, upload_id, marker);
            let page = ops::read_list_parts(self.send(&request).await?).await?;
            parts.extend(page.parts);
            match page.next_marker {
                Some(next) if page.is_truncated && Some(next) != marker => marker = Some(next),
                _ => break,
            }
        }
        debug!(bucket, key, upload_id, parts = parts.len(), "listed parts");
        Ok(parts)
    }

    // -- Objects --------------------------------------------------------------

    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo, ClientError> {
        let response = self.send(&ops::head_object(bucket, key)).await?;
        ops::read_object_info(&response)
    }

    /// Streams an object or a range of it. Whole-object reads are verified
    /// against the ETag while the body is consumed.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Response, ClientError> {
        self.send(&ops::get_object(bucket, key, range, None)).await
    }

    /// Single-request upload; returns the ETag when the server sent one.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<Option<String>, ClientError> {
        let response = self
            .send(&ops::put_object(bucket, key, body, content_type))
            .await?;
        Ok(response.etag().map(str::to_string))
    }

    /// Deletes an object. Deleting a missing key succeeds.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
        self.send(&ops::delete_object(bucket, key)).await?;
        info!(bucket, key, "object deleted");
        Ok(())
    }

    /// A query-string authenticated URL on the object's pinned site.
    pub fn presigned_url(
        &self,
        method: Method,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, ClientError> {
        let request = Request::for_object(method, bucket, key);
        let route = self
            .inner
            .router
            .route(request.geo_id(), &self.inner.health.candidates())?;
        let timestamp = self.inner.clock.now()?;
        Ok(self.inner.signer.presign(
            &request,
            &route.endpoint,
            &self.inner.credential,
            timestamp,
            expires_in,
        )?)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct S3ClientBuilder {
    config: ClientConfig,
    credential: Option<Credential>,
    executor: Option<Arc<dyn Executor>>,
    health: Option<Arc<dyn HealthView>>,
    clock: Option<Arc<dyn Clock>>,
    extra_stages: Vec<Arc<dyn Stage>>,
}

impl S3ClientBuilder {
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Replaces the HTTP executor, e.g. with an in-memory store.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn health(mut self, health: Arc<dyn HealthView>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Adds a custom stage between routing and checksumming.
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.extra_stages.push(Arc::new(stage));
        self
    }

    pub fn build(self) -> Result<S3Client, ClientError> {
        let config = self.config;
        config.validate()?;
        let credential = Arc::new(
            self.credential
                .ok_or_else(|| ClientError::Config("no credential configured".into()))?,
        );

        let mut executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ReqwestExecutor::new(
                config.connect_timeout(),
                config.read_timeout(),
            )?),
        };
        if let Some(rate) = config.fault_injection_rate {
            executor = Arc::new(FaultInjectingExecutor::with_rate(executor, rate));
        }

        let health = self
            .health
            .unwrap_or_else(|| Arc::new(SiteHealth::from_config(&config.sites)));
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::with_skew(config.clock_skew())));
        let signer = signer_for(
            config.signature_version,
            &config.region,
            &config.service,
            config.unsigned_payload,
        );
        let router = GeoPinningRouter::new(if config.geo_pinning {
            RoutingMode::GeoPinned
        } else {
            RoutingMode::Ordered
        });
        let policy = RetryPolicy::new(config.retry.clone());

        let mut pipeline = Pipeline::builder(executor)
            .stage(RetryStage::new(policy.clone()))
            .stage(RoutingStage::new(router, health.clone()));
        for stage in self.extra_stages {
            pipeline = pipeline.shared_stage(stage);
        }
        let pipeline = pipeline
            .stage(ChecksumStage::new(config.checksum.clone()))
            .stage(SigningStage::new(
                signer.clone(),
                credential.clone(),
                clock.clone(),
            ))
            .build();

        debug!(
            sites = config.sites.len(),
            version = ?config.signature_version,
            stages = ?pipeline.stage_names(),
            "S3 client ready"
        );
        Ok(S3Client {
            inner: Arc::new(Inner {
                config,
                pipeline,
                policy,
                router,
                health,
                signer,
                credential,
                clock,
            }),
        })
    }
}
