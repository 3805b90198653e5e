//! Resumable multipart upload.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use geos3_checksum::etag::parse_multipart_etag;
use geos3_checksum::{
    ChecksumAlgorithm, ChecksumValue, ChecksummedReader, md5_from_etag, multipart_etag,
};
use geos3_client::ops::{self, CompletedPart};
use geos3_client::{ClientError, S3Client, TransferConfig};

use crate::TransferError;
use crate::engine::{EVENT_CHANNEL_CAPACITY, PartWorker, Pool, PoolOutcome, Stop, emit};
use crate::events::{TransferEvent, TransferResult, TransferSummary};
use crate::handle::{Layout, Shared, TransferHandle};
use crate::plan::{PartPlan, PartRange};
use crate::progress::Progress;
use crate::resume::{ResumeContext, TransferKind};
use crate::session::SessionStatus;
use crate::source::PartSource;
use crate::state::{PartArena, PartStatus, VerifiedPart};
use crate::verify::{check_expected, whole_object_checksum};

/// Uploads a [`PartSource`] as one multipart object.
///
/// ```ignore
/// let mut upload = MultipartUpload::new(client, "bucket", "key", MemorySource::new(data));
/// let mut events = upload.take_events().unwrap();
/// let handle = upload.handle();
/// let result = upload.run().await;
/// ```
pub struct MultipartUpload {
    client: S3Client,
    source: Arc<dyn PartSource>,
    config: TransferConfig,
    content_type: Option<String>,
    expected_checksum: Option<ChecksumValue>,
    resume: Option<ResumeContext>,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
}

impl MultipartUpload {
    pub fn new(
        client: S3Client,
        bucket: impl Into<String>,
        key: impl Into<String>,
        source: impl PartSource,
    ) -> Self {
        let shared = Shared::new(
            Uuid::new_v4().to_string(),
            TransferKind::Upload,
            bucket.into(),
            key.into(),
            SessionStatus::Initializing,
        );
        Self::with_shared(client, Arc::new(source), shared, None)
    }

    /// Continues a saved upload session against the same source.
    pub fn resume(
        client: S3Client,
        source: impl PartSource,
        context: ResumeContext,
    ) -> Result<Self, TransferError> {
        context.validate()?;
        if context.kind != TransferKind::Upload {
            return Err(TransferError::InvalidResume("not an upload session".into()));
        }
        let shared = Shared::new(
            context.session_id.clone(),
            TransferKind::Upload,
            context.bucket.clone(),
            context.key.clone(),
            context.status,
        );
        if context.status != SessionStatus::Initializing {
            shared.status.transition(SessionStatus::Initializing)?;
        }
        Ok(Self::with_shared(client, Arc::new(source), shared, Some(context)))
    }

    fn with_shared(
        client: S3Client,
        source: Arc<dyn PartSource>,
        shared: Arc<Shared>,
        resume: Option<ResumeContext>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config: client.config().transfer.clone(),
            client,
            source,
            content_type: None,
            expected_checksum: None,
            resume,
            shared,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Fails the upload unless the whole object digests to `expected`.
    pub fn with_expected_checksum(mut self, expected: ChecksumValue) -> Self {
        self.expected_checksum = Some(expected);
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    pub fn handle(&self) -> TransferHandle {
        TransferHandle::new(Arc::clone(&self.shared))
    }

    fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.expected_checksum
            .as_ref()
            .map(ChecksumValue::algorithm)
            .or(self.config.whole_object_checksum)
    }

    /// Runs the upload to a terminal state.
    pub async fn run(self) -> TransferResult {
        let outcome = self.execute().await;
        let shared = &self.shared;
        match outcome {
            Ok(summary) => {
                shared.settle(SessionStatus::Completed);
                info!(
                    session = %shared.session_id,
                    bucket = %shared.bucket,
                    key = %shared.key,
                    size = summary.size,
                    parts = summary.part_count,
                    "upload completed"
                );
                emit(
                    &self.events_tx,
                    TransferEvent::Completed {
                        etag: summary.etag.clone(),
                    },
                );
                TransferResult::Completed(summary)
            }
            Err(Stop::Aborted) => {
                let cleanup_error = self.cleanup().await;
                shared.settle(SessionStatus::Aborted);
                emit(&self.events_tx, TransferEvent::Aborted);
                TransferResult::Aborted { cleanup_error }
            }
            Err(Stop::Failed(error)) => {
                error!(
                    session = %shared.session_id,
                    error = %error,
                    "upload failed"
                );
                let cleanup_error = match error {
                    TransferError::UploadNotLive(_) => None,
                    _ => self.cleanup().await,
                };
                shared.settle(SessionStatus::Failed);
                emit(
                    &self.events_tx,
                    TransferEvent::Failed {
                        error: error.to_string(),
                    },
                );
                TransferResult::Failed {
                    error,
                    cleanup_error,
                }
            }
        }
    }

    async fn execute(&self) -> Result<TransferSummary, Stop> {
        if self.shared.cancel.is_cancelled() {
            return Err(Stop::Aborted);
        }
        let (plan, arena, upload_id, resumed) = match &self.resume {
            Some(context) => self.restore(context).await?,
            None => self.initiate().await?,
        };
        let _ = self.shared.layout.set(Layout {
            plan,
            arena: Arc::clone(&arena),
            upload_id: Some(upload_id.clone()),
            object_etag: None,
            checksum_algorithm: self.checksum_algorithm(),
        });
        if self.shared.cancel.is_cancelled() {
            return Err(Stop::Aborted);
        }

        self.shared.status.transition(SessionStatus::InProgress)?;
        emit(
            &self.events_tx,
            TransferEvent::Started {
                session_id: self.shared.session_id.clone(),
                total_bytes: plan.total_size(),
                part_count: plan.part_count(),
                resumed,
            },
        );

        let pool = Pool {
            worker: UploadWorker {
                client: self.client.clone(),
                source: Arc::clone(&self.source),
                bucket: self.shared.bucket.clone(),
                key: self.shared.key.clone(),
                upload_id: upload_id.clone(),
            },
            arena: Arc::clone(&arena),
            policy: self.client.retry_policy().clone(),
            concurrency: self.config.upload_concurrency,
            cancel: self.shared.cancel.clone(),
            events: self.events_tx.clone(),
            progress: Arc::new(Progress::new(plan.total_size(), arena.verified_bytes())),
        };
        match pool.run().await {
            PoolOutcome::AllVerified => {}
            PoolOutcome::Aborted => return Err(Stop::Aborted),
            PoolOutcome::Failed(error) => return Err(Stop::Failed(error)),
        }

        self.shared.status.transition(SessionStatus::Finalizing)?;
        emit(&self.events_tx, TransferEvent::Finalizing);
        Ok(self.finalize(plan, &arena, &upload_id).await?)
    }

    async fn initiate(&self) -> Result<(PartPlan, Arc<PartArena>, String, bool), Stop> {
        let plan = PartPlan::for_upload(
            self.source.len(),
            self.config.part_size,
            self.config.min_part_size,
        )?;
        let upload_id = self
            .client
            .initiate_multipart_upload(
                &self.shared.bucket,
                &self.shared.key,
                self.content_type.as_deref(),
            )
            .await?;
        debug!(
            session = %self.shared.session_id,
            upload_id = %upload_id,
            parts = plan.part_count(),
            part_size = plan.part_size(),
            "upload planned"
        );
        Ok((plan, Arc::new(PartArena::eager(plan)), upload_id, false))
    }

    /// Rebuilds the part table from a saved session and checks it against
    /// what the server still holds.
    async fn restore(
        &self,
        context: &ResumeContext,
    ) -> Result<(PartPlan, Arc<PartArena>, String, bool), Stop> {
        if context.total_size != self.source.len() {
            return Err(TransferError::SourceChanged(format!(
                "source is {} bytes, session recorded {}",
                self.source.len(),
                context.total_size
            ))
            .into());
        }
        let upload_id = context
            .upload_id
            .clone()
            .ok_or_else(|| TransferError::InvalidResume("upload id is missing".into()))?;
        let listed = match self
            .client
            .list_parts(&self.shared.bucket, &self.shared.key, &upload_id)
            .await
        {
            Ok(listed) => listed,
            Err(e) if e.code() == Some("NoSuchUpload") => {
                return Err(TransferError::UploadNotLive(upload_id).into());
            }
            Err(e) => return Err(e.into()),
        };

        let plan = context.plan()?;
        let arena = Arc::new(PartArena::restore(plan, context.parts.clone(), false)?);
        let listed: HashMap<u32, &str> = listed
            .iter()
            .map(|p| (p.part_number, p.etag.as_str()))
            .collect();
        for part in arena.snapshot() {
            if part.status != PartStatus::Verified {
                continue;
            }
            let held = listed.get(&part.number).copied();
            let intact = part.md5.is_some()
                && part.crc32.is_some()
                && (!self.config.verify_resumed_parts
                    || held.is_some_and(|etag| Some(etag) == part.etag.as_deref()));
            if !intact {
                warn!(
                    part = part.number,
                    listed = ?held,
                    "resumed part re-enqueued"
                );
                arena.requeue(part.number);
            }
        }
        info!(
            session = %self.shared.session_id,
            upload_id = %upload_id,
            verified = arena.verified_count(),
            parts = plan.part_count(),
            "upload resumed"
        );
        Ok((plan, arena, upload_id, true))
    }

    async fn finalize(
        &self,
        plan: PartPlan,
        arena: &PartArena,
        upload_id: &str,
    ) -> Result<TransferSummary, TransferError> {
        let parts = arena.snapshot();
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|p| CompletedPart {
                part_number: p.number,
                etag: p.etag.clone().unwrap_or_default(),
            })
            .collect();
        let result = self
            .client
            .complete_multipart_upload(&self.shared.bucket, &self.shared.key, upload_id, &completed)
            .await?;

        if let Some(etag) = result.etag.as_deref()
            && parse_multipart_etag(etag).is_some()
        {
            let md5s: Vec<ChecksumValue> = parts.iter().filter_map(|p| p.md5.clone()).collect();
            let local = multipart_etag(&md5s).map_err(ClientError::from)?;
            if !etag.eq_ignore_ascii_case(&local) {
                return Err(TransferError::ContentVerificationFailed {
                    part_number: None,
                    expected: local,
                    actual: etag.to_string(),
                });
            }
        }

        let checksum = match self.checksum_algorithm() {
            Some(algorithm) => Some(
                whole_object_checksum(algorithm, &parts, || {
                    self.source.open_range(0, plan.total_size())
                })
                .await?,
            ),
            None => None,
        };
        check_expected(self.expected_checksum.as_ref(), checksum.as_ref())?;

        Ok(TransferSummary {
            session_id: self.shared.session_id.clone(),
            bucket: self.shared.bucket.clone(),
            key: self.shared.key.clone(),
            upload_id: Some(upload_id.to_string()),
            etag: result.etag,
            version_id: result.version_id,
            size: plan.total_size(),
            part_count: plan.part_count(),
            checksum,
        })
    }

    /// Releases the server-side upload. Called at most once per run.
    async fn cleanup(&self) -> Option<ClientError> {
        let upload_id = self.shared.upload_id()?;
        match self
            .client
            .abort_multipart_upload(&self.shared.bucket, &self.shared.key, upload_id)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                error!(
                    session = %self.shared.session_id,
                    upload_id,
                    error = %e,
                    "multipart upload cleanup failed"
                );
                Some(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Part worker
// ---------------------------------------------------------------------------

struct UploadWorker {
    client: S3Client,
    source: Arc<dyn PartSource>,
    bucket: String,
    key: String,
    upload_id: String,
}

impl UploadWorker {
    async fn upload(&self, range: PartRange) -> Result<VerifiedPart, TransferError> {
        let reader = self.source.open_range(range.start, range.len()).await?;
        let mut reader = ChecksummedReader::new(
            ChecksummedReader::new(reader, ChecksumAlgorithm::Md5),
            ChecksumAlgorithm::Crc32,
        );
        let mut body = Vec::with_capacity(range.len() as usize);
        reader.read_to_end(&mut body).await?;
        if body.len() as u64 != range.len() {
            return Err(TransferError::SourceChanged(format!(
                "part {} read {} bytes, expected {}",
                range.number,
                body.len(),
                range.len()
            )));
        }
        let (inner, crc32) = reader.into_parts();
        let (_, md5) = inner.into_parts();
        let md5 = md5.finalize();

        let request = ops::upload_part(
            &self.bucket,
            &self.key,
            &self.upload_id,
            range.number,
            Bytes::from(body),
        );
        let response = self.client.send_once(&request).await?;
        let etag = ops::read_part_etag(&response)?;
        if let Some(stored) = md5_from_etag(&etag)
            && stored != md5
        {
            return Err(ClientError::ChecksumMismatch {
                expected: md5.to_string(),
                actual: stored.to_string(),
            }
            .into());
        }
        Ok(VerifiedPart {
            md5,
            crc32: crc32.finalize(),
            etag: Some(etag),
        })
    }
}

impl PartWorker for UploadWorker {
    fn transfer(&self, range: PartRange) -> BoxFuture<'_, Result<VerifiedPart, TransferError>> {
        Box::pin(self.upload(range))
    }
}
