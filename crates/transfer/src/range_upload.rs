//! Upload by parallel ranged writes into one object.
//!
//! The object is created empty first, then every part is written in place
//! with a `Range` PUT. No multipart session exists on the server, so a
//! failed or aborted run deletes the partial object instead.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use geos3_checksum::{
    ChecksumAlgorithm, ChecksumValue, ChecksummedReader, RunningChecksum, digest_reader,
    md5_from_etag,
};
use geos3_client::ops;
use geos3_client::{ClientError, S3Client, TransferConfig};

use crate::TransferError;
use crate::engine::{EVENT_CHANNEL_CAPACITY, PartWorker, Pool, PoolOutcome, Stop, emit};
use crate::events::{TransferEvent, TransferResult, TransferSummary};
use crate::handle::{Layout, Shared, TransferHandle};
use crate::plan::{PartPlan, PartRange};
use crate::progress::Progress;
use crate::resume::TransferKind;
use crate::session::SessionStatus;
use crate::source::PartSource;
use crate::state::{PartArena, VerifiedPart};
use crate::verify::{check_expected, whole_object_checksum};

/// Uploads a [`PartSource`] with ranged PUTs against one object.
pub struct ByteRangeUpload {
    client: S3Client,
    source: Arc<dyn PartSource>,
    config: TransferConfig,
    content_type: Option<String>,
    expected_checksum: Option<ChecksumValue>,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
}

impl ByteRangeUpload {
    pub fn new(
        client: S3Client,
        bucket: impl Into<String>,
        key: impl Into<String>,
        source: impl PartSource,
    ) -> Self {
        let shared = Shared::new(
            Uuid::new_v4().to_string(),
            TransferKind::RangeUpload,
            bucket.into(),
            key.into(),
            SessionStatus::Initializing,
        );
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config: client.config().transfer.clone(),
            client,
            source: Arc::new(source),
            content_type: None,
            expected_checksum: None,
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
                    "byte-range upload completed"
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
                    "byte-range upload failed"
                );
                let cleanup_error = self.cleanup().await;
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
        let plan = PartPlan::for_upload(
            self.source.len(),
            self.config.part_size,
            self.config.min_part_size,
        )?;
        self.client
            .put_object(
                &self.shared.bucket,
                &self.shared.key,
                Bytes::new(),
                self.content_type.as_deref(),
            )
            .await?;
        debug!(
            session = %self.shared.session_id,
            parts = plan.part_count(),
            part_size = plan.part_size(),
            "empty object created for ranged writes"
        );

        let arena = Arc::new(PartArena::eager(plan));
        let _ = self.shared.layout.set(Layout {
            plan,
            arena: Arc::clone(&arena),
            upload_id: None,
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
                resumed: false,
            },
        );

        let pool = Pool {
            worker: RangeWorker {
                client: self.client.clone(),
                source: Arc::clone(&self.source),
                bucket: self.shared.bucket.clone(),
                key: self.shared.key.clone(),
            },
            arena: Arc::clone(&arena),
            policy: self.client.retry_policy().clone(),
            concurrency: self.config.upload_concurrency,
            cancel: self.shared.cancel.clone(),
            events: self.events_tx.clone(),
            progress: Arc::new(Progress::new(plan.total_size(), 0)),
        };
        match pool.run().await {
            PoolOutcome::AllVerified => {}
            PoolOutcome::Aborted => return Err(Stop::Aborted),
            PoolOutcome::Failed(error) => return Err(Stop::Failed(error)),
        }

        self.shared.status.transition(SessionStatus::Finalizing)?;
        emit(&self.events_tx, TransferEvent::Finalizing);
        Ok(self.finalize(plan, &arena).await?)
    }

    /// Checks the assembled object: its size always, its content when the
    /// server reports a plain MD5 ETag.
    async fn finalize(
        &self,
        plan: PartPlan,
        arena: &PartArena,
    ) -> Result<TransferSummary, TransferError> {
        let info = self
            .client
            .head_object(&self.shared.bucket, &self.shared.key)
            .await?;
        if info.content_length != plan.total_size() {
            return Err(TransferError::ContentVerificationFailed {
                part_number: None,
                expected: format!("{} bytes", plan.total_size()),
                actual: format!("{} bytes", info.content_length),
            });
        }
        if let Some(stored) = info.etag.as_deref().and_then(md5_from_etag) {
            let reader = self.source.open_range(0, plan.total_size()).await?;
            let local = digest_reader(reader, ChecksumAlgorithm::Md5).await?;
            if local != stored {
                return Err(TransferError::ContentVerificationFailed {
                    part_number: None,
                    expected: local.to_string(),
                    actual: stored.to_string(),
                });
            }
        }

        let parts = arena.snapshot();
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
            upload_id: None,
            etag: info.etag,
            version_id: info.version_id,
            size: plan.total_size(),
            part_count: plan.part_count(),
            checksum,
        })
    }

    /// Deletes the partial object once it exists. Called at most once per run.
    async fn cleanup(&self) -> Option<ClientError> {
        self.shared.layout.get()?;
        match self
            .client
            .delete_object(&self.shared.bucket, &self.shared.key)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                error!(
                    session = %self.shared.session_id,
                    error = %e,
                    "partial object cleanup failed"
                );
                Some(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Part worker
// ---------------------------------------------------------------------------

struct RangeWorker {
    client: S3Client,
    source: Arc<dyn PartSource>,
    bucket: String,
    key: String,
}

impl RangeWorker {
    /// Writes one range; the server checks it against the sent `Content-MD5`.
    async fn put_range(&self, range: PartRange) -> Result<VerifiedPart, TransferError> {
        if range.is_empty() {
            return Ok(VerifiedPart {
                md5: RunningChecksum::digest(ChecksumAlgorithm::Md5, &[]),
                crc32: RunningChecksum::digest(ChecksumAlgorithm::Crc32, &[]),
                etag: None,
            });
        }
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

        let request = ops::put_object_range(
            &self.bucket,
            &self.key,
            range.byte_range(),
            Bytes::from(body),
            &md5.to_base64(),
        );
        self.client.send_once(&request).await?;
        Ok(VerifiedPart {
            md5,
            crc32: crc32.finalize(),
            etag: None,
        })
    }
}

impl PartWorker for RangeWorker {
    fn transfer(&self, range: PartRange) -> BoxFuture<'_, Result<VerifiedPart, TransferError>> {
        Box::pin(self.put_range(range))
    }
}
