//! Resumable ranged download into a local file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use geos3_checksum::{
    ChecksumAlgorithm, ChecksumValue, ChecksummedWriter, RunningChecksum, digest_reader,
    md5_from_etag,
};
use geos3_client::ops::{self, ObjectInfo};
use geos3_client::{ClientError, S3Client, TransferConfig};
use geos3_protocol::TransportError;
use geos3_protocol::constants::CONTENT_MD5;

use crate::TransferError;
use crate::engine::{EVENT_CHANNEL_CAPACITY, PartWorker, Pool, PoolOutcome, Stop, emit};
use crate::events::{TransferEvent, TransferResult, TransferSummary};
use crate::handle::{Layout, Shared, TransferHandle};
use crate::plan::{PartPlan, PartRange};
use crate::progress::Progress;
use crate::resume::{ResumeContext, TransferKind};
use crate::session::SessionStatus;
use crate::source::RangeReader;
use crate::state::{PartArena, PartStatus, VerifiedPart};
use crate::verify::{check_expected, whole_object_checksum};

/// Downloads an object in parallel ranged GETs.
///
/// Every range is pinned to the ETag seen by the initial HEAD, so an
/// overwrite mid-download fails the affected parts instead of mixing
/// versions. Aborted and failed downloads keep their partial file.
pub struct MultipartDownload {
    client: S3Client,
    destination: PathBuf,
    config: TransferConfig,
    expected_checksum: Option<ChecksumValue>,
    resume: Option<ResumeContext>,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
}

impl MultipartDownload {
    pub fn new(
        client: S3Client,
        bucket: impl Into<String>,
        key: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        let shared = Shared::new(
            Uuid::new_v4().to_string(),
            TransferKind::Download,
            bucket.into(),
            key.into(),
            SessionStatus::Initializing,
        );
        Self::with_shared(client, destination.into(), shared, None)
    }

    /// Continues a saved download session into the same destination.
    pub fn resume(
        client: S3Client,
        destination: impl Into<PathBuf>,
        context: ResumeContext,
    ) -> Result<Self, TransferError> {
        context.validate()?;
        if context.kind != TransferKind::Download {
            return Err(TransferError::InvalidResume("not a download session".into()));
        }
        let shared = Shared::new(
            context.session_id.clone(),
            TransferKind::Download,
            context.bucket.clone(),
            context.key.clone(),
            context.status,
        );
        if context.status != SessionStatus::Initializing {
            shared.status.transition(SessionStatus::Initializing)?;
        }
        Ok(Self::with_shared(client, destination.into(), shared, Some(context)))
    }

    fn with_shared(
        client: S3Client,
        destination: PathBuf,
        shared: Arc<Shared>,
        resume: Option<ResumeContext>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config: client.config().transfer.clone(),
            client,
            destination,
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

    /// Fails the download unless the object digests to `expected`.
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

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.expected_checksum
            .as_ref()
            .map(ChecksumValue::algorithm)
            .or(self.config.whole_object_checksum)
    }

    /// Runs the download to a terminal state.
    pub async fn run(self) -> TransferResult {
        let shared = &self.shared;
        match self.execute().await {
            Ok(summary) => {
                shared.settle(SessionStatus::Completed);
                info!(
                    session = %shared.session_id,
                    bucket = %shared.bucket,
                    key = %shared.key,
                    size = summary.size,
                    path = %self.destination.display(),
                    "download completed"
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
                info!(
                    session = %shared.session_id,
                    "download aborted, partial file kept"
                );
                shared.settle(SessionStatus::Aborted);
                emit(&self.events_tx, TransferEvent::Aborted);
                TransferResult::Aborted {
                    cleanup_error: None,
                }
            }
            Err(Stop::Failed(error)) => {
                error!(
                    session = %shared.session_id,
                    error = %error,
                    "download failed"
                );
                shared.settle(SessionStatus::Failed);
                emit(
                    &self.events_tx,
                    TransferEvent::Failed {
                        error: error.to_string(),
                    },
                );
                TransferResult::Failed {
                    error,
                    cleanup_error: None,
                }
            }
        }
    }

    async fn execute(&self) -> Result<TransferSummary, Stop> {
        if self.shared.cancel.is_cancelled() {
            return Err(Stop::Aborted);
        }
        let info = self
            .client
            .head_object(&self.shared.bucket, &self.shared.key)
            .await?;
        let (plan, arena, resumed) = match &self.resume {
            Some(context) => self.restore(context, &info).await?,
            None => {
                let plan =
                    PartPlan::for_download(info.content_length, self.config.download_part_size)?;
                presize(&self.destination, plan.total_size()).await?;
                (plan, Arc::new(PartArena::lazy(plan)), false)
            }
        };
        debug!(
            session = %self.shared.session_id,
            size = plan.total_size(),
            parts = plan.part_count(),
            etag = ?info.etag,
            "download planned"
        );
        let _ = self.shared.layout.set(Layout {
            plan,
            arena: Arc::clone(&arena),
            upload_id: None,
            object_etag: info.etag.clone(),
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
            worker: DownloadWorker {
                client: self.client.clone(),
                bucket: self.shared.bucket.clone(),
                key: self.shared.key.clone(),
                etag: info.etag.clone(),
                destination: self.destination.clone(),
            },
            arena: Arc::clone(&arena),
            policy: self.client.retry_policy().clone(),
            concurrency: self.config.download_concurrency,
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
        Ok(self.finalize(plan, &arena, &info).await?)
    }

    async fn restore(
        &self,
        context: &ResumeContext,
        info: &ObjectInfo,
    ) -> Result<(PartPlan, Arc<PartArena>, bool), Stop> {
        if context.total_size != info.content_length || context.object_etag != info.etag {
            return Err(TransferError::SourceChanged(format!(
                "object is now {} bytes with ETag {:?}, session recorded {} bytes with ETag {:?}",
                info.content_length, info.etag, context.total_size, context.object_etag
            ))
            .into());
        }
        let plan = context.plan()?;
        let arena = Arc::new(PartArena::restore(plan, context.parts.clone(), true)?);

        let usable = match tokio::fs::metadata(&self.destination).await {
            Ok(meta) => meta.len() == plan.total_size(),
            Err(_) => false,
        };
        if !usable {
            warn!(
                path = %self.destination.display(),
                "destination missing or resized, downloading every part again"
            );
            presize(&self.destination, plan.total_size()).await?;
            arena.requeue_all();
        } else if self.config.verify_resumed_parts {
            for part in arena.snapshot() {
                if part.status != PartStatus::Verified {
                    continue;
                }
                let mut file = File::open(&self.destination).await?;
                file.seek(SeekFrom::Start(part.start)).await?;
                let on_disk = digest_reader(file.take(part.len()), ChecksumAlgorithm::Md5).await?;
                if part.md5.as_ref() != Some(&on_disk) {
                    warn!(
                        part = part.number,
                        "resumed part differs on disk, re-enqueued"
                    );
                    arena.requeue(part.number);
                }
            }
        }
        info!(
            session = %self.shared.session_id,
            verified = arena.verified_count(),
            parts = plan.part_count(),
            "download resumed"
        );
        Ok((plan, arena, true))
    }

    async fn finalize(
        &self,
        plan: PartPlan,
        arena: &PartArena,
        info: &ObjectInfo,
    ) -> Result<TransferSummary, TransferError> {
        OpenOptions::new()
            .write(true)
            .open(&self.destination)
            .await?
            .sync_all()
            .await?;

        if self.client.config().checksum.verify_read
            && let Some(expected) = info.etag.as_deref().and_then(md5_from_etag)
        {
            let actual =
                digest_reader(File::open(&self.destination).await?, ChecksumAlgorithm::Md5).await?;
            if actual != expected {
                return Err(TransferError::ContentVerificationFailed {
                    part_number: None,
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        let parts = arena.snapshot();
        let checksum = match self.checksum_algorithm() {
            Some(algorithm) => Some(
                whole_object_checksum(algorithm, &parts, || async {
                    let file = File::open(&self.destination).await?;
                    Ok::<RangeReader, std::io::Error>(Box::new(file))
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
            etag: info.etag.clone(),
            version_id: info.version_id.clone(),
            size: plan.total_size(),
            part_count: plan.part_count(),
            checksum,
        })
    }
}

/// Creates or truncates `path` to exactly `size` bytes.
async fn presize(path: &Path, size: u64) -> std::io::Result<()> {
    let file = File::create(path).await?;
    file.set_len(size).await
}

// ---------------------------------------------------------------------------
// Part worker
// ---------------------------------------------------------------------------

struct DownloadWorker {
    client: S3Client,
    bucket: String,
    key: String,
    etag: Option<String>,
    destination: PathBuf,
}

fn body_error(message: String) -> TransferError {
    ClientError::Transport(TransportError::Body(message)).into()
}

impl DownloadWorker {
    async fn download(&self, range: PartRange) -> Result<VerifiedPart, TransferError> {
        if range.is_empty() {
            return Ok(VerifiedPart {
                md5: RunningChecksum::digest(ChecksumAlgorithm::Md5, &[]),
                crc32: RunningChecksum::digest(ChecksumAlgorithm::Crc32, &[]),
                etag: None,
            });
        }
        let request = ops::get_object(
            &self.bucket,
            &self.key,
            Some(range.byte_range()),
            self.etag.as_deref(),
        );
        let response = self.client.send_once(&request).await?;
        let announced = response
            .header(CONTENT_MD5)
            .and_then(|v| ChecksumValue::from_base64(ChecksumAlgorithm::Md5, v).ok());

        let mut file = OpenOptions::new().write(true).open(&self.destination).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut writer = ChecksummedWriter::new(
            ChecksummedWriter::new(file, ChecksumAlgorithm::Md5),
            ChecksumAlgorithm::Crc32,
        );

        let mut body = response.into_body();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(ClientError::from)?;
            written += chunk.len() as u64;
            if written > range.len() {
                return Err(body_error(format!(
                    "part {} body exceeds its {} byte range",
                    range.number,
                    range.len()
                )));
            }
            writer.write_all(&chunk).await?;
            trace!(part = range.number, bytes = chunk.len(), "chunk written");
        }
        writer.flush().await?;
        if written != range.len() {
            return Err(body_error(format!(
                "part {} body ended after {written} of {} bytes",
                range.number,
                range.len()
            )));
        }

        let (inner, crc32) = writer.into_parts();
        let (_, md5) = inner.into_parts();
        let md5 = md5.finalize();
        match announced {
            Some(announced) if announced != md5 => {
                return Err(ClientError::ChecksumMismatch {
                    expected: announced.to_string(),
                    actual: md5.to_string(),
                }
                .into());
            }
            Some(_) => {}
            None => debug!(
                part = range.number,
                "range carried no Content-MD5, only the whole-object check covers it"
            ),
        }
        Ok(VerifiedPart {
            md5,
            crc32: crc32.finalize(),
            etag: None,
        })
    }
}

impl PartWorker for DownloadWorker {
    fn transfer(&self, range: PartRange) -> BoxFuture<'_, Result<VerifiedPart, TransferError>> {
        Box::pin(self.download(range))
    }
}
