//! Bounded worker pool shared by uploads and downloads.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use geos3_client::{ClientError, RetryDecision, RetryPolicy};

use crate::TransferError;
use crate::events::TransferEvent;
use crate::plan::PartRange;
use crate::progress::Progress;
use crate::state::{Claim, PartArena, VerifiedPart};

/// Capacity of the event channel handed out by `take_events`.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Moves one part's bytes; implemented by the upload and download sides.
pub(crate) trait PartWorker: Send + Sync + 'static {
    fn transfer(&self, range: PartRange) -> BoxFuture<'_, Result<VerifiedPart, TransferError>>;
}

/// Sends an event without blocking a worker; events are dropped when the
/// receiver lags a full channel behind.
pub(crate) fn emit(events: &mpsc::Sender<TransferEvent>, event: TransferEvent) {
    if let Err(e) = events.try_send(event) {
        trace!(error = %e, "transfer event dropped");
    }
}

pub(crate) enum PoolOutcome {
    AllVerified,
    Aborted,
    Failed(TransferError),
}

/// Why a session stopped short of completion.
pub(crate) enum Stop {
    Failed(TransferError),
    Aborted,
}

impl From<TransferError> for Stop {
    fn from(error: TransferError) -> Self {
        Self::Failed(error)
    }
}

impl From<ClientError> for Stop {
    fn from(error: ClientError) -> Self {
        Self::Failed(error.into())
    }
}

impl From<std::io::Error> for Stop {
    fn from(error: std::io::Error) -> Self {
        Self::Failed(error.into())
    }
}

pub(crate) struct Pool<W> {
    pub worker: W,
    pub arena: Arc<PartArena>,
    pub policy: RetryPolicy,
    pub concurrency: usize,
    pub cancel: CancellationToken,
    pub events: mpsc::Sender<TransferEvent>,
    pub progress: Arc<Progress>,
}

impl<W: PartWorker> Pool<W> {
    /// Runs workers until every part is verified, one fails for good, or
    /// the transfer is cancelled. The outcome is decided only after all
    /// workers have stopped.
    pub(crate) async fn run(self) -> PoolOutcome {
        let pool = Arc::new(self);
        let mut workers = JoinSet::new();
        for id in 0..pool.concurrency.max(1) {
            let pool = Arc::clone(&pool);
            workers.spawn(async move { pool.work(id).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "part worker stopped unexpectedly");
                pool.arena.fail(
                    0,
                    TransferError::Client(ClientError::Protocol(format!("worker task: {e}"))),
                );
            }
        }

        if pool.cancel.is_cancelled() {
            PoolOutcome::Aborted
        } else if let Some(cause) = pool.arena.take_failure() {
            PoolOutcome::Failed(cause)
        } else if pool.arena.all_verified() {
            PoolOutcome::AllVerified
        } else {
            PoolOutcome::Failed(TransferError::Client(ClientError::Protocol(
                "workers stopped with unverified parts".into(),
            )))
        }
    }

    async fn work(&self, id: usize) {
        trace!(worker = id, "part worker started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.arena.claim_next(Instant::now()) {
                Claim::Part { range, attempt } => self.attempt(range, attempt).await,
                Claim::Wait(delay) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Claim::Exhausted => break,
            }
        }
        trace!(worker = id, "part worker finished");
    }

    async fn attempt(&self, range: PartRange, attempt: u32) {
        let part = range.number;
        debug!(part, attempt, bytes = range.len(), "part dispatched");
        emit(&self.events, TransferEvent::PartStarted { part, attempt });

        let error = match self.worker.transfer(range).await {
            Ok(verified) => {
                self.arena.complete(part, verified);
                let (transferred, total, bytes_per_second) = self.progress.add(range.len());
                debug!(part, attempt, "part verified");
                emit(
                    &self.events,
                    TransferEvent::PartCompleted {
                        part,
                        bytes: range.len(),
                    },
                );
                emit(
                    &self.events,
                    TransferEvent::Progress {
                        transferred,
                        total,
                        bytes_per_second,
                    },
                );
                return;
            }
            Err(e) => e,
        };

        if let TransferError::Client(ClientError::ChecksumMismatch { expected, actual }) = &error {
            warn!(part, attempt, %expected, %actual, "part checksum mismatch");
            self.arena.record_mismatch(part);
            emit(
                &self.events,
                TransferEvent::ChecksumMismatch {
                    part,
                    expected: expected.clone(),
                    actual: actual.clone(),
                },
            );
        }

        if self.cancel.is_cancelled() {
            debug!(
                part,
                attempt,
                error = %error,
                "part attempt failed after abort"
            );
            self.arena.release(part, error.to_string(), None);
            return;
        }

        let budget = self.arena.budget(part);
        let decision = match &error {
            // Parts are idempotent: re-sending the same range is always safe.
            TransferError::Client(e) => self.policy.decide(e, true, &budget),
            _ => RetryDecision::Fail,
        };
        let delay = match decision {
            RetryDecision::RetryNow => Duration::ZERO,
            RetryDecision::RetryAfter(delay) => delay,
            RetryDecision::Fail => {
                error!(
                    part,
                    attempts = budget.attempts(),
                    error = %error,
                    "part failed"
                );
                self.arena.fail(part, final_error(part, budget.attempts(), error));
                return;
            }
        };
        warn!(
            part,
            attempt,
            ?delay,
            error = %error,
            "part will be retried"
        );
        emit(
            &self.events,
            TransferEvent::PartRetrying {
                part,
                attempt,
                delay,
                error: error.to_string(),
            },
        );
        self.arena.release(part, error.to_string(), Some(delay));
    }
}

fn final_error(part_number: u32, attempts: u32, error: TransferError) -> TransferError {
    match error {
        TransferError::Client(ClientError::ChecksumMismatch { expected, actual }) => {
            TransferError::ContentVerificationFailed {
                part_number: Some(part_number),
                expected,
                actual,
            }
        }
        TransferError::Client(source) => TransferError::PartFailed {
            part_number,
            attempts,
            source,
        },
        other => other,
    }
}
