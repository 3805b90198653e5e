use std::sync::{Arc, OnceLock};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use geos3_checksum::ChecksumAlgorithm;

use crate::plan::PartPlan;
use crate::resume::{RESUME_FORMAT_VERSION, ResumeContext, TransferKind};
use crate::session::{SessionStatus, StatusCell};
use crate::state::{PartArena, PartState};

/// What a session knows once it has planned its parts.
pub(crate) struct Layout {
    pub plan: PartPlan,
    pub arena: Arc<PartArena>,
    pub upload_id: Option<String>,
    pub object_etag: Option<String>,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
}

/// State shared between a running transfer and its handles.
pub(crate) struct Shared {
    pub session_id: String,
    pub kind: TransferKind,
    pub bucket: String,
    pub key: String,
    pub status: StatusCell,
    pub cancel: CancellationToken,
    pub layout: OnceLock<Layout>,
}

impl Shared {
    pub(crate) fn new(
        session_id: String,
        kind: TransferKind,
        bucket: String,
        key: String,
        status: SessionStatus,
    ) -> Arc<Self> {
        Arc::new(Self {
            status: StatusCell::new(session_id.clone(), status),
            session_id,
            kind,
            bucket,
            key,
            cancel: CancellationToken::new(),
            layout: OnceLock::new(),
        })
    }

    /// Applies a status change the session flow guarantees is valid.
    pub(crate) fn settle(&self, next: SessionStatus) {
        if let Err(e) = self.status.transition(next) {
            warn!(
                session = %self.session_id,
                error = %e,
                "status change ignored"
            );
        }
    }

    pub(crate) fn upload_id(&self) -> Option<&str> {
        self.layout.get().and_then(|l| l.upload_id.as_deref())
    }
}

/// Control and inspection of a running transfer from another task.
#[derive(Clone)]
pub struct TransferHandle {
    shared: Arc<Shared>,
}

impl TransferHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Requests an abort. No new part attempts start; attempts already in
    /// flight finish, then the session cleans up and reports `Aborted`.
    pub fn abort(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!(
                session = %self.shared.session_id,
                "transfer abort requested"
            );
            self.shared.cancel.cancel();
        }
    }

    pub fn is_abort_requested(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status.get()
    }

    /// Current part table; empty until the parts are planned.
    pub fn parts(&self) -> Vec<PartState> {
        self.shared
            .layout
            .get()
            .map(|l| l.arena.snapshot())
            .unwrap_or_default()
    }

    /// A resumable snapshot, available once the parts are planned.
    pub fn resume_context(&self) -> Option<ResumeContext> {
        let layout = self.shared.layout.get()?;
        Some(ResumeContext {
            format_version: RESUME_FORMAT_VERSION,
            session_id: self.shared.session_id.clone(),
            kind: self.shared.kind,
            bucket: self.shared.bucket.clone(),
            key: self.shared.key.clone(),
            total_size: layout.plan.total_size(),
            part_size: layout.plan.part_size(),
            upload_id: layout.upload_id.clone(),
            object_etag: layout.object_etag.clone(),
            status: self.shared.status.get(),
            checksum_algorithm: layout.checksum_algorithm,
            parts: layout.arena.snapshot(),
            saved_at: Utc::now(),
        })
    }
}
