use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::TransferError;

/// Lifecycle of a transfer session.
///
/// ```text
/// Initializing -> InProgress -> Finalizing -> Completed
///       \              \            \
///        +--------------+------------+--> Failed
///        +--------------+--> Aborted
/// ```
///
/// A saved session that never completed can be resumed, which puts it
/// back into `Initializing`. That includes a snapshot taken while the
/// session was finalizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Initializing, InProgress | Failed | Aborted)
                | (InProgress, Finalizing | Failed | Aborted)
                | (Finalizing, Completed | Failed)
                | (InProgress | Finalizing | Failed | Aborted, Initializing)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

/// Status cell shared between a running transfer and its handles.
#[derive(Debug)]
pub(crate) struct StatusCell {
    session_id: String,
    status: Mutex<SessionStatus>,
}

impl StatusCell {
    pub(crate) fn new(session_id: String, initial: SessionStatus) -> Self {
        Self {
            session_id,
            status: Mutex::new(initial),
        }
    }

    pub(crate) fn get(&self) -> SessionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn transition(&self, next: SessionStatus) -> Result<(), TransferError> {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if !status.can_transition_to(next) {
            return Err(TransferError::InvalidTransition {
                from: *status,
                to: next,
            });
        }
        info!(
            session = %self.session_id,
            from = ?*status,
            to = ?next,
            "session status changed"
        );
        *status = next;
        Ok(())
    }
}
