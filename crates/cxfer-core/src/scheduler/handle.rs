//! Caller-side view of a running (or finished) session.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::TransferError;
use crate::session::{PieceState, TransferSession};

use super::pipeline::SessionOutcome;
use super::progress::{ProgressStats, ProgressTracker};

/// Handle returned by `start` and `resume`. Cheap to clone; every clone
/// observes the same run.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: String,
    snapshot: watch::Receiver<TransferSession>,
    outcome: watch::Receiver<Option<SessionOutcome>>,
    progress: Arc<ProgressTracker>,
}

impl SessionHandle {
    pub(crate) fn new(
        snapshot: watch::Receiver<TransferSession>,
        outcome: watch::Receiver<Option<SessionOutcome>>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        let session_id = snapshot.borrow().session_id.clone();
        Self {
            session_id,
            snapshot,
            outcome,
            progress,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Latest published session state.
    pub fn snapshot(&self) -> TransferSession {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified on every piece completion and status change.
    pub fn subscribe(&self) -> watch::Receiver<TransferSession> {
        self.snapshot.clone()
    }

    pub fn progress(&self) -> ProgressStats {
        let session = self.snapshot.borrow();
        self.progress.stats(&session)
    }

    /// State of every piece in this run.
    pub fn piece_states(&self) -> BTreeMap<u64, PieceState> {
        self.progress.piece_states()
    }

    /// Outcome if the run has already ended.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait for the run to end (completed, failed, canceled or paused).
    pub async fn wait(&self) -> SessionOutcome {
        let mut rx = self.outcome.clone();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                let last = rx.borrow().clone();
                // The session task went away without reporting (it panicked).
                return last.unwrap_or_else(|| SessionOutcome::Failed {
                    index: None,
                    error: Arc::new(TransferError::Aborted),
                });
            }
        }
    }

    /// Same run as `other`.
    pub(crate) fn same_run(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.progress, &other.progress)
    }
}
