//! Per-unit retry bookkeeping and its state machine.
//!
//! ```text
//! Pending ──begin_retry──► Retrying ──fire──► Pending ──► ... ──► Succeeded | Failed
//!                             │
//!                             └──cancel──► Canceled
//! ```
//!
//! `Retrying` means a delay timer is armed. Only one retry may be armed per case.

use serde::{Deserialize, Serialize};

use super::policy::ErrorClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Pending,
    Retrying,
    Succeeded,
    Failed,
    Canceled,
}

impl RetryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RetryStatus::Succeeded | RetryStatus::Failed | RetryStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryCaseError {
    #[error("retry already in flight for {0}")]
    AlreadyRetrying(String),
    #[error("retry case {case_id} already finished ({status:?})")]
    Finished {
        case_id: String,
        status: RetryStatus,
    },
}

/// One retryable unit of work (a piece, or a session-level step such as finalize).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCase {
    pub case_id: String,
    /// Retries armed so far.
    pub attempt: u32,
    pub last_error_class: Option<ErrorClass>,
    /// When the currently armed retry is due (Unix ms).
    pub scheduled_at: Option<u64>,
    pub status: RetryStatus,
}

impl RetryCase {
    pub fn new(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            attempt: 0,
            last_error_class: None,
            scheduled_at: None,
            status: RetryStatus::Pending,
        }
    }

    pub fn record_failure(&mut self, class: ErrorClass) {
        self.last_error_class = Some(class);
    }

    /// Arm a retry due at `due_at_ms`. Returns the new attempt number.
    pub fn begin_retry(&mut self, due_at_ms: u64) -> Result<u32, RetryCaseError> {
        match self.status {
            RetryStatus::Retrying => Err(RetryCaseError::AlreadyRetrying(self.case_id.clone())),
            s if s.is_terminal() => Err(RetryCaseError::Finished {
                case_id: self.case_id.clone(),
                status: s,
            }),
            _ => {
                self.attempt += 1;
                self.scheduled_at = Some(due_at_ms);
                self.status = RetryStatus::Retrying;
                Ok(self.attempt)
            }
        }
    }

    /// The armed delay elapsed; the next attempt is about to run.
    pub fn fire(&mut self) {
        if self.status == RetryStatus::Retrying {
            self.status = RetryStatus::Pending;
            self.scheduled_at = None;
        }
    }

    pub fn succeed(&mut self) {
        if !self.status.is_terminal() {
            self.status = RetryStatus::Succeeded;
            self.scheduled_at = None;
        }
    }

    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            self.status = RetryStatus::Failed;
            self.scheduled_at = None;
        }
    }

    /// Disarm any pending timer. No-op once the case has finished.
    pub fn cancel(&mut self) {
        if !self.status.is_terminal() {
            self.status = RetryStatus::Canceled;
            self.scheduled_at = None;
        }
    }
}
