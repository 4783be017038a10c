//! Types for transfer sessions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::TransferConfig;
use crate::payload::PayloadDescriptor;
use crate::segmenter::piece_count;

/// Session identifier: `<fingerprint>-<suffix>`, both lowercase hex.
pub type SessionId = String;

/// Session lifecycle, stored as a lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Transferring,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Transferring => "transferring",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Canceled => "canceled",
        }
    }

    /// Completed and Canceled never run again under the same record.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Canceled)
    }

    /// States from which `resume` may restart the pipeline.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            SessionStatus::Pending
                | SessionStatus::Transferring
                | SessionStatus::Paused
                | SessionStatus::Failed
        )
    }
}

/// Transient per-piece state while a session is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceState {
    Pending,
    InFlight,
    Done,
    ErrorAwaitingRetry,
    PermanentlyFailed,
}

/// Where pieces go and where the assemble call is made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTarget {
    /// Piece upload endpoint.
    pub url: String,
    /// Called once after every piece landed; skipped when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize_url: Option<String>,
    /// Extra headers sent with every request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl TransferTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_finalize(mut self, finalize_url: impl Into<String>) -> Self {
        self.finalize_url = Some(finalize_url.into());
        self
    }
}

/// One payload being moved.
///
/// `completed_pieces` is not part of the serialized state record; the ledger
/// keeps it as one key per finished piece and merges it back on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSession {
    pub session_id: SessionId,
    pub payload: PayloadDescriptor,
    pub target: TransferTarget,
    pub settings: TransferConfig,
    pub payload_size: u64,
    pub piece_size: u64,
    pub total_pieces: u64,
    #[serde(skip)]
    pub completed_pieces: BTreeSet<u64>,
    pub status: SessionStatus,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub retry_budget_used: u32,
    #[serde(default)]
    pub last_retry_at: Option<u64>,
    /// Eviction priority, 1 (evict first) to 10.
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_pieces: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TransferSession {
    pub fn new(
        session_id: SessionId,
        payload: PayloadDescriptor,
        target: TransferTarget,
        settings: TransferConfig,
        piece_size: u64,
        priority: u8,
        now_ms: u64,
    ) -> Self {
        let piece_size = piece_size.max(1);
        let payload_size = payload.size;
        Self {
            session_id,
            payload,
            target,
            settings,
            payload_size,
            piece_size,
            total_pieces: piece_count(payload_size, piece_size),
            completed_pieces: BTreeSet::new(),
            status: SessionStatus::Pending,
            created_at: now_ms,
            updated_at: now_ms,
            retry_budget_used: 0,
            last_retry_at: None,
            priority: priority.clamp(1, 10),
            failed_pieces: Vec::new(),
            last_error: None,
        }
    }

    /// Record a finished piece. Indices outside `[0, total_pieces)` are ignored
    /// and reported as `false`.
    pub fn mark_piece_done(&mut self, index: u64, now_ms: u64) -> bool {
        if index >= self.total_pieces {
            return false;
        }
        self.completed_pieces.insert(index);
        self.failed_pieces.retain(|&i| i != index);
        self.updated_at = now_ms;
        true
    }

    /// Merge persisted piece indices, dropping anything out of range.
    pub fn absorb_completed(&mut self, pieces: impl IntoIterator<Item = u64>) {
        let total = self.total_pieces;
        self.completed_pieces
            .extend(pieces.into_iter().filter(|&i| i < total));
    }

    pub fn all_pieces_done(&self) -> bool {
        self.completed_pieces.len() as u64 == self.total_pieces
    }

    /// Indices not yet completed, ascending.
    pub fn remaining_pieces(&self) -> Vec<u64> {
        (0..self.total_pieces)
            .filter(|i| !self.completed_pieces.contains(i))
            .collect()
    }

    /// Bytes covered by completed pieces.
    pub fn bytes_done(&self) -> u64 {
        self.completed_pieces
            .iter()
            .map(|&i| {
                let start = i * self.piece_size;
                (start + self.piece_size).min(self.payload_size) - start
            })
            .sum()
    }

    /// Move to `status`. `Completed` is refused unless every piece is done.
    pub fn set_status(&mut self, status: SessionStatus, now_ms: u64) -> bool {
        if status == SessionStatus::Completed && !self.all_pieces_done() {
            return false;
        }
        self.status = status;
        self.updated_at = now_ms;
        true
    }

    pub fn record_retry(&mut self, now_ms: u64) {
        self.retry_budget_used = self.retry_budget_used.saturating_add(1);
        self.last_retry_at = Some(now_ms);
        self.updated_at = now_ms;
    }

    /// Forget all progress (used when a canceled session is restarted in-process).
    pub fn reset(&mut self, now_ms: u64) {
        self.completed_pieces.clear();
        self.failed_pieces.clear();
        self.last_error = None;
        self.retry_budget_used = 0;
        self.last_retry_at = None;
        self.status = SessionStatus::Pending;
        self.created_at = now_ms;
        self.updated_at = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(size: u64, piece: u64) -> TransferSession {
        TransferSession::new(
            "abc-01".into(),
            PayloadDescriptor::new("f.bin", size, "application/octet-stream", 0),
            TransferTarget::new("http://example.invalid/up"),
            TransferConfig::default(),
            piece,
            5,
            100,
        )
    }

    #[test]
    fn total_pieces_is_ceiling() {
        assert_eq!(session(10, 4).total_pieces, 3);
        assert_eq!(session(8, 4).total_pieces, 2);
        assert_eq!(session(0, 4).total_pieces, 0);
    }

    #[test]
    fn completed_pieces_stay_in_range() {
        let mut s = session(10, 4);
        assert!(s.mark_piece_done(0, 101));
        assert!(!s.mark_piece_done(3, 102));
        s.absorb_completed([1, 9, 100]);
        assert_eq!(s.completed_pieces.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(s.remaining_pieces(), vec![2]);
        assert_eq!(s.bytes_done(), 8);
    }

    #[test]
    fn completed_status_requires_all_pieces() {
        let mut s = session(10, 4);
        s.mark_piece_done(0, 1);
        s.mark_piece_done(1, 1);
        assert!(!s.set_status(SessionStatus::Completed, 2));
        assert_eq!(s.status, SessionStatus::Pending);
        s.mark_piece_done(2, 3);
        assert!(s.set_status(SessionStatus::Completed, 4));
        assert_eq!(s.bytes_done(), 10);
    }

    #[test]
    fn state_record_omits_completed_pieces() {
        let mut s = session(10, 4);
        s.mark_piece_done(1, 5);
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("completed_pieces"));
        assert!(json.contains("\"status\":\"pending\""));
        let back: TransferSession = serde_json::from_str(&json).unwrap();
        assert!(back.completed_pieces.is_empty());
        assert_eq!(back.total_pieces, 3);
    }

    #[test]
    fn reset_forgets_progress() {
        let mut s = session(10, 4);
        s.mark_piece_done(0, 5);
        s.record_retry(6);
        s.set_status(SessionStatus::Canceled, 7);
        s.reset(8);
        assert!(s.completed_pieces.is_empty());
        assert_eq!(s.retry_budget_used, 0);
        assert_eq!(s.status, SessionStatus::Pending);
    }
}
