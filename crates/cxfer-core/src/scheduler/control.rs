//! Pause/cancel signalling for running sessions.
//!
//! Each running session is registered with a [`SessionControl`]. `pause` and
//! `cancel` on the coordinator only flip tokens here; the session task notices
//! and winds itself down.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio_util::sync::CancellationToken;

use crate::session::SessionId;

/// Signals for one run of a session.
///
/// `pieces` is a child of `cancel`, so cancelling the session also aborts every
/// in-flight piece. Pause cancels `pieces` only when in-flight work should be
/// abandoned.
#[derive(Debug)]
pub struct SessionControl {
    cancel: CancellationToken,
    pause: CancellationToken,
    pieces: CancellationToken,
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionControl {
    pub fn new() -> Self {
        let cancel = CancellationToken::new();
        let pieces = cancel.child_token();
        Self {
            cancel,
            pause: CancellationToken::new(),
            pieces,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn pause(&self) {
        self.pause.cancel();
    }

    /// Abort in-flight pieces without cancelling the session.
    pub fn abort_pieces(&self) {
        self.pieces.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn pause_token(&self) -> &CancellationToken {
        &self.pause
    }

    /// Token for one piece attempt.
    pub fn piece_token(&self) -> CancellationToken {
        self.pieces.child_token()
    }
}

/// Registry of session id -> control for sessions with a live task.
#[derive(Debug, Default)]
pub struct ControlRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionControl>>>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run; an older control for the same id is replaced.
    pub fn register(&self, session_id: &str) -> Arc<SessionControl> {
        let control = Arc::new(SessionControl::new());
        self.write()
            .insert(session_id.to_string(), Arc::clone(&control));
        control
    }

    /// Drop the entry, but only if it still belongs to `control`'s run.
    pub fn unregister(&self, session_id: &str, control: &Arc<SessionControl>) {
        let mut sessions = self.write();
        if sessions
            .get(session_id)
            .is_some_and(|c| Arc::ptr_eq(c, control))
        {
            sessions.remove(session_id);
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionControl>> {
        self.read().get(session_id).cloned()
    }

    pub fn request_pause(&self, session_id: &str) -> bool {
        match self.get(session_id) {
            Some(c) => {
                c.pause();
                true
            }
            None => false,
        }
    }

    pub fn request_cancel(&self, session_id: &str) -> bool {
        match self.get(session_id) {
            Some(c) => {
                c.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<SessionControl>>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<SessionControl>>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_piece_tokens() {
        let c = SessionControl::new();
        let piece = c.piece_token();
        c.cancel();
        assert!(piece.is_cancelled());
        assert!(!c.is_paused());
    }

    #[test]
    fn abort_pieces_leaves_session_alive() {
        let c = SessionControl::new();
        let piece = c.piece_token();
        c.abort_pieces();
        assert!(piece.is_cancelled());
        assert!(!c.is_canceled());
    }

    #[test]
    fn stale_unregister_keeps_newer_run() {
        let reg = ControlRegistry::new();
        let first = reg.register("s-1");
        let second = reg.register("s-1");
        reg.unregister("s-1", &first);
        assert_eq!(reg.len(), 1);
        assert!(reg.request_pause("s-1"));
        assert!(second.is_paused());
        reg.unregister("s-1", &second);
        assert!(reg.is_empty());
        assert!(!reg.request_cancel("s-1"));
    }
}
