//! Transfer sessions: the persisted record of one payload being moved, its
//! status machine, and its stable identity.

mod identity;
mod types;

pub use identity::{fingerprint, fingerprint_of, is_valid_session_id, new_session_id};
pub use types::{PieceState, SessionId, SessionStatus, TransferSession, TransferTarget};
