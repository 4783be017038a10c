//! Error taxonomy surfaced by the engine.
//!
//! Transport failures are classified once, at the transport boundary, into an
//! [`ErrorClass`]; everything above that works with the closed enum.

use crate::ledger::LedgerError;
use crate::retry::ErrorClass;
use crate::session::{SessionId, SessionStatus};
use crate::transport::TransportError;

/// Errors returned by coordinator operations and carried in terminal outcomes.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Transport-level failure (connection reset, DNS, refused).
    #[error("network error: {0}")]
    Network(String),

    /// A piece attempt or probe exceeded its timeout.
    #[error("timed out")]
    Timeout,

    /// 5xx-equivalent response.
    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    /// 4xx-equivalent response; the caller has to fix something.
    #[error("client error: HTTP {status}")]
    Client { status: u16 },

    /// Explicit cancellation.
    #[error("transfer aborted")]
    Aborted,

    /// Ledger I/O failure.
    #[error("ledger: {0}")]
    Storage(#[from] LedgerError),

    /// Retry budget exhausted (or error not retryable) for one piece.
    #[error("piece {index} failed permanently after {attempts} attempt(s): {last}")]
    PermanentFailure {
        index: u64,
        attempts: u32,
        last: ErrorClass,
    },

    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session {id} is {status:?}; cannot {action}")]
    InvalidState {
        id: SessionId,
        status: SessionStatus,
        action: &'static str,
    },

    /// Reading the payload failed.
    #[error("payload: {0}")]
    Payload(#[from] std::io::Error),
}

impl TransferError {
    /// Classification of this error for retry decisions, if it came from the transport.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            TransferError::Network(_) => Some(ErrorClass::Network),
            TransferError::Timeout => Some(ErrorClass::Timeout),
            TransferError::Server { status } => Some(ErrorClass::Server(*status)),
            TransferError::Client { status } => Some(ErrorClass::Client(*status)),
            TransferError::Aborted => Some(ErrorClass::Aborted),
            _ => None,
        }
    }
}

impl From<TransportError> for TransferError {
    fn from(e: TransportError) -> Self {
        match e.class {
            ErrorClass::Network => TransferError::Network(e.message),
            ErrorClass::Timeout => TransferError::Timeout,
            ErrorClass::Server(status) => TransferError::Server { status },
            ErrorClass::Client(status) => TransferError::Client { status },
            ErrorClass::Aborted => TransferError::Aborted,
        }
    }
}
