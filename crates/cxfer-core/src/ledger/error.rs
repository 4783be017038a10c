use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Stored bytes do not decode as a ledger entry.
    #[error("corrupt entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("record encoding: {0}")]
    Json(#[from] serde_json::Error),
}
