//! Key-value backends behind the transfer ledger.
//!
//! The ledger owns entry encoding, expiry and eviction; a store only keeps
//! opaque bytes per key and reports sizes.

mod memory;
mod sqlite;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::{default_db_path, SqliteStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Writing would push the store past its byte limit.
    #[error("store full: need {needed} bytes, {used} of {limit} used")]
    CapacityExceeded { needed: u64, used: u64, limit: u64 },

    #[error("sqlite: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_capacity(&self) -> bool {
        matches!(self, StoreError::CapacityExceeded { .. })
    }
}

/// Durable map from string keys to byte values.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Insert or overwrite. Fails with [`StoreError::CapacityExceeded`] when the
    /// store has a limit and the write would exceed it. An entry past its `ttl`
    /// reads as absent until something deletes it.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Removes all `keys` in one step; returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Keys starting with `prefix`, sorted.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn size_of(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Sum of all value sizes.
    async fn total_size(&self) -> Result<u64, StoreError>;

    /// Byte limit, if any.
    fn capacity(&self) -> Option<u64>;
}

pub type SharedStore = std::sync::Arc<dyn KvStore>;

/// Shared capacity check: `Err` when replacing `old` bytes by `new` bytes
/// would take `used` past `limit`.
pub(crate) fn check_capacity(
    limit: Option<u64>,
    used: u64,
    old: u64,
    new: u64,
) -> Result<(), StoreError> {
    if let Some(limit) = limit {
        let after = used.saturating_sub(old) + new;
        if after > limit {
            return Err(StoreError::CapacityExceeded {
                needed: new,
                used,
                limit,
            });
        }
    }
    Ok(())
}

pub(crate) fn expiry_from(ttl: Option<Duration>) -> Option<u64> {
    ttl.map(|t| crate::clock::unix_millis().saturating_add(t.as_millis() as u64))
}

pub(crate) fn is_expired(expires_at: Option<u64>) -> bool {
    expires_at.is_some_and(|at| at <= crate::clock::unix_millis())
}
