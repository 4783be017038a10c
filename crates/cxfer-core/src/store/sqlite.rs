//! SQLite-backed store: one row per key in `ledger.db`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::Mutex;

use super::{check_capacity, expiry_from, is_expired, KvStore, StoreError};

/// Percent-encode a path for use in a sqlite:// URI.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// `~/.local/state/cxfer/ledger.db`.
pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("cxfer")
        .map_err(|e| StoreError::Backend(format!("xdg: {}", e)))?;
    Ok(xdg_dirs.get_state_home().join("ledger.db"))
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    limit: Option<u64>,
    /// Serializes capacity-checked puts. A deferred transaction that reads the
    /// total and then writes cannot wait for another writer's lock.
    writes: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Open (or create) the default ledger database.
    pub async fn open_default(limit: Option<u64>) -> Result<Self, StoreError> {
        Self::open_at(default_db_path()?, limit).await
    }

    /// Open (or create) the database at `path`, creating parent dirs.
    pub async fn open_at(path: impl AsRef<Path>, limit: Option<u64>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let store = SqliteStore::with_pool(pool, limit);
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database, for tests.
    pub async fn open_memory(limit: Option<u64>) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = SqliteStore::with_pool(pool, limit);
        store.migrate().await?;
        Ok(store)
    }

    fn with_pool(pool: Pool<Sqlite>, limit: Option<u64>) -> Self {
        SqliteStore {
            pool,
            limit,
            writes: Arc::new(Mutex::new(())),
        }
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                size INTEGER NOT NULL,
                expires_at INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let _writing = match self.limit {
            Some(_) => Some(self.writes.lock().await),
            None => None,
        };
        let mut tx = self.pool.begin().await?;
        if self.limit.is_some() {
            let used: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM entries")
                .fetch_one(&mut *tx)
                .await?;
            let old: Option<i64> = sqlx::query_scalar("SELECT size FROM entries WHERE key = ?1")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
            check_capacity(
                self.limit,
                used as u64,
                old.unwrap_or(0) as u64,
                value.len() as u64,
            )?;
        }
        let size = value.len() as i64;
        let expires_at = expiry_from(ttl).map(|t| t as i64);
        sqlx::query(
            "INSERT INTO entries (key, value, size, expires_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value, size = excluded.size, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(size)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT value, expires_at FROM entries WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let expires_at: Option<i64> = row.try_get("expires_at")?;
        if is_expired(expires_at.map(|t| t as u64)) {
            return Ok(None);
        }
        Ok(Some(row.try_get("value")?))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM entries WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for key in keys {
            removed += sqlx::query("DELETE FROM entries WHERE key = ?1")
                .bind(key)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT key FROM entries WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("key").map_err(StoreError::from))
            .collect()
    }

    async fn size_of(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let size: Option<i64> = sqlx::query_scalar("SELECT size FROM entries WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(size.map(|s| s as u64))
    }

    async fn total_size(&self) -> Result<u64, StoreError> {
        let used: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(used as u64)
    }

    fn capacity(&self) -> Option<u64> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_prefix_listing() {
        let s = SqliteStore::open_memory(None).await.unwrap();
        s.put("state:b", b"one".to_vec(), None).await.unwrap();
        s.put("state:a", b"two".to_vec(), None).await.unwrap();
        s.put("piece:a:0", b"p".to_vec(), None).await.unwrap();
        s.put("state:a", b"three".to_vec(), None).await.unwrap();

        assert_eq!(s.get("state:a").await.unwrap(), Some(b"three".to_vec()));
        assert_eq!(s.list_keys("state:").await.unwrap(), vec!["state:a", "state:b"]);
        assert_eq!(s.total_size().await.unwrap(), 3 + 5 + 1);
        assert_eq!(s.size_of("piece:a:0").await.unwrap(), Some(1));
        assert_eq!(s.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_many_is_atomic_batch() {
        let s = SqliteStore::open_memory(None).await.unwrap();
        for i in 0..5 {
            s.put(&format!("piece:x:{}", i), vec![0; 4], None).await.unwrap();
        }
        let keys: Vec<String> = s.list_keys("piece:x:").await.unwrap();
        assert_eq!(s.delete_many(&keys).await.unwrap(), 5);
        assert!(s.list_keys("piece:").await.unwrap().is_empty());
        assert!(!s.delete("piece:x:0").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_limited_puts_respect_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let s = SqliteStore::open_at(dir.path().join("ledger.db"), Some(100))
            .await
            .unwrap();
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let s = s.clone();
            tasks.spawn(async move { s.put(&format!("piece:x:{}", i), vec![1; 10], None).await });
        }
        let mut stored = 0;
        while let Some(res) = tasks.join_next().await {
            match res.unwrap() {
                Ok(()) => stored += 1,
                Err(e) => assert!(e.is_capacity(), "unexpected error: {}", e),
            }
        }
        assert_eq!(stored, 10);
        assert_eq!(s.total_size().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn capacity_limit() {
        let s = SqliteStore::open_memory(Some(8)).await.unwrap();
        s.put("a", vec![0; 6], None).await.unwrap();
        let err = s.put("b", vec![0; 3], None).await.unwrap_err();
        assert!(err.is_capacity());
        s.put("a", vec![0; 5], None).await.unwrap();
        s.put("b", vec![0; 3], None).await.unwrap();
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let s = SqliteStore::open_memory(None).await.unwrap();
        s.put("a", b"v".to_vec(), Some(Duration::ZERO)).await.unwrap();
        s.put("b", b"v".to_vec(), Some(Duration::from_secs(3600))).await.unwrap();
        assert_eq!(s.get("a").await.unwrap(), None);
        assert_eq!(s.get("b").await.unwrap(), Some(b"v".to_vec()));
        // Still listed until deleted.
        assert_eq!(s.list_keys("").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested dir").join("ledger.db");
        {
            let s = SqliteStore::open_at(&path, None).await.unwrap();
            s.put("state:q", b"persisted".to_vec(), None).await.unwrap();
        }
        let s = SqliteStore::open_at(&path, None).await.unwrap();
        assert_eq!(s.get("state:q").await.unwrap(), Some(b"persisted".to_vec()));
    }
}
