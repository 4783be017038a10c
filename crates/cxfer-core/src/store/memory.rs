use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{check_capacity, expiry_from, is_expired, KvStore, StoreError};

#[derive(Debug)]
struct Slot {
    value: Vec<u8>,
    expires_at: Option<u64>,
}

/// In-process store. Optional byte limit for exercising eviction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Slot>>,
    limit: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: u64) -> Self {
        Self {
            entries: Mutex::default(),
            limit: Some(limit),
        }
    }
}

fn used(entries: &BTreeMap<String, Slot>) -> u64 {
    entries.values().map(|s| s.value.len() as u64).sum()
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let old = entries.get(key).map(|s| s.value.len() as u64).unwrap_or(0);
        check_capacity(self.limit, used(&entries), old, value.len() as u64)?;
        entries.insert(
            key.to_string(),
            Slot {
                value,
                expires_at: expiry_from(ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|s| !is_expired(s.expires_at))
            .map(|s| s.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().await;
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count() as u64)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn size_of(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self
            .entries
            .lock()
            .await
            .get(key)
            .map(|s| s.value.len() as u64))
    }

    async fn total_size(&self) -> Result<u64, StoreError> {
        Ok(used(&*self.entries.lock().await))
    }

    fn capacity(&self) -> Option<u64> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_list_delete() {
        let s = MemoryStore::new();
        s.put("piece:a:0", b"x".to_vec(), None).await.unwrap();
        s.put("piece:a:1", b"yy".to_vec(), None).await.unwrap();
        s.put("state:a", b"zzz".to_vec(), None).await.unwrap();

        assert_eq!(s.get("piece:a:1").await.unwrap(), Some(b"yy".to_vec()));
        assert_eq!(s.list_keys("piece:a:").await.unwrap(), vec!["piece:a:0", "piece:a:1"]);
        assert_eq!(s.total_size().await.unwrap(), 6);
        assert_eq!(s.size_of("state:a").await.unwrap(), Some(3));

        let n = s
            .delete_many(&["piece:a:0".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert!(s.delete("state:a").await.unwrap());
        assert!(!s.delete("state:a").await.unwrap());
        assert_eq!(s.total_size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn limit_is_enforced_on_growth_only() {
        let s = MemoryStore::with_limit(10);
        s.put("a", vec![0; 8], None).await.unwrap();
        let err = s.put("b", vec![0; 3], None).await.unwrap_err();
        assert!(err.is_capacity());
        // Overwriting with a same-size value fits.
        s.put("a", vec![1; 8], None).await.unwrap();
        s.put("b", vec![0; 2], None).await.unwrap();
        assert_eq!(s.capacity(), Some(10));
    }

    #[tokio::test]
    async fn ttl_hides_stale_values() {
        let s = MemoryStore::new();
        s.put("gone", b"v".to_vec(), Some(Duration::ZERO)).await.unwrap();
        s.put("kept", b"v".to_vec(), Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(s.get("gone").await.unwrap(), None);
        assert!(s.get("kept").await.unwrap().is_some());
    }
}
