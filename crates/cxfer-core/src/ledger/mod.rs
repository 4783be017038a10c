//! Transfer ledger: durable session and piece progress on top of a [`KvStore`].
//!
//! Every record is a [`LedgerEntry`] (header + value) under a namespaced key.
//! Entries expire after the configured TTL; a sweep removes them, demotes idle
//! high-priority sessions and evicts low-scoring sessions when the store is
//! near its limit. Sessions are always removed whole.

mod entry;
mod error;
mod keys;
mod priority;
mod sweeper;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::config::LedgerConfig;
use crate::retry::RetryCase;
use crate::session::TransferSession;
use crate::store::{SharedStore, StoreError};

pub use entry::{EntryMeta, LedgerEntry, HEADER_LEN};
pub use error::LedgerError;
pub use keys::{piece_key, piece_prefix, retry_key, state_key};

/// Aggregate store usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerUsage {
    pub total_size: u64,
    pub piece_count: u64,
    pub session_count: u64,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_sessions: u64,
    pub expired_entries: u64,
    pub demoted_sessions: u64,
    pub evicted_sessions: u64,
}

pub struct TransferLedger {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    /// Serializes read-modify-write of `state:` entries.
    state_lock: Mutex<()>,
    sweeper: std::sync::Mutex<Option<sweeper::SweeperHandle>>,
}

impl TransferLedger {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self {
            store,
            clock,
            config,
            state_lock: Mutex::new(()),
            sweeper: std::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    fn ttl_ms(&self) -> u64 {
        self.config.ttl_secs.saturating_mul(1000)
    }

    /// Effective byte limit: the tighter of the store's own and the configured one.
    fn limit(&self) -> Option<u64> {
        match (self.store.capacity(), self.config.max_total_bytes) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ---- writes ----

    /// Put with the fixed retry schedule. A capacity error triggers one
    /// eviction pass (never touching `owner`) before the next attempt.
    async fn put_entry(&self, key: &str, bytes: Vec<u8>, owner: &str) -> Result<(), LedgerError> {
        let attempts = self.config.write_attempts.max(1);
        let ttl = Some(Duration::from_millis(self.ttl_ms()));
        let mut evicted = false;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.put(key, bytes.clone(), ttl).await {
                Ok(()) => return Ok(()),
                Err(StoreError::CapacityExceeded { needed, .. }) if !evicted => {
                    evicted = true;
                    let n = self.evict_to_fit(needed, Some(owner)).await?;
                    tracing::info!(key, evicted = n, "ledger full, evicted sessions");
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(key, attempt, error = %e, "ledger write failed, retrying");
                    tokio::time::sleep(Duration::from_millis(self.config.write_retry_delay_ms))
                        .await;
                }
                Err(e) => {
                    tracing::error!(key, attempt, error = %e, "ledger write failed");
                    return Err(e.into());
                }
            }
        }
    }

    async fn write_value(
        &self,
        key: &str,
        value: Vec<u8>,
        priority: u8,
        owner: &str,
        keep_stats_of: Option<EntryMeta>,
    ) -> Result<(), LedgerError> {
        let now = self.now();
        let mut meta = EntryMeta::new(now, self.ttl_ms(), priority);
        if let Some(prev) = keep_stats_of {
            meta.created_at = prev.created_at;
            meta.access_count = prev.access_count;
        }
        let bytes = LedgerEntry { meta, value }.encode(self.config.compress_threshold_bytes);
        self.put_entry(key, bytes, owner).await
    }

    /// Raw entry with its header, `None` when absent or expired.
    async fn read_entry(&self, key: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let Some(bytes) = self.store.get(key).await? else {
            return Ok(None);
        };
        let entry = LedgerEntry::decode(key, &bytes)?;
        if entry.meta.is_expired(self.now()) {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Persist the session record (without its completed pieces).
    pub async fn save_session_state(&self, session: &TransferSession) -> Result<(), LedgerError> {
        let key = keys::state_key(&session.session_id);
        let value = serde_json::to_vec(session)?;
        let _guard = self.state_lock.lock().await;
        let prev = match self.store.get(&key).await {
            Ok(Some(bytes)) => entry::decode_meta(&key, &bytes).ok(),
            _ => None,
        };
        self.write_value(&key, value, session.priority, &session.session_id, prev)
            .await
    }

    /// Load the session record and count the access. Completed pieces are not
    /// included; see [`get_completed_pieces`](Self::get_completed_pieces).
    pub async fn get_session_state(
        &self,
        session_id: &str,
    ) -> Result<Option<TransferSession>, LedgerError> {
        let key = keys::state_key(session_id);
        let _guard = self.state_lock.lock().await;
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let entry = LedgerEntry::decode(&key, &bytes)?;
        let now = self.now();
        if entry.meta.is_expired(now) {
            return Ok(None);
        }
        let session: TransferSession = serde_json::from_slice(&entry.value)?;

        let mut meta = entry.meta;
        meta.last_accessed_at = now;
        meta.access_count = meta.access_count.saturating_add(1);
        let mut bytes = bytes;
        entry::replace_meta(&key, &mut bytes, &meta)?;
        if let Err(e) = self.store.put(&key, bytes, Some(self.remaining_ttl(&meta))).await {
            tracing::debug!(session_id, error = %e, "could not record ledger access");
        }
        Ok(Some(session))
    }

    fn remaining_ttl(&self, meta: &EntryMeta) -> Duration {
        Duration::from_millis(meta.expires_at.saturating_sub(self.now()))
    }

    /// Session record with its completed pieces merged in.
    pub async fn load_session(
        &self,
        session_id: &str,
    ) -> Result<Option<TransferSession>, LedgerError> {
        let Some(mut session) = self.get_session_state(session_id).await? else {
            return Ok(None);
        };
        let done = self.get_completed_pieces(session_id).await?;
        session.absorb_completed(done);
        Ok(Some(session))
    }

    /// Mark a piece done. Writing the same piece twice is a no-op.
    pub async fn save_piece_done(
        &self,
        session_id: &str,
        index: u64,
        priority: u8,
    ) -> Result<(), LedgerError> {
        let key = keys::piece_key(session_id, index);
        if self.store.size_of(&key).await?.is_some() {
            return Ok(());
        }
        self.write_value(&key, Vec::new(), priority, session_id, None)
            .await
    }

    pub async fn get_completed_pieces(&self, session_id: &str) -> Result<BTreeSet<u64>, LedgerError> {
        let keys = self.store.list_keys(&keys::piece_prefix(session_id)).await?;
        Ok(keys.iter().filter_map(|k| keys::piece_index(k)).collect())
    }

    pub async fn save_retry_state(
        &self,
        session_id: &str,
        cases: &[RetryCase],
        priority: u8,
    ) -> Result<(), LedgerError> {
        let key = keys::retry_key(session_id);
        let value = serde_json::to_vec(cases)?;
        self.write_value(&key, value, priority, session_id, None)
            .await
    }

    pub async fn get_retry_state(&self, session_id: &str) -> Result<Vec<RetryCase>, LedgerError> {
        match self.read_entry(&keys::retry_key(session_id)).await? {
            Some(entry) => Ok(serde_json::from_slice(&entry.value)?),
            None => Ok(Vec::new()),
        }
    }

    /// Every key belonging to `session_id`.
    async fn session_keys(&self, session_id: &str) -> Result<Vec<String>, LedgerError> {
        let mut all = vec![keys::state_key(session_id), keys::retry_key(session_id)];
        all.extend(self.store.list_keys(&keys::piece_prefix(session_id)).await?);
        Ok(all)
    }

    /// Remove a session's state, pieces and retry record in one batch.
    pub async fn delete_session(&self, session_id: &str) -> Result<u64, LedgerError> {
        let _guard = self.state_lock.lock().await;
        self.remove_session(session_id).await
    }

    /// Caller decides about `state_lock`; eviction runs from inside locked writes.
    async fn remove_session(&self, session_id: &str) -> Result<u64, LedgerError> {
        let keys = self.session_keys(session_id).await?;
        let n = self.store.delete_many(&keys).await?;
        tracing::debug!(session_id, removed = n, "ledger session deleted");
        Ok(n)
    }

    /// Set the explicit priority (clamped to 1-10). Returns false when the
    /// session is unknown.
    pub async fn set_priority(&self, session_id: &str, priority: u8) -> Result<bool, LedgerError> {
        let priority = priority.clamp(1, 10);
        let key = keys::state_key(session_id);
        let _guard = self.state_lock.lock().await;
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(false);
        };
        let entry = LedgerEntry::decode(&key, &bytes)?;
        let mut session: TransferSession = serde_json::from_slice(&entry.value)?;
        session.priority = priority;
        let mut meta = entry.meta;
        meta.priority = priority;
        let bytes = LedgerEntry {
            meta,
            value: serde_json::to_vec(&session)?,
        }
        .encode(self.config.compress_threshold_bytes);
        self.store
            .put(&key, bytes, Some(self.remaining_ttl(&meta)))
            .await?;
        Ok(true)
    }

    /// Sessions with a live state record, completed pieces merged.
    pub async fn list_active_sessions(&self) -> Result<Vec<TransferSession>, LedgerError> {
        let mut out = Vec::new();
        for key in self.store.list_keys(keys::STATE_PREFIX).await? {
            let entry = match self.read_entry(&key).await {
                Ok(Some(e)) => e,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(key, error = %e, "skipping unreadable ledger entry");
                    continue;
                }
            };
            let mut session: TransferSession = match serde_json::from_slice(&entry.value) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(key, error = %e, "skipping undecodable session record");
                    continue;
                }
            };
            let done = self.get_completed_pieces(&session.session_id).await?;
            session.absorb_completed(done);
            out.push(session);
        }
        Ok(out)
    }

    pub async fn usage(&self) -> Result<LedgerUsage, LedgerError> {
        Ok(LedgerUsage {
            total_size: self.store.total_size().await?,
            piece_count: self.store.list_keys(keys::PIECE_PREFIX).await?.len() as u64,
            session_count: self.store.list_keys(keys::STATE_PREFIX).await?.len() as u64,
        })
    }

    // ---- maintenance ----

    /// Delete expired entries; a session whose state expired goes as a whole,
    /// as do pieces and retry records left without a state record. Then demote
    /// idle sessions and evict if usage is above the high-water mark.
    pub async fn sweep_expired(&self) -> Result<SweepReport, LedgerError> {
        let now = self.now();
        let mut report = SweepReport::default();
        let all = self.store.list_keys("").await?;

        let mut live_sessions = BTreeSet::new();
        let mut expired_sessions = BTreeSet::new();
        let mut stray = Vec::new();
        for key in all.iter().filter(|k| keys::is_state_key(k)) {
            let Some(id) = keys::session_of(key) else { continue };
            match self.store.get(key).await? {
                Some(bytes) => match entry::decode_meta(key, &bytes) {
                    Ok(meta) if !meta.is_expired(now) => {
                        live_sessions.insert(id.to_string());
                    }
                    Ok(_) => {
                        expired_sessions.insert(id.to_string());
                    }
                    Err(e) => {
                        tracing::warn!(key, error = %e, "dropping corrupt session record");
                        expired_sessions.insert(id.to_string());
                    }
                },
                None => {
                    expired_sessions.insert(id.to_string());
                }
            }
        }

        for key in all.iter().filter(|k| !keys::is_state_key(k)) {
            let Some(id) = keys::session_of(key) else { continue };
            if expired_sessions.contains(id) {
                continue;
            }
            if !live_sessions.contains(id) {
                stray.push(key.clone());
                continue;
            }
            let expired = match self.store.get(key).await? {
                Some(bytes) => entry::decode_meta(key, &bytes)
                    .map(|m| m.is_expired(now))
                    .unwrap_or(true),
                None => true,
            };
            if expired {
                stray.push(key.clone());
            }
        }

        for id in &expired_sessions {
            self.delete_session(id).await?;
            report.expired_sessions += 1;
        }
        if !stray.is_empty() {
            report.expired_entries = self.store.delete_many(&stray).await?;
        }

        report.demoted_sessions = self.apply_demotions(&live_sessions).await?;
        report.evicted_sessions = self.evict_if_above_high_water().await?;

        if report != SweepReport::default() {
            tracing::info!(
                expired_sessions = report.expired_sessions,
                expired_entries = report.expired_entries,
                demoted = report.demoted_sessions,
                evicted = report.evicted_sessions,
                "ledger sweep"
            );
        }
        Ok(report)
    }

    /// Persist idle demotion for high-priority sessions.
    async fn apply_demotions(&self, sessions: &BTreeSet<String>) -> Result<u64, LedgerError> {
        let now = self.now();
        let mut demoted = 0;
        for id in sessions {
            let key = keys::state_key(id);
            let current = {
                let _guard = self.state_lock.lock().await;
                match self.store.get(&key).await? {
                    Some(bytes) => entry::decode_meta(&key, &bytes).ok(),
                    None => None,
                }
            };
            let Some(meta) = current else { continue };
            let lowered = priority::demoted_priority(&meta, now);
            if lowered < meta.priority && self.set_priority(id, lowered).await? {
                tracing::debug!(session_id = %id, from = meta.priority, to = lowered, "demoted idle session");
                demoted += 1;
            }
        }
        Ok(demoted)
    }

    async fn evict_if_above_high_water(&self) -> Result<u64, LedgerError> {
        let Some(limit) = self.limit() else { return Ok(0) };
        let used = self.store.total_size().await?;
        if (used as f64) <= limit as f64 * self.config.high_water {
            return Ok(0);
        }
        self.evict_to_fit(0, None).await
    }

    /// Evict whole sessions, lowest score and least recently touched first,
    /// until `needed` more bytes fit under the low-water mark. `protect` is
    /// never evicted. Returns the number of sessions removed.
    pub async fn evict_to_fit(&self, needed: u64, protect: Option<&str>) -> Result<u64, LedgerError> {
        let Some(limit) = self.limit() else { return Ok(0) };
        let target = (limit as f64 * self.config.low_water) as u64;
        let mut used = self.store.total_size().await?;
        if used + needed <= target {
            return Ok(0);
        }

        let now = self.now();
        let mut candidates = Vec::new();
        for key in self.store.list_keys(keys::STATE_PREFIX).await? {
            let Some(id) = keys::session_of(&key) else { continue };
            if Some(id) == protect {
                continue;
            }
            let meta = match self.store.get(&key).await? {
                Some(bytes) => entry::decode_meta(&key, &bytes).ok(),
                None => None,
            };
            // Unreadable records sort first.
            let (score, touched) = meta
                .map(|m| (priority::score(&m, now), m.last_accessed_at))
                .unwrap_or((0.0, 0));
            candidates.push((score, touched, id.to_string()));
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut evicted = 0;
        for (score, _, id) in candidates {
            if used + needed <= target {
                break;
            }
            let sizes = self.session_sizes(&id).await?;
            self.remove_session(&id).await?;
            used = used.saturating_sub(sizes);
            evicted += 1;
            tracing::info!(session_id = %id, score, "evicted session from ledger");
        }
        Ok(evicted)
    }

    async fn session_sizes(&self, session_id: &str) -> Result<u64, LedgerError> {
        let mut total = 0;
        for key in self.session_keys(session_id).await? {
            total += self.store.size_of(&key).await?.unwrap_or(0);
        }
        Ok(total)
    }
}

pub type SharedLedger = Arc<TransferLedger>;
