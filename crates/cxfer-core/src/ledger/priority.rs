//! Eviction scoring. Lower scores go first.

use super::entry::EntryMeta;

const HOUR_MS: u64 = 3_600_000;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Sessions above this priority lose one step per [`DEMOTE_AFTER_MS`] idle.
pub const DEMOTE_ABOVE: u8 = 5;
pub const DEMOTE_AFTER_MS: u64 = 2 * DAY_MS;

/// Priority after idle demotion. Never raises the stored value.
pub fn demoted_priority(meta: &EntryMeta, now_ms: u64) -> u8 {
    if meta.priority <= DEMOTE_ABOVE {
        return meta.priority;
    }
    let idle = now_ms.saturating_sub(meta.last_accessed_at);
    let steps = (idle / DEMOTE_AFTER_MS).min(u8::MAX as u64) as u8;
    meta.priority.saturating_sub(steps).max(DEMOTE_ABOVE)
}

/// Explicit priority plus small recency and frequency bonuses (each below one
/// priority step, so explicit priority dominates).
pub fn score(meta: &EntryMeta, now_ms: u64) -> f64 {
    let idle = now_ms.saturating_sub(meta.last_accessed_at);
    let recency = if idle < HOUR_MS {
        0.5
    } else if idle < DAY_MS {
        0.25
    } else {
        0.0
    };
    let frequency = ((1.0 + meta.access_count as f64).ln() / 10.0).min(0.4);
    demoted_priority(meta, now_ms) as f64 + recency + frequency
}
