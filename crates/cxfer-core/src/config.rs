use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::retry::DEFAULT_RETRYABLE_STATUSES;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

/// Retry policy parameters (`[retry]` in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries per piece after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Growth factor per attempt.
    pub backoff_factor: f64,
    /// Cap on the pre-jitter delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Apply a uniform [0.5, 1.5] jitter factor.
    pub jitter: bool,
    /// HTTP-like statuses that are retried.
    pub retryable_statuses: Vec<u16>,
    /// Cadence of countdown notifications, in milliseconds.
    pub countdown_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 300,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
            jitter: true,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            countdown_interval_ms: 1_000,
        }
    }
}

/// Lower bound, default operating point and upper bound of one tunable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds<T> {
    pub min: T,
    pub default: T,
    pub max: T,
}

impl<T: Copy + Ord> Bounds<T> {
    /// Clamp `v` into `[min, max]`.
    pub fn clamp(&self, v: T) -> T {
        v.max(self.min).min(self.max)
    }

    /// Same bounds with `min <= default <= max` enforced.
    pub fn normalized(&self) -> Self {
        let min = self.min.min(self.max);
        let max = self.max.max(self.min);
        Self {
            min,
            default: self.default.max(min).min(max),
            max,
        }
    }
}

/// Upload-rate thresholds (kbps) for quality levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub excellent_kbps: f64,
    pub good_kbps: f64,
    pub fair_kbps: f64,
    pub poor_kbps: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            excellent_kbps: 10_000.0,
            good_kbps: 5_000.0,
            fair_kbps: 2_000.0,
            poor_kbps: 500.0,
        }
    }
}

/// Network condition governor (`[governor]` in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Run the probe loops at all. Without probe URLs probes are skipped and
    /// the governor only serves defaults.
    pub enabled: bool,
    /// Lightweight endpoint used for round-trip time (HEAD).
    pub ping_url: Option<String>,
    /// Endpoint that returns `?bytes=N` bytes for download-rate probes.
    pub download_url: Option<String>,
    /// Endpoint that accepts a sample upload.
    pub upload_url: Option<String>,
    pub poll_interval_ms: u64,
    /// Re-evaluate parameters from the rolling average this often.
    pub reevaluate_interval_ms: u64,
    /// Number of recent samples averaged for classification.
    pub window: usize,
    pub sample_size: u64,
    pub min_sample_size: u64,
    pub max_sample_size: u64,
    pub probe_timeout_ms: u64,
    pub concurrency: Bounds<usize>,
    pub piece_size: Bounds<u64>,
    pub max_retries: Bounds<u32>,
    pub thresholds: QualityThresholds,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ping_url: None,
            download_url: None,
            upload_url: None,
            poll_interval_ms: 30_000,
            reevaluate_interval_ms: 10_000,
            window: 5,
            sample_size: 200 * KIB,
            min_sample_size: 64 * KIB,
            max_sample_size: 2 * MIB,
            probe_timeout_ms: 15_000,
            concurrency: Bounds {
                min: 1,
                default: 3,
                max: 6,
            },
            piece_size: Bounds {
                min: 256 * KIB,
                default: MIB,
                max: 8 * MIB,
            },
            max_retries: Bounds {
                min: 2,
                default: 3,
                max: 8,
            },
            thresholds: QualityThresholds::default(),
        }
    }
}

/// Transfer ledger (`[ledger]` in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Lifetime of every written entry.
    pub ttl_secs: u64,
    /// Expiry sweep cadence.
    pub sweep_interval_secs: u64,
    /// Values larger than this are deflated before storage.
    pub compress_threshold_bytes: usize,
    /// Soft size limit for the store; `None` = only react to store capacity errors.
    pub max_total_bytes: Option<u64>,
    /// Fraction of `max_total_bytes` that triggers eviction.
    pub high_water: f64,
    /// Eviction stops once usage is below this fraction.
    pub low_water: f64,
    /// Attempts per ledger write (fixed schedule, not the transfer retry policy).
    pub write_attempts: u32,
    pub write_retry_delay_ms: u64,
    /// Priority given to sessions that do not specify one (1-10).
    pub default_priority: u8,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 7 * 24 * 3600,
            sweep_interval_secs: 30 * 60,
            compress_threshold_bytes: 10 * 1024,
            max_total_bytes: None,
            high_water: 0.9,
            low_water: 0.75,
            write_attempts: 3,
            write_retry_delay_ms: 100,
            default_priority: 5,
        }
    }
}

/// Per-session transfer settings (`[transfer]` in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Pieces in flight when no governor is attached.
    pub concurrency: usize,
    /// Piece size when no governor is attached.
    pub piece_size: u64,
    /// Timeout for one piece attempt.
    pub piece_timeout_ms: u64,
    /// Dispatch strictly in index order, one at a time.
    pub sequential: bool,
    /// Keep draining other pieces when one fails permanently.
    pub tolerate_partial_failure: bool,
    /// Abort in-flight pieces on pause instead of letting them finish.
    pub abort_in_flight_on_pause: bool,
    /// Send a SHA-256 of the payload with the finalize call.
    pub checksum: bool,
    /// Request method for piece uploads.
    pub method: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            piece_size: MIB,
            piece_timeout_ms: 60_000,
            sequential: false,
            tolerate_partial_failure: false,
            abort_in_flight_on_pause: false,
            checksum: false,
            method: "POST".to_string(),
        }
    }
}

/// Partial transfer settings supplied per call; `None` keeps the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferOverrides {
    pub concurrency: Option<usize>,
    pub piece_size: Option<u64>,
    pub piece_timeout_ms: Option<u64>,
    pub sequential: Option<bool>,
    pub tolerate_partial_failure: Option<bool>,
    pub abort_in_flight_on_pause: Option<bool>,
    pub checksum: Option<bool>,
    pub method: Option<String>,
}

impl TransferConfig {
    /// Apply `overrides` on top of `self`.
    pub fn merge(&self, overrides: &TransferOverrides) -> TransferConfig {
        TransferConfig {
            concurrency: overrides.concurrency.unwrap_or(self.concurrency).max(1),
            piece_size: overrides.piece_size.unwrap_or(self.piece_size).max(1),
            piece_timeout_ms: overrides.piece_timeout_ms.unwrap_or(self.piece_timeout_ms),
            sequential: overrides.sequential.unwrap_or(self.sequential),
            tolerate_partial_failure: overrides
                .tolerate_partial_failure
                .unwrap_or(self.tolerate_partial_failure),
            abort_in_flight_on_pause: overrides
                .abort_in_flight_on_pause
                .unwrap_or(self.abort_in_flight_on_pause),
            checksum: overrides.checksum.unwrap_or(self.checksum),
            method: overrides
                .method
                .clone()
                .unwrap_or_else(|| self.method.clone()),
        }
    }
}

/// Global configuration loaded from `~/.config/cxfer/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub governor: GovernorConfig,
    pub ledger: LedgerConfig,
    pub transfer: TransferConfig,
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("cxfer")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}

/// Load configuration from an explicit path.
pub fn load_from_path(path: &Path) -> Result<EngineConfig> {
    let data =
        fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}
