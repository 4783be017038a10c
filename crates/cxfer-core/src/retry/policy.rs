use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;

/// Classification of a failed attempt, decided once at the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network-level failure (connection reset, DNS, refused).
    Network,
    /// Attempt exceeded its timeout.
    Timeout,
    /// 5xx-equivalent response.
    Server(u16),
    /// 4xx-equivalent response (includes 408 / 429, which are retryable).
    Client(u16),
    /// Explicit cancellation; never retried.
    Aborted,
}

impl ErrorClass {
    /// HTTP-like status code carried by this class, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ErrorClass::Server(s) | ErrorClass::Client(s) => Some(*s),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Network => write!(f, "network"),
            ErrorClass::Timeout => write!(f, "timeout"),
            ErrorClass::Server(s) => write!(f, "server HTTP {}", s),
            ErrorClass::Client(s) => write!(f, "client HTTP {}", s),
            ErrorClass::Aborted => write!(f, "aborted"),
        }
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Caller hook that can veto a retry: `(class, attempt) -> allowed`.
pub type RetryPredicate = Arc<dyn Fn(ErrorClass, u32) -> bool + Send + Sync>;

/// Exponential backoff policy with caps and optional jitter.
///
/// `attempt` counts retries already made for a case and starts at 0.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries allowed per case; `should_retry` is false once `attempt >= max_retries`.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor per attempt.
    pub backoff_factor: f64,
    /// Upper bound on the base (pre-jitter) delay.
    pub max_delay: Duration,
    /// Multiply the delay by a uniform factor in [0.5, 1.5].
    pub jitter: bool,
    /// Status codes that are worth retrying.
    pub retryable_statuses: Vec<u16>,
    /// Cadence of `retry:countdown` notifications.
    pub countdown_interval: Duration,
    predicate: Option<RetryPredicate>,
}

pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(300),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: true,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            countdown_interval: Duration::from_secs(1),
            predicate: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("retryable_statuses", &self.retryable_statuses)
            .field("countdown_interval", &self.countdown_interval)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            backoff_factor: cfg.backoff_factor.max(1.0),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter: cfg.jitter,
            retryable_statuses: cfg.retryable_statuses.clone(),
            countdown_interval: Duration::from_millis(cfg.countdown_interval_ms.max(1)),
            predicate: None,
        }
    }
}

impl RetryPolicy {
    /// Install a predicate that may reject otherwise-retryable errors.
    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Whether the class belongs to the retryable set, ignoring attempt counts.
    pub fn is_retryable(&self, class: ErrorClass) -> bool {
        match class {
            ErrorClass::Network | ErrorClass::Timeout => true,
            ErrorClass::Server(s) | ErrorClass::Client(s) => self.retryable_statuses.contains(&s),
            ErrorClass::Aborted => false,
        }
    }

    /// True when another attempt should be made for `class` after `attempt` retries.
    pub fn should_retry(&self, class: ErrorClass, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(class, attempt) {
                return false;
            }
        }
        self.is_retryable(class)
    }

    /// Backoff before jitter: `min(initial * factor^attempt, max_delay)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_millis() as f64;
        let exp = self.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let raw = initial * exp;
        let cap = self.max_delay.as_millis() as f64;
        let ms = if raw.is_finite() { raw.clamp(0.0, cap) } else { cap };
        Duration::from_millis(ms.floor() as u64)
    }

    /// Delay before the next attempt, with jitter when enabled.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::thread_rng())
    }

    /// Same as [`next_delay`](Self::next_delay) with a caller-provided RNG.
    pub fn next_delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let factor: f64 = rng.gen_range(0.5..=1.5);
        Duration::from_millis((base.as_millis() as f64 * factor).floor() as u64)
    }

    /// Combined decision: stop, or retry after a delay.
    pub fn decide(&self, class: ErrorClass, attempt: u32) -> RetryDecision {
        if self.should_retry(class, attempt) {
            RetryDecision::RetryAfter(self.next_delay(attempt))
        } else {
            RetryDecision::NoRetry
        }
    }
}
