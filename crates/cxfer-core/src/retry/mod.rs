//! Retry Controller.
//!
//! Error classification, exponential backoff with jitter, the per-case retry
//! state machine, and the cancelable countdown used while a retry is armed.
//! The scheduler and the finalize step share this policy.

mod case;
mod classify;
mod countdown;
mod policy;
mod run;

pub use case::{RetryCase, RetryCaseError, RetryStatus};
pub use classify::{classify_curl_error, classify_io_error, classify_status};
pub use countdown::wait_with_countdown;
pub use policy::{
    ErrorClass, RetryDecision, RetryPolicy, RetryPredicate, DEFAULT_RETRYABLE_STATUSES,
};
pub use run::run_with_retry;
