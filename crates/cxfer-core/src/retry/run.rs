//! Retry loop: run an async operation until success or the policy says stop.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::case::RetryCase;
use super::countdown::wait_with_countdown;
use super::policy::RetryPolicy;
use crate::clock::unix_millis;
use crate::events::{EventSink, TransferEvent};
use crate::transport::TransportError;

/// Runs `f` until it succeeds, the policy refuses another attempt, or `cancel` fires.
///
/// `f` receives the retry count so far (0 on the first call). Between attempts the
/// backoff delay is waited out with countdown notifications.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    case_id: &str,
    cancel: &CancellationToken,
    sink: &dyn EventSink,
    mut f: F,
) -> Result<T, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut case = RetryCase::new(case_id);
    loop {
        match f(case.attempt).await {
            Ok(v) => {
                if case.attempt > 0 {
                    sink.emit(TransferEvent::RetrySuccess {
                        case_id: case.case_id.clone(),
                        attempt: case.attempt,
                    });
                }
                case.succeed();
                return Ok(v);
            }
            Err(e) => {
                case.record_failure(e.class);
                if !policy.should_retry(e.class, case.attempt) {
                    if case.attempt > 0 {
                        sink.emit(TransferEvent::RetryFailed {
                            case_id: case.case_id.clone(),
                            attempt: case.attempt,
                        });
                    }
                    case.fail();
                    return Err(e);
                }
                let delay = policy.next_delay(case.attempt);
                let attempt = case
                    .begin_retry(unix_millis() + delay.as_millis() as u64)
                    .map_err(|err| TransportError::aborted(err.to_string()))?;
                tracing::debug!(case_id, attempt, delay_ms = delay.as_millis() as u64, "retrying after {}", e);
                sink.emit(TransferEvent::RetryStart {
                    case_id: case.case_id.clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
                if !wait_with_countdown(delay, policy.countdown_interval, cancel, case_id, sink).await {
                    case.cancel();
                    return Err(TransportError::aborted("retry canceled"));
                }
                case.fire();
            }
        }
    }
}
