//! Cancelable retry delay that reports the time remaining at a fixed cadence.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::events::{EventSink, TransferEvent};

/// Sleep for `delay`, emitting `retry:countdown` every `cadence` until it elapses.
///
/// Returns `false` if `cancel` fired first; the caller must treat the retry as disarmed.
pub async fn wait_with_countdown(
    delay: Duration,
    cadence: Duration,
    cancel: &CancellationToken,
    case_id: &str,
    sink: &dyn EventSink,
) -> bool {
    let cadence = cadence.max(Duration::from_millis(1));
    let mut remaining = delay;
    while !remaining.is_zero() {
        sink.emit(TransferEvent::RetryCountdown {
            case_id: case_id.to_string(),
            remaining_ms: remaining.as_millis() as u64,
        });
        let step = remaining.min(cadence);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(step) => {}
        }
        remaining -= step;
    }
    !cancel.is_cancelled()
}
