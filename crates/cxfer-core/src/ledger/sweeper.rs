//! Background expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::TransferLedger;

pub(super) struct SweeperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl TransferLedger {
    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until
    /// [`stop_sweeper`](Self::stop_sweeper). Replaces a running sweeper.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let token = CancellationToken::new();
        let ledger = Arc::clone(self);
        let stop = token.clone();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = ledger.sweep_expired().await {
                            tracing::warn!(error = %e, "ledger sweep failed");
                        }
                    }
                }
            }
            tracing::debug!("ledger sweeper stopped");
        });
        let previous = self
            .sweeper
            .lock()
            .ok()
            .and_then(|mut slot| slot.replace(SweeperHandle { token, task }));
        if let Some(old) = previous {
            old.token.cancel();
        }
    }

    /// Stop the sweeper and wait for an in-progress sweep to finish.
    pub async fn stop_sweeper(&self) {
        let handle = self.sweeper.lock().ok().and_then(|mut slot| slot.take());
        if let Some(h) = handle {
            h.token.cancel();
            let _ = h.task.await;
        }
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}
