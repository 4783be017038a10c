//! The governor itself: sample history, classification, parameter pushes and
//! the two background loops (probe, re-evaluate).

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::params::{parameters_for, AdaptiveParameterSet, ParameterOverride};
use super::probe::Prober;
use super::quality::{classify, QualityLevel};
use super::sample::{NetworkSample, SampleWindow};
use crate::clock::Clock;
use crate::config::GovernorConfig;
use crate::events::{SharedSink, TransferEvent};
use crate::transport::SharedTransport;

struct State {
    window: SampleWindow,
    sample_size: u64,
    quality: QualityLevel,
    /// Manual override in force until the next quality change.
    overridden: bool,
}

struct Inner {
    config: GovernorConfig,
    prober: Prober,
    clock: Arc<dyn Clock>,
    sink: SharedSink,
    state: Mutex<State>,
    params: watch::Sender<AdaptiveParameterSet>,
}

struct Loops {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Samples link quality and publishes [`AdaptiveParameterSet`]s.
///
/// Starts at the Fair (default) operating point until the first sample.
pub struct NetworkGovernor {
    inner: Arc<Inner>,
    loops: Mutex<Option<Loops>>,
}

impl NetworkGovernor {
    pub fn new(
        transport: SharedTransport,
        config: GovernorConfig,
        clock: Arc<dyn Clock>,
        sink: SharedSink,
    ) -> Self {
        let initial = parameters_for(QualityLevel::Fair, &config);
        let (params, _) = watch::channel(initial);
        let sample_size = config
            .sample_size
            .clamp(config.min_sample_size, config.max_sample_size.max(config.min_sample_size));
        let inner = Inner {
            prober: Prober::new(transport, &config),
            state: Mutex::new(State {
                window: SampleWindow::new(config.window),
                sample_size,
                quality: QualityLevel::Fair,
                overridden: false,
            }),
            config,
            clock,
            sink,
            params,
        };
        Self {
            inner: Arc::new(inner),
            loops: Mutex::new(None),
        }
    }

    pub fn current_parameters(&self) -> AdaptiveParameterSet {
        *self.inner.params.borrow()
    }

    /// Receiver that sees every published parameter set.
    pub fn subscribe(&self) -> watch::Receiver<AdaptiveParameterSet> {
        self.inner.params.subscribe()
    }

    pub fn quality(&self) -> QualityLevel {
        self.inner.lock().quality
    }

    pub fn history(&self) -> Vec<NetworkSample> {
        self.inner.lock().window.to_vec()
    }

    /// Size of the next probe transfer in bytes.
    pub fn sample_size(&self) -> u64 {
        self.inner.lock().sample_size
    }

    /// Probe once, record the sample (an offline one on failure) and re-evaluate.
    pub async fn run_probe(&self) -> NetworkSample {
        self.inner.probe_once(&CancellationToken::new()).await
    }

    /// Re-classify from the current window and publish if anything changed.
    pub fn reevaluate(&self) -> AdaptiveParameterSet {
        self.inner.reevaluate()
    }

    /// Manual override, clamped to bounds. Holds until the quality level changes.
    pub fn set_parameters(&self, partial: ParameterOverride) -> AdaptiveParameterSet {
        let current = self.current_parameters();
        let next = current.with_override(&partial, &self.inner.config);
        self.inner.lock().overridden = true;
        self.inner.publish(current, next);
        tracing::info!(
            concurrency = next.concurrency,
            piece_size = next.piece_size,
            max_retries = next.max_retries,
            "governor parameters overridden"
        );
        next
    }

    /// Start the probe loop (every `poll_interval`, first probe immediately) and
    /// the re-evaluation loop. Restarts the loops if already running.
    pub fn start(&self, poll_interval: Duration) {
        if !self.inner.prober.has_endpoints() {
            tracing::info!("no probe endpoints configured, governor serves default parameters");
        }
        let token = CancellationToken::new();
        let poll = poll_interval.max(Duration::from_millis(1));
        let reeval = Duration::from_millis(self.inner.config.reevaluate_interval_ms.max(1));

        let probe_task = {
            let inner = Arc::clone(&self.inner);
            let stop = token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(poll);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            inner.probe_once(&stop).await;
                        }
                    }
                }
            })
        };
        let reeval_task = {
            let inner = Arc::clone(&self.inner);
            let stop = token.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now() + reeval;
                let mut ticker = tokio::time::interval_at(start, reeval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            inner.reevaluate();
                        }
                    }
                }
            })
        };

        let previous = self.loops.lock().ok().and_then(|mut slot| {
            slot.replace(Loops {
                token,
                tasks: vec![probe_task, reeval_task],
            })
        });
        if let Some(old) = previous {
            old.token.cancel();
        }
        tracing::info!(poll_ms = poll.as_millis() as u64, "governor started");
    }

    /// Stop both loops and wait for them to exit.
    pub async fn stop(&self) {
        let loops = self.loops.lock().ok().and_then(|mut slot| slot.take());
        if let Some(l) = loops {
            l.token.cancel();
            for t in l.tasks {
                let _ = t.await;
            }
            tracing::info!("governor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.loops.lock().map(|l| l.is_some()).unwrap_or(false)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Poisoning is ignored; State has no invariants a panic can break.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Without endpoints nothing is measured: the returned sample is not
    /// recorded and parameters stay where they are.
    async fn probe_once(&self, abort: &CancellationToken) -> NetworkSample {
        if !self.prober.has_endpoints() {
            tracing::debug!("no probe endpoints configured, skipping probe");
            return NetworkSample::offline(self.clock.now_ms());
        }
        let size = self.lock().sample_size;
        let sample = match self.prober.probe(size, self.clock.as_ref(), abort).await {
            Ok(s) => {
                tracing::debug!(
                    up_kbps = s.upload_rate_kbps,
                    down_kbps = s.download_rate_kbps,
                    rtt_ms = ?s.rtt_ms,
                    sample_size = size,
                    "network probe"
                );
                s
            }
            Err(e) => {
                tracing::info!(error = %e, "network probe failed, recording offline sample");
                NetworkSample::offline(self.clock.now_ms())
            }
        };
        self.lock().window.push(sample);
        let params = self.reevaluate();

        let mut state = self.lock();
        let factor = params.quality_level.sample_factor();
        let min = self.config.min_sample_size;
        let max = self.config.max_sample_size.max(min);
        state.sample_size = ((state.sample_size as f64 * factor) as u64).clamp(min, max);
        sample
    }

    fn reevaluate(&self) -> AdaptiveParameterSet {
        let current = *self.params.borrow();
        let (old_quality, new_quality, overridden) = {
            let mut state = self.lock();
            let Some(avg) = state.window.average_kbps() else {
                return current;
            };
            let latest_failed = state.window.latest().is_some_and(NetworkSample::is_offline);
            let quality = if latest_failed {
                QualityLevel::Offline
            } else {
                classify(avg, &self.config.thresholds)
            };
            let old = state.quality;
            if quality != old {
                state.quality = quality;
                state.overridden = false;
            }
            (old, quality, state.overridden)
        };

        if new_quality != old_quality {
            tracing::info!(old = %old_quality, new = %new_quality, "network quality changed");
            self.sink.emit(TransferEvent::QualityChanged {
                old: old_quality,
                new: new_quality,
            });
        }
        if overridden {
            return current;
        }
        let next = parameters_for(new_quality, &self.config);
        self.publish(current, next);
        next
    }

    fn publish(&self, old: AdaptiveParameterSet, new: AdaptiveParameterSet) {
        if old == new {
            return;
        }
        self.params.send_replace(new);
        tracing::debug!(
            concurrency = new.concurrency,
            piece_size = new.piece_size,
            max_retries = new.max_retries,
            quality = %new.quality_level,
            "adaptive parameters adjusted"
        );
        self.sink.emit(TransferEvent::ParamsAdjusted { old, new });
    }
}
