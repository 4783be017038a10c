//! Session coordinator: start, resume, pause, cancel and inspect sessions.
//!
//! Each session runs as its own tokio task (see [`super::pipeline`]). The
//! coordinator keeps the handles of running sessions and remembers recent
//! sessions it has driven, so a canceled session can be restarted from zero in
//! the same process. Payloads of completed sessions are released.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, TransferConfig, TransferOverrides};
use crate::error::TransferError;
use crate::events::{NullSink, SharedSink, TransferEvent};
use crate::governor::{AdaptiveParameterSet, NetworkGovernor};
use crate::ledger::SharedLedger;
use crate::payload::{FileOpener, PayloadOpener, SharedPayload};
use crate::retry::RetryPolicy;
use crate::session::{
    fingerprint, fingerprint_of, is_valid_session_id, new_session_id, SessionId, SessionStatus,
    TransferSession, TransferTarget,
};
use crate::transport::SharedTransport;

use super::control::ControlRegistry;
use super::handle::SessionHandle;
use super::pipeline::SessionRun;
use super::progress::ProgressTracker;

/// Per-call options for [`Coordinator::start`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub overrides: TransferOverrides,
    /// Ledger priority (1-10); the configured default when unset.
    pub priority: Option<u8>,
    /// Mint a new session even if the ledger holds one for the same payload.
    pub force_new: bool,
}

/// Sessions remembered per coordinator unless the builder says otherwise.
const DEFAULT_KNOWN_LIMIT: usize = 256;

struct Known {
    /// `None` once the session completed.
    payload: Option<SharedPayload>,
    last: TransferSession,
    seq: u64,
}

#[derive(Default)]
struct KnownSessions {
    entries: HashMap<SessionId, Known>,
    next_seq: u64,
}

impl KnownSessions {
    fn insert(&mut self, id: SessionId, payload: SharedPayload, last: TransferSession) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(id, Known { payload: Some(payload), last, seq });
    }

    /// Forget the oldest sessions outside `running` until at most `limit` remain.
    fn prune(&mut self, limit: usize, running: &HashSet<SessionId>) {
        if self.entries.len() <= limit {
            return;
        }
        let mut idle: Vec<(u64, SessionId)> = self
            .entries
            .iter()
            .filter(|(id, _)| !running.contains(*id))
            .map(|(id, k)| (k.seq, id.clone()))
            .collect();
        idle.sort_unstable();
        let excess = self.entries.len() - limit;
        for (_, id) in idle.into_iter().take(excess) {
            tracing::trace!(session_id = %id, "forgetting session");
            self.entries.remove(&id);
        }
    }
}

struct Inner {
    transport: SharedTransport,
    ledger: SharedLedger,
    clock: Arc<dyn Clock>,
    sink: SharedSink,
    policy: RetryPolicy,
    defaults: TransferConfig,
    default_priority: u8,
    params: Option<watch::Receiver<AdaptiveParameterSet>>,
    opener: Arc<dyn PayloadOpener>,
    controls: ControlRegistry,
    running: Mutex<HashMap<SessionId, SessionHandle>>,
    known: Mutex<KnownSessions>,
    known_limit: usize,
}

impl Inner {
    fn running(&self) -> MutexGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn known(&self) -> MutexGuard<'_, KnownSessions> {
        self.known.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Builder for [`Coordinator`]. Only the transport and ledger are required.
pub struct CoordinatorBuilder {
    transport: SharedTransport,
    ledger: SharedLedger,
    clock: Arc<dyn Clock>,
    sink: SharedSink,
    policy: RetryPolicy,
    defaults: TransferConfig,
    default_priority: u8,
    params: Option<watch::Receiver<AdaptiveParameterSet>>,
    opener: Arc<dyn PayloadOpener>,
    known_limit: usize,
}

impl CoordinatorBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn transfer_defaults(mut self, defaults: TransferConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn default_priority(mut self, priority: u8) -> Self {
        self.default_priority = priority.clamp(1, 10);
        self
    }

    /// Follow the governor's parameters: concurrency and retry budget change
    /// live, piece size applies to sessions started afterwards.
    pub fn governor(self, governor: &NetworkGovernor) -> Self {
        self.parameter_feed(governor.subscribe())
    }

    pub fn parameter_feed(mut self, rx: watch::Receiver<AdaptiveParameterSet>) -> Self {
        self.params = Some(rx);
        self
    }

    /// How payloads are reopened on resume after a restart.
    pub fn opener(mut self, opener: Arc<dyn PayloadOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// How many finished or idle sessions stay known to this process.
    pub fn known_limit(mut self, limit: usize) -> Self {
        self.known_limit = limit;
        self
    }

    pub fn build(self) -> Coordinator {
        Coordinator {
            inner: Arc::new(Inner {
                transport: self.transport,
                ledger: self.ledger,
                clock: self.clock,
                sink: self.sink,
                policy: self.policy,
                defaults: self.defaults,
                default_priority: self.default_priority,
                params: self.params,
                opener: self.opener,
                controls: ControlRegistry::new(),
                running: Mutex::new(HashMap::new()),
                known: Mutex::new(KnownSessions::default()),
                known_limit: self.known_limit,
            }),
        }
    }
}

/// Drives transfer sessions against one transport and one ledger.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn builder(transport: SharedTransport, ledger: SharedLedger) -> CoordinatorBuilder {
        CoordinatorBuilder {
            transport,
            ledger,
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullSink),
            policy: RetryPolicy::default(),
            defaults: TransferConfig::default(),
            default_priority: 5,
            params: None,
            opener: Arc::new(FileOpener),
            known_limit: DEFAULT_KNOWN_LIMIT,
        }
    }

    /// Builder preset from the `[retry]`, `[transfer]` and `[ledger]` sections.
    pub fn from_config(
        transport: SharedTransport,
        ledger: SharedLedger,
        config: &EngineConfig,
    ) -> CoordinatorBuilder {
        Self::builder(transport, ledger)
            .retry_policy(RetryPolicy::from(&config.retry))
            .transfer_defaults(config.transfer.clone())
            .default_priority(config.ledger.default_priority)
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// Start transferring `payload` to `target`.
    ///
    /// A session already running for the same payload is returned as is; one
    /// left in the ledger (paused, failed, or interrupted) is resumed, unless
    /// `force_new` is set.
    pub async fn start(
        &self,
        payload: SharedPayload,
        target: TransferTarget,
        options: StartOptions,
    ) -> Result<SessionHandle, TransferError> {
        let descriptor = payload.descriptor().clone();
        if !options.force_new {
            let fp = fingerprint(&descriptor);
            if let Some(handle) = self.running_for(&fp) {
                tracing::debug!(session_id = handle.session_id(), "payload already transferring");
                return Ok(handle);
            }
            if let Some(session) = self.resumable_for(&fp, descriptor.size).await? {
                tracing::info!(session_id = %session.session_id, "resuming earlier session for payload");
                return Ok(self.launch(session, payload));
            }
        }

        let settings = self.inner.defaults.merge(&options.overrides);
        let piece_size = match (options.overrides.piece_size, &self.inner.params) {
            (Some(size), _) => size,
            (None, Some(rx)) => rx.borrow().piece_size,
            (None, None) => settings.piece_size,
        };
        let priority = options.priority.unwrap_or(self.inner.default_priority);
        let session = TransferSession::new(
            new_session_id(&descriptor),
            descriptor,
            target,
            settings,
            piece_size,
            priority,
            self.now(),
        );
        self.inner.ledger.save_session_state(&session).await?;
        tracing::info!(
            session_id = %session.session_id,
            payload = %session.payload.name,
            size = session.payload_size,
            pieces = session.total_pieces,
            "session created"
        );
        Ok(self.launch(session, payload))
    }

    fn running_for(&self, fp: &str) -> Option<SessionHandle> {
        self.inner
            .running()
            .iter()
            .find(|(id, _)| fingerprint_of(id) == fp)
            .map(|(_, h)| h.clone())
    }

    async fn resumable_for(
        &self,
        fp: &str,
        size: u64,
    ) -> Result<Option<TransferSession>, TransferError> {
        let mut candidates: Vec<TransferSession> = self
            .inner
            .ledger
            .list_active_sessions()
            .await?
            .into_iter()
            .filter(|s| fingerprint_of(&s.session_id) == fp)
            .filter(|s| s.payload_size == size && s.status.is_resumable())
            .collect();
        candidates.sort_by_key(|s| std::cmp::Reverse(s.updated_at));
        Ok(candidates.into_iter().next())
    }

    fn launch(&self, session: TransferSession, payload: SharedPayload) -> SessionHandle {
        let id = session.session_id.clone();
        let control = self.inner.controls.register(&id);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.clone());
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let progress = Arc::new(ProgressTracker::new());
        let handle = SessionHandle::new(snapshot_rx.clone(), outcome_rx, Arc::clone(&progress));

        let running: HashSet<SessionId> = {
            let mut running = self.inner.running();
            running.insert(id.clone(), handle.clone());
            running.keys().cloned().collect()
        };
        {
            let mut known = self.inner.known();
            known.insert(id.clone(), Arc::clone(&payload), session.clone());
            known.prune(self.inner.known_limit, &running);
        }

        let run = SessionRun {
            session,
            payload,
            transport: Arc::clone(&self.inner.transport),
            ledger: Arc::clone(&self.inner.ledger),
            clock: Arc::clone(&self.inner.clock),
            sink: Arc::clone(&self.inner.sink),
            policy: self.inner.policy.clone(),
            params: self.inner.params.clone(),
            control: Arc::clone(&control),
            snapshot: snapshot_tx,
            progress,
        };
        let inner = Arc::clone(&self.inner);
        let mine = handle.clone();
        tokio::spawn(async move {
            let outcome = run.run().await;
            let last = snapshot_rx.borrow().clone();
            inner.controls.unregister(&id, &control);
            {
                let mut running = inner.running();
                if running.get(&id).is_some_and(|h| h.same_run(&mine)) {
                    running.remove(&id);
                }
            }
            if let Some(known) = inner.known().entries.get_mut(&id) {
                if matches!(outcome, super::SessionOutcome::Completed) {
                    known.payload = None;
                }
                known.last = last;
            }
            outcome_tx.send_replace(Some(outcome));
        });
        handle
    }

    /// Resume a paused, failed or interrupted session.
    ///
    /// A session canceled earlier in this process starts again from zero.
    /// Returns `NotFound` when neither the ledger nor this process knows the id.
    pub async fn resume(&self, session_id: &str) -> Result<SessionHandle, TransferError> {
        if !is_valid_session_id(session_id) {
            return Err(TransferError::NotFound(session_id.to_string()));
        }
        if let Some(handle) = self.inner.running().get(session_id).cloned() {
            return Ok(handle);
        }
        let known = self
            .inner
            .known()
            .entries
            .get(session_id)
            .map(|k| (k.payload.clone(), k.last.clone()));

        if let Some(session) = self.inner.ledger.load_session(session_id).await? {
            if !session.status.is_resumable() {
                return Err(TransferError::InvalidState {
                    id: session.session_id,
                    status: session.status,
                    action: "resume",
                });
            }
            let payload = match known {
                Some((Some(payload), _)) => payload,
                _ => self.inner.opener.open(&session.payload).await?,
            };
            tracing::info!(
                session_id,
                done = session.completed_pieces.len(),
                total = session.total_pieces,
                "resuming session"
            );
            return Ok(self.launch(session, payload));
        }

        match known {
            None => Err(TransferError::NotFound(session_id.to_string())),
            Some((_, last)) if last.status == SessionStatus::Completed => {
                Err(TransferError::InvalidState {
                    id: last.session_id,
                    status: last.status,
                    action: "resume",
                })
            }
            Some((known_payload, mut last)) => {
                // Canceled, or dropped from the ledger by expiry or eviction.
                tracing::info!(session_id, previous = last.status.as_str(), "restarting session from zero");
                let payload = match known_payload {
                    Some(payload) => payload,
                    None => self.inner.opener.open(&last.payload).await?,
                };
                last.reset(self.now());
                self.inner.ledger.save_session_state(&last).await?;
                Ok(self.launch(last, payload))
            }
        }
    }

    /// Stop dispatching pieces. Progress stays in the ledger; `resume` continues.
    pub async fn pause(&self, session_id: &str) -> Result<(), TransferError> {
        if self.inner.controls.request_pause(session_id) {
            tracing::info!(session_id, "pause requested");
            return Ok(());
        }
        if self.inner.ledger.get_session_state(session_id).await?.is_some() {
            return Ok(());
        }
        let status = self.inner.known().entries.get(session_id).map(|k| k.last.status);
        match status {
            Some(status) => Err(TransferError::InvalidState {
                id: session_id.to_string(),
                status,
                action: "pause",
            }),
            None => Err(TransferError::NotFound(session_id.to_string())),
        }
    }

    /// Abort the session and delete its ledger entries. Waits for a running
    /// session task to wind down so nothing is written afterwards.
    pub async fn cancel(&self, session_id: &str) -> Result<(), TransferError> {
        let running = self.inner.running().get(session_id).cloned();
        if let Some(handle) = running {
            self.inner.controls.request_cancel(session_id);
            tracing::info!(session_id, "cancel requested");
            let outcome = handle.wait().await;
            if !matches!(outcome, super::SessionOutcome::Canceled) {
                // Finished before the request landed; clear whatever is left.
                self.cancel_idle(session_id).await?;
            }
            return Ok(());
        }
        self.cancel_idle(session_id).await
    }

    async fn cancel_idle(&self, session_id: &str) -> Result<(), TransferError> {
        let in_ledger = self.inner.ledger.get_session_state(session_id).await?.is_some();
        let removed = self.inner.ledger.delete_session(session_id).await?;
        let previous = self.inner.known().entries.get_mut(session_id).map(|k| {
            let prev = k.last.status;
            let now = self.now();
            k.last.status = SessionStatus::Canceled;
            k.last.updated_at = now;
            prev
        });
        match previous {
            Some(SessionStatus::Canceled) if !in_ledger => return Ok(()),
            None if !in_ledger && removed == 0 => {
                return Err(TransferError::NotFound(session_id.to_string()))
            }
            _ => {}
        }
        tracing::info!(session_id, entries = removed, "session canceled");
        self.inner.sink.emit(TransferEvent::SessionCanceled {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Current state: the live snapshot for running sessions, else the ledger
    /// record, else the last state this process saw.
    pub async fn status(&self, session_id: &str) -> Result<TransferSession, TransferError> {
        if let Some(handle) = self.inner.running().get(session_id).cloned() {
            return Ok(handle.snapshot());
        }
        if let Some(session) = self.inner.ledger.load_session(session_id).await? {
            return Ok(session);
        }
        self.inner
            .known()
            .entries
            .get(session_id)
            .map(|k| k.last.clone())
            .ok_or_else(|| TransferError::NotFound(session_id.to_string()))
    }

    /// Running sessions plus every session recorded in the ledger, oldest first.
    pub async fn list(&self) -> Result<Vec<TransferSession>, TransferError> {
        let mut out: Vec<TransferSession> = self
            .inner
            .running()
            .values()
            .map(|h| h.snapshot())
            .collect();
        for session in self.inner.ledger.list_active_sessions().await? {
            if !out.iter().any(|s| s.session_id == session.session_id) {
                out.push(session);
            }
        }
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(out)
    }

    /// Handle of a session running in this process.
    pub fn handle(&self, session_id: &str) -> Option<SessionHandle> {
        self.inner.running().get(session_id).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.inner.running().len()
    }

    /// Pause every running session and wait for each to park.
    pub async fn pause_all(&self) {
        let handles: Vec<SessionHandle> = self.inner.running().values().cloned().collect();
        for h in &handles {
            self.inner.controls.request_pause(h.session_id());
        }
        for h in handles {
            h.wait().await;
        }
    }
}
