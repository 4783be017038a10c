//! Drives one session: a bounded pool of piece sends plus armed retry timers.
//!
//! Pieces run in a `JoinSet` capped at the current concurrency. A failed piece
//! that is worth retrying waits in a separate timer set, holding no slot, and
//! re-enters the front of the queue when its delay elapses.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::clock::Clock;
use crate::error::TransferError;
use crate::events::{SharedSink, TransferEvent};
use crate::governor::AdaptiveParameterSet;
use crate::ledger::SharedLedger;
use crate::payload::SharedPayload;
use crate::retry::{wait_with_countdown, ErrorClass, RetryCase, RetryPolicy};
use crate::segmenter::{plan_pieces, Piece};
use crate::session::{PieceState, SessionStatus, TransferSession};
use crate::transport::{Method, SharedTransport};

use super::control::SessionControl;
use super::finalize::finalize;
use super::piece::{PieceFailure, PieceSender};
use super::progress::ProgressTracker;

/// How a run of a session ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed,
    /// Stopped on request; progress is in the ledger.
    Paused,
    Canceled,
    /// `index` is the first piece that failed permanently, or `None` when the
    /// finalize step failed.
    Failed {
        index: Option<u64>,
        error: Arc<TransferError>,
    },
}

impl SessionOutcome {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionOutcome::Completed => SessionStatus::Completed,
            SessionOutcome::Paused => SessionStatus::Paused,
            SessionOutcome::Canceled => SessionStatus::Canceled,
            SessionOutcome::Failed { .. } => SessionStatus::Failed,
        }
    }
}

type PieceResult = (u64, Result<u64, PieceFailure>);

/// Per-run bookkeeping that only the session task touches.
#[derive(Default)]
struct RunState {
    pending: VecDeque<u64>,
    cases: HashMap<u64, RetryCase>,
    failed: Vec<u64>,
    first_failure: Option<(Option<u64>, TransferError)>,
    /// No further dispatch after a permanent failure.
    halted: bool,
    pausing: bool,
}

impl RunState {
    fn record_failure(&mut self, index: Option<u64>, error: TransferError) {
        if let Some(i) = index {
            self.failed.push(i);
        }
        if self.first_failure.is_none() {
            self.first_failure = Some((index, error));
        }
    }
}

pub(crate) struct SessionRun {
    pub session: TransferSession,
    pub payload: SharedPayload,
    pub transport: SharedTransport,
    pub ledger: SharedLedger,
    pub clock: Arc<dyn Clock>,
    pub sink: SharedSink,
    pub policy: RetryPolicy,
    pub params: Option<watch::Receiver<AdaptiveParameterSet>>,
    pub control: Arc<SessionControl>,
    pub snapshot: watch::Sender<TransferSession>,
    pub progress: Arc<ProgressTracker>,
}

async fn params_changed(
    rx: &mut Option<watch::Receiver<AdaptiveParameterSet>>,
) -> Result<(), watch::error::RecvError> {
    match rx {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}

impl SessionRun {
    pub(crate) async fn run(mut self) -> SessionOutcome {
        let span = tracing::info_span!("session", session_id = %self.session.session_id);
        self.drive().instrument(span).await
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    fn id(&self) -> &str {
        &self.session.session_id
    }

    fn concurrency(&self) -> usize {
        if self.session.settings.sequential {
            return 1;
        }
        match &self.params {
            Some(rx) => rx.borrow().concurrency,
            None => self.session.settings.concurrency,
        }
        .max(1)
    }

    /// Policy for piece retries; an attached governor supplies the retry budget.
    fn piece_policy(&self) -> RetryPolicy {
        let mut policy = self.policy.clone();
        if let Some(rx) = &self.params {
            policy.max_retries = rx.borrow().max_retries;
        }
        policy
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.session.clone());
    }

    async fn persist(&self) {
        if let Err(e) = self.ledger.save_session_state(&self.session).await {
            tracing::warn!(error = %e, "could not persist session state");
        }
    }

    async fn persist_retries(&self, cases: &HashMap<u64, RetryCase>) {
        let mut open: Vec<RetryCase> = cases
            .values()
            .filter(|c| !c.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.case_id.cmp(&b.case_id));
        if let Err(e) = self
            .ledger
            .save_retry_state(self.id(), &open, self.session.priority)
            .await
        {
            tracing::warn!(error = %e, "could not persist retry state");
        }
    }

    /// Retry cases left open by an earlier run, keyed by piece index.
    async fn restore_retries(&self) -> HashMap<u64, RetryCase> {
        let cases = match self.ledger.get_retry_state(self.id()).await {
            Ok(cases) => cases,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable retry state");
                return HashMap::new();
            }
        };
        cases
            .into_iter()
            .filter(|c| !c.status.is_terminal())
            .filter_map(|mut c| {
                let index = c.case_id.rsplit(':').next()?.parse::<u64>().ok()?;
                if self.session.completed_pieces.contains(&index) {
                    return None;
                }
                c.fire();
                Some((index, c))
            })
            .collect()
    }

    fn method(&self) -> Method {
        match self.session.settings.method.parse::<Method>() {
            Ok(m) => m,
            Err(_) => {
                tracing::warn!(method = %self.session.settings.method, "unknown method, using POST");
                Method::Post
            }
        }
    }

    async fn drive(&mut self) -> SessionOutcome {
        let sender = PieceSender {
            transport: Arc::clone(&self.transport),
            payload: Arc::clone(&self.payload),
            target: self.session.target.clone(),
            method: self.method(),
            session_id: self.session.session_id.clone(),
            payload_size: self.session.payload_size,
            timeout: Duration::from_millis(self.session.settings.piece_timeout_ms.max(1)),
        };
        let plan = plan_pieces(self.session.payload_size, self.session.piece_size);
        let control = Arc::clone(&self.control);
        let timer_token = control.cancel_token().child_token();

        let mut st = RunState {
            pending: self.session.remaining_pieces().into(),
            cases: self.restore_retries().await,
            ..RunState::default()
        };
        let mut in_flight: JoinSet<PieceResult> = JoinSet::new();
        let mut timers: JoinSet<(u64, bool)> = JoinSet::new();

        self.session.status = SessionStatus::Transferring;
        self.session.updated_at = self.now();
        self.session.failed_pieces.clear();
        self.session.last_error = None;
        self.progress.reset(&self.session);
        self.persist().await;
        self.publish();
        tracing::info!(
            total_pieces = self.session.total_pieces,
            remaining = st.pending.len(),
            piece_size = self.session.piece_size,
            "session running"
        );

        loop {
            if !st.halted && !st.pausing && !control.is_paused() {
                self.dispatch(&mut st, &mut in_flight, &timers, &sender, &plan);
            }
            if in_flight.is_empty() && timers.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = control.cancel_token().cancelled() => {
                    in_flight.abort_all();
                    timers.abort_all();
                    while in_flight.join_next().await.is_some() {}
                    while timers.join_next().await.is_some() {}
                    return self.finish_canceled().await;
                }
                _ = control.pause_token().cancelled(), if !st.pausing => {
                    st.pausing = true;
                    timer_token.cancel();
                    if self.session.settings.abort_in_flight_on_pause {
                        control.abort_pieces();
                    }
                    tracing::info!(in_flight = in_flight.len(), "pausing");
                }
                Some(joined) = in_flight.join_next() => match joined {
                    Ok((index, result)) => {
                        self.on_piece_result(&mut st, index, result, &mut timers, &timer_token).await;
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => {
                        tracing::error!(error = %e, "piece task failed");
                        st.record_failure(None, TransferError::Network(format!("piece task: {}", e)));
                        st.halted = true;
                        timer_token.cancel();
                    }
                },
                Some(joined) = timers.join_next() => {
                    if let Ok((index, fired)) = joined {
                        if let Some(case) = st.cases.get_mut(&index) {
                            // Back to Pending either way; a paused run persists it for the next one.
                            case.fire();
                        }
                        self.progress.set_state(index, PieceState::Pending);
                        if fired && !st.pausing && !st.halted {
                            st.pending.push_front(index);
                        }
                    }
                }
                res = params_changed(&mut self.params) => {
                    if res.is_err() {
                        // Governor gone; keep its last parameters.
                        tracing::debug!("parameter feed closed");
                        if let Some(rx) = self.params.take() {
                            let p = *rx.borrow();
                            self.session.settings.concurrency = p.concurrency;
                            self.policy.max_retries = p.max_retries;
                        }
                    } else {
                        tracing::debug!(concurrency = self.concurrency(), "parameters updated");
                    }
                }
            }
        }
        self.progress.clear();

        if control.is_canceled() {
            return self.finish_canceled().await;
        }
        if st.pausing || control.is_paused() {
            return self.finish_paused(&st).await;
        }
        if let Some((index, error)) = st.first_failure.take() {
            return self.finish_failed(&st, index, error).await;
        }
        if !self.session.all_pieces_done() {
            tracing::warn!(
                remaining = self.session.remaining_pieces().len(),
                "pipeline drained with pieces left; parking session"
            );
            return self.finish_paused(&st).await;
        }

        let outcome = finalize(
            &self.session,
            &self.payload,
            &self.transport,
            &self.policy,
            control.cancel_token(),
            self.sink.as_ref(),
        )
        .await;
        match outcome {
            Ok(()) => self.finish_completed().await,
            Err(_) if control.is_canceled() => self.finish_canceled().await,
            Err(e) => {
                tracing::warn!(error = %e, "finalize failed");
                self.finish_failed(&st, None, e).await
            }
        }
    }

    fn dispatch(
        &self,
        st: &mut RunState,
        in_flight: &mut JoinSet<PieceResult>,
        timers: &JoinSet<(u64, bool)>,
        sender: &PieceSender,
        plan: &[Piece],
    ) {
        let limit = self.concurrency();
        while in_flight.len() < limit {
            // Sequential: a piece waiting on a retry blocks everything after it.
            if self.session.settings.sequential && !timers.is_empty() {
                break;
            }
            let Some(index) = st.pending.pop_front() else {
                break;
            };
            let Some(piece) = plan.get(index as usize).copied() else {
                continue;
            };
            let attempt = st.cases.get(&index).map(|c| c.attempt).unwrap_or(0);
            tracing::debug!(index, attempt, "piece start");
            self.sink.emit(TransferEvent::PieceStart {
                session_id: self.session.session_id.clone(),
                index,
                attempt,
            });
            let token = self.control.piece_token();
            let counter = self.progress.begin(index);
            let sender = sender.clone();
            in_flight.spawn(async move { (index, sender.send(piece, token, counter).await) });
        }
        debug_assert_eq!(self.progress.count(PieceState::InFlight), in_flight.len());
    }

    async fn on_piece_result(
        &mut self,
        st: &mut RunState,
        index: u64,
        result: Result<u64, PieceFailure>,
        timers: &mut JoinSet<(u64, bool)>,
        timer_token: &tokio_util::sync::CancellationToken,
    ) {
        match result {
            Ok(bytes) => {
                self.progress.finish(index, PieceState::Done);
                self.on_piece_done(st, index, bytes).await
            }
            Err(PieceFailure::Payload(e)) => {
                self.progress.finish(index, PieceState::PermanentlyFailed);
                tracing::error!(index, error = %e, "payload read failed");
                st.record_failure(Some(index), TransferError::Payload(e));
                st.halted = !self.session.settings.tolerate_partial_failure;
                if st.halted {
                    timer_token.cancel();
                }
            }
            Err(PieceFailure::Transport(e)) => {
                self.progress.finish(index, PieceState::Pending);
                if e.class == ErrorClass::Aborted && (st.pausing || self.control.is_canceled()) {
                    tracing::debug!(index, "piece abandoned");
                    return;
                }
                let case = st
                    .cases
                    .entry(index)
                    .or_insert_with(|| RetryCase::new(format!("{}:{}", self.session.session_id, index)));
                case.record_failure(e.class);
                tracing::debug!(index, attempt = case.attempt, class = %e.class, "piece error: {}", e.message);
                self.sink.emit(TransferEvent::PieceError {
                    session_id: self.session.session_id.clone(),
                    index,
                    attempt: case.attempt,
                    class: e.class,
                    message: e.message.clone(),
                });
                if st.pausing || st.halted {
                    return;
                }

                let policy = self.piece_policy();
                if policy.should_retry(e.class, case.attempt) {
                    let delay = policy.next_delay(case.attempt);
                    let now = self.clock.now_ms();
                    match case.begin_retry(now + delay.as_millis() as u64) {
                        Ok(attempt) => {
                            let case_id = case.case_id.clone();
                            self.session.record_retry(now);
                            self.sink.emit(TransferEvent::RetryStart {
                                case_id: case_id.clone(),
                                attempt,
                                delay_ms: delay.as_millis() as u64,
                            });
                            let sink = Arc::clone(&self.sink);
                            let token = timer_token.clone();
                            let cadence = policy.countdown_interval;
                            timers.spawn(async move {
                                let fired =
                                    wait_with_countdown(delay, cadence, &token, &case_id, sink.as_ref()).await;
                                (index, fired)
                            });
                            self.progress.set_state(index, PieceState::ErrorAwaitingRetry);
                            self.persist_retries(&st.cases).await;
                            return;
                        }
                        Err(err) => tracing::warn!(index, error = %err, "could not arm retry"),
                    }
                }

                // Permanent.
                let attempts = case.attempt + 1;
                if case.attempt > 0 {
                    self.sink.emit(TransferEvent::RetryFailed {
                        case_id: case.case_id.clone(),
                        attempt: case.attempt,
                    });
                }
                case.fail();
                self.progress.set_state(index, PieceState::PermanentlyFailed);
                tracing::warn!(index, attempts, class = %e.class, "piece failed permanently");
                st.record_failure(
                    Some(index),
                    TransferError::PermanentFailure {
                        index,
                        attempts,
                        last: e.class,
                    },
                );
                if !self.session.settings.tolerate_partial_failure {
                    st.halted = true;
                    timer_token.cancel();
                }
                self.persist_retries(&st.cases).await;
            }
        }
    }

    async fn on_piece_done(&mut self, st: &mut RunState, index: u64, bytes: u64) {
        if let Some(mut case) = st.cases.remove(&index) {
            if case.attempt > 0 {
                self.sink.emit(TransferEvent::RetrySuccess {
                    case_id: case.case_id.clone(),
                    attempt: case.attempt,
                });
            }
            case.succeed();
            self.persist_retries(&st.cases).await;
        }
        let now = self.now();
        if !self.session.mark_piece_done(index, now) {
            tracing::warn!(index, "acknowledged piece outside the plan");
            return;
        }
        if let Err(e) = self
            .ledger
            .save_piece_done(&self.session.session_id, index, self.session.priority)
            .await
        {
            tracing::warn!(index, error = %e, "could not record piece in ledger");
        }
        self.persist().await;
        tracing::debug!(index, bytes, "piece done");
        self.sink.emit(TransferEvent::PieceSuccess {
            session_id: self.session.session_id.clone(),
            index,
            bytes,
        });
        self.publish();
    }

    async fn finish_completed(&mut self) -> SessionOutcome {
        let now = self.now();
        self.session.set_status(SessionStatus::Completed, now);
        if let Err(e) = self.ledger.delete_session(&self.session.session_id).await {
            tracing::warn!(error = %e, "could not clear ledger for completed session");
        }
        self.publish();
        tracing::info!(bytes = self.session.payload_size, "session completed");
        self.sink.emit(TransferEvent::SessionCompleted {
            session_id: self.session.session_id.clone(),
        });
        SessionOutcome::Completed
    }

    async fn finish_paused(&mut self, st: &RunState) -> SessionOutcome {
        let now = self.now();
        self.session.set_status(SessionStatus::Paused, now);
        self.persist().await;
        self.persist_retries(&st.cases).await;
        self.publish();
        tracing::info!(
            done = self.session.completed_pieces.len(),
            total = self.session.total_pieces,
            "session paused"
        );
        SessionOutcome::Paused
    }

    async fn finish_canceled(&mut self) -> SessionOutcome {
        self.progress.clear();
        match self.ledger.delete_session(&self.session.session_id).await {
            Ok(n) => tracing::debug!(entries = n, "ledger cleared"),
            Err(e) => tracing::warn!(error = %e, "could not clear ledger for canceled session"),
        }
        let now = self.now();
        self.session.set_status(SessionStatus::Canceled, now);
        self.publish();
        tracing::info!("session canceled");
        self.sink.emit(TransferEvent::SessionCanceled {
            session_id: self.session.session_id.clone(),
        });
        SessionOutcome::Canceled
    }

    async fn finish_failed(
        &mut self,
        st: &RunState,
        index: Option<u64>,
        error: TransferError,
    ) -> SessionOutcome {
        let now = self.now();
        let mut failed = st.failed.clone();
        failed.sort_unstable();
        failed.dedup();
        self.session.failed_pieces = failed;
        self.session.last_error = Some(error.to_string());
        self.session.set_status(SessionStatus::Failed, now);
        self.persist().await;
        self.publish();
        tracing::warn!(index = ?index, error = %error, "session failed");
        self.sink.emit(TransferEvent::SessionFailed {
            session_id: self.session.session_id.clone(),
            index,
            error: error.to_string(),
        });
        SessionOutcome::Failed {
            index,
            error: Arc::new(error),
        }
    }
}
