//! Coordinator tests against a scripted in-memory transport (paused tokio time).

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};

use super::*;
use crate::clock::{Clock, SystemClock};
use crate::config::{LedgerConfig, TransferOverrides};
use crate::error::TransferError;
use crate::events::{ChannelSink, TransferEvent};
use crate::governor::{AdaptiveParameterSet, QualityLevel};
use crate::ledger::{SharedLedger, TransferLedger};
use crate::payload::{MemoryPayload, Payload, PayloadDescriptor, PayloadOpener, SharedPayload};
use crate::retry::{ErrorClass, RetryPolicy};
use crate::session::{PieceState, SessionStatus, TransferSession, TransferTarget};
use crate::store::MemoryStore;
use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};

const UPLOAD: &str = "http://upload.test/pieces";
const FINALIZE: &str = "http://upload.test/finalize";

#[derive(Debug, Clone, Copy)]
enum Step {
    Status(u16),
    /// Never answers; only an abort or timeout ends it.
    Hang,
}

#[derive(Debug, Clone)]
struct Seen {
    url: String,
    index: Option<u64>,
    body: Vec<u8>,
}

#[derive(Default)]
struct ScriptedTransport {
    delay: Duration,
    pieces: Mutex<HashMap<u64, VecDeque<Step>>>,
    finalize: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<Seen>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    fn new(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_millis(delay_ms),
            ..Self::default()
        })
    }

    fn script(&self, index: u64, steps: &[Step]) {
        self.pieces
            .lock()
            .unwrap()
            .entry(index)
            .or_default()
            .extend(steps.iter().copied());
    }

    fn script_finalize(&self, steps: &[Step]) {
        self.finalize.lock().unwrap().extend(steps.iter().copied());
    }

    fn piece_log(&self) -> Vec<u64> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| s.index)
            .collect()
    }

    fn finalize_calls(&self) -> Vec<Seen> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.url == FINALIZE)
            .cloned()
            .collect()
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, req: TransportRequest) -> Result<TransportResponse, TransportError> {
        let index = req
            .header_value("X-Piece-Index")
            .and_then(|v| v.parse::<u64>().ok());
        self.seen.lock().unwrap().push(Seen {
            url: req.url.clone(),
            index,
            body: req.body.clone(),
        });
        let step = match index {
            Some(i) => self
                .pieces
                .lock()
                .unwrap()
                .get_mut(&i)
                .and_then(|q| q.pop_front()),
            None => self.finalize.lock().unwrap().pop_front(),
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let wait = match step {
            Some(Step::Hang) => Duration::from_secs(3600),
            _ => self.delay,
        };
        let aborted = tokio::select! {
            _ = req.abort.cancelled() => true,
            _ = tokio::time::sleep(wait) => false,
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if aborted {
            return Err(TransportError::aborted("aborted"));
        }
        match step {
            Some(Step::Status(status)) => Ok(TransportResponse::new(status, Vec::new())),
            _ => Ok(TransportResponse::ok()),
        }
    }
}

struct FixedOpener(SharedPayload);

#[async_trait]
impl PayloadOpener for FixedOpener {
    async fn open(&self, _descriptor: &PayloadDescriptor) -> io::Result<SharedPayload> {
        Ok(self.0.clone())
    }
}

struct Rig {
    transport: Arc<ScriptedTransport>,
    ledger: SharedLedger,
    coordinator: Coordinator,
    events: mpsc::Receiver<TransferEvent>,
}

impl Rig {
    fn drain_events(&mut self) -> Vec<TransferEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}

fn policy() -> RetryPolicy {
    let mut p = RetryPolicy::default();
    p.max_retries = 3;
    p.initial_delay = Duration::from_millis(100);
    p.jitter = false;
    p
}

fn ledger() -> SharedLedger {
    Arc::new(TransferLedger::new(
        Arc::new(MemoryStore::new()),
        Arc::new(SystemClock),
        LedgerConfig::default(),
    ))
}

fn rig_with(
    transport: Arc<ScriptedTransport>,
    ledger: SharedLedger,
    configure: impl FnOnce(CoordinatorBuilder) -> CoordinatorBuilder,
) -> Rig {
    let (sink, events) = ChannelSink::new(1024);
    let builder = Coordinator::builder(transport.clone(), ledger.clone())
        .sink(Arc::new(sink))
        .retry_policy(policy());
    Rig {
        transport,
        ledger,
        coordinator: configure(builder).build(),
        events,
    }
}

fn rig(delay_ms: u64) -> Rig {
    rig_with(ScriptedTransport::new(delay_ms), ledger(), |b| b)
}

/// 20 bytes: five 4-byte pieces with the options from [`opts`].
fn payload() -> Arc<MemoryPayload> {
    Arc::new(MemoryPayload::new(
        "report.bin",
        "application/octet-stream",
        (0u8..20).collect(),
    ))
}

fn opts(concurrency: usize) -> StartOptions {
    StartOptions {
        overrides: TransferOverrides {
            concurrency: Some(concurrency),
            piece_size: Some(4),
            ..TransferOverrides::default()
        },
        ..StartOptions::default()
    }
}

fn target() -> TransferTarget {
    TransferTarget::new(UPLOAD)
}

async fn assert_ledger_empty(ledger: &SharedLedger) {
    let usage = ledger.usage().await.unwrap();
    assert_eq!(usage.session_count, 0);
    assert_eq!(usage.piece_count, 0);
    assert_eq!(usage.total_size, 0);
}

#[tokio::test(start_paused = true)]
async fn completes_and_clears_ledger() {
    let mut rig = rig(10);
    let handle = rig
        .coordinator
        .start(payload(), target(), opts(2))
        .await
        .unwrap();
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));

    let snap = handle.snapshot();
    assert_eq!(snap.status, SessionStatus::Completed);
    assert_eq!(snap.completed_pieces, (0..5).collect::<BTreeSet<_>>());
    assert_eq!(handle.progress().fraction(), 1.0);
    assert_ledger_empty(&rig.ledger).await;

    let mut sent = rig.transport.piece_log();
    sent.sort_unstable();
    assert_eq!(sent, vec![0, 1, 2, 3, 4]);

    let events = rig.drain_events();
    let successes = events
        .iter()
        .filter(|e| matches!(e, TransferEvent::PieceSuccess { .. }))
        .count();
    assert_eq!(successes, 5);
    assert!(matches!(events.last(), Some(TransferEvent::SessionCompleted { .. })));
    assert_eq!(rig.coordinator.running_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn piece_bodies_match_payload_ranges() {
    let rig = rig(1);
    let handle = rig
        .coordinator
        .start(payload(), target(), opts(3))
        .await
        .unwrap();
    handle.wait().await;
    for seen in rig.transport.seen.lock().unwrap().iter() {
        let i = seen.index.unwrap() as u8;
        let expected: Vec<u8> = (i * 4..(i * 4 + 4)).collect();
        assert_eq!(seen.body, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn never_more_than_concurrency_in_flight() {
    let rig = rig(50);
    let bytes: Vec<u8> = vec![1; 40];
    let payload = Arc::new(MemoryPayload::new("ten.bin", "application/octet-stream", bytes));
    let handle = rig
        .coordinator
        .start(payload, target(), opts(3))
        .await
        .unwrap();
    let mut most = 0;
    while !handle.is_finished() {
        let in_flight = handle
            .piece_states()
            .values()
            .filter(|s| **s == PieceState::InFlight)
            .count();
        assert!(in_flight <= 3, "{} pieces in flight", in_flight);
        most = most.max(in_flight);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));
    assert_eq!(most, 3);
    assert!(handle.piece_states().values().all(|s| *s == PieceState::Done));
    assert_eq!(rig.transport.piece_log().len(), 10);
    assert_eq!(rig.transport.peak(), 3);
}

#[tokio::test(start_paused = true)]
async fn retryable_error_is_retried_after_backoff() {
    let mut rig = rig(10);
    rig.transport.script(1, &[Step::Status(503)]);
    let handle = rig
        .coordinator
        .start(payload(), target(), opts(2))
        .await
        .unwrap();
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));

    let sent = rig.transport.piece_log();
    assert_eq!(sent.iter().filter(|&&i| i == 1).count(), 2);
    assert_eq!(handle.snapshot().retry_budget_used, 1);

    let events = rig.drain_events();
    let case_id = format!("{}:1", handle.session_id());
    assert!(events.contains(&TransferEvent::RetryStart {
        case_id: case_id.clone(),
        attempt: 1,
        delay_ms: 100,
    }));
    assert!(events.contains(&TransferEvent::RetrySuccess {
        case_id,
        attempt: 1,
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        TransferEvent::PieceError { index: 1, class: ErrorClass::Server(503), .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn piece_timeout_is_retryable() {
    let mut rig = rig(10);
    rig.transport.script(0, &[Step::Hang]);
    let mut o = opts(1);
    o.overrides.piece_timeout_ms = Some(200);
    let handle = rig.coordinator.start(payload(), target(), o).await.unwrap();
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));
    let events = rig.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        TransferEvent::PieceError { index: 0, class: ErrorClass::Timeout, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn client_error_fails_session_and_keeps_progress() {
    let mut rig = rig(10);
    rig.transport.script(2, &[Step::Status(400)]);
    let handle = rig
        .coordinator
        .start(payload(), target(), opts(1))
        .await
        .unwrap();

    match handle.wait().await {
        SessionOutcome::Failed { index, error } => {
            assert_eq!(index, Some(2));
            assert!(matches!(
                *error,
                TransferError::PermanentFailure {
                    index: 2,
                    attempts: 1,
                    last: ErrorClass::Client(400)
                }
            ));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    // Dispatch stopped at the failure.
    assert_eq!(rig.transport.piece_log(), vec![0, 1, 2]);

    let id = handle.session_id().to_string();
    let stored = rig.ledger.load_session(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Failed);
    assert_eq!(stored.failed_pieces, vec![2]);
    assert_eq!(stored.completed_pieces, BTreeSet::from([0, 1]));
    assert!(rig.drain_events().iter().any(|e| matches!(
        e,
        TransferEvent::SessionFailed { index: Some(2), .. }
    )));

    // Resume sends only what is missing.
    let handle = rig.coordinator.resume(&id).await.unwrap();
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));
    assert_eq!(rig.transport.piece_log(), vec![0, 1, 2, 2, 3, 4]);
    assert_ledger_empty(&rig.ledger).await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_attempts() {
    let mut rig = rig(10);
    rig.transport.script(
        0,
        &[
            Step::Status(503),
            Step::Status(503),
            Step::Status(503),
            Step::Status(503),
        ],
    );
    let handle = rig
        .coordinator
        .start(payload(), target(), opts(1))
        .await
        .unwrap();
    match handle.wait().await {
        SessionOutcome::Failed { error, .. } => assert!(matches!(
            *error,
            TransferError::PermanentFailure {
                index: 0,
                attempts: 4,
                last: ErrorClass::Server(503)
            }
        )),
        other => panic!("unexpected outcome {:?}", other),
    }
    let events = rig.drain_events();
    assert!(events.contains(&TransferEvent::RetryFailed {
        case_id: format!("{}:0", handle.session_id()),
        attempt: 3,
    }));
}

#[tokio::test(start_paused = true)]
async fn tolerated_failures_drain_the_rest() {
    let rig = rig(10);
    rig.transport.script(1, &[Step::Status(404)]);
    rig.transport.script(3, &[Step::Status(404)]);
    let mut o = opts(2);
    o.overrides.tolerate_partial_failure = Some(true);
    let handle = rig.coordinator.start(payload(), target(), o).await.unwrap();

    match handle.wait().await {
        SessionOutcome::Failed { index, .. } => assert_eq!(index, Some(1)),
        other => panic!("unexpected outcome {:?}", other),
    }
    let snap = handle.snapshot();
    assert_eq!(snap.failed_pieces, vec![1, 3]);
    assert_eq!(snap.completed_pieces, BTreeSet::from([0, 2, 4]));
}

#[tokio::test(start_paused = true)]
async fn sequential_mode_blocks_behind_retry() {
    let rig = rig(10);
    rig.transport.script(1, &[Step::Status(502)]);
    let mut o = opts(4);
    o.overrides.sequential = Some(true);
    let handle = rig.coordinator.start(payload(), target(), o).await.unwrap();
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));
    assert_eq!(rig.transport.piece_log(), vec![0, 1, 1, 2, 3, 4]);
    assert_eq!(rig.transport.peak(), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_lets_in_flight_finish_then_resume_completes() {
    let rig = rig(100);
    let handle = rig
        .coordinator
        .start(payload(), target(), opts(1))
        .await
        .unwrap();
    let id = handle.session_id().to_string();

    tokio::time::sleep(Duration::from_millis(150)).await;
    rig.coordinator.pause(&id).await.unwrap();
    assert!(matches!(handle.wait().await, SessionOutcome::Paused));

    // Piece 0 finished before the pause, piece 1 was in flight and drained.
    let stored = rig.ledger.load_session(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Paused);
    assert_eq!(stored.completed_pieces, BTreeSet::from([0, 1]));
    assert_eq!(rig.coordinator.status(&id).await.unwrap().status, SessionStatus::Paused);

    let handle = rig.coordinator.resume(&id).await.unwrap();
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));
    assert_eq!(rig.transport.piece_log(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn pause_can_abort_in_flight_pieces() {
    let rig = rig(100);
    let mut o = opts(1);
    o.overrides.abort_in_flight_on_pause = Some(true);
    let handle = rig.coordinator.start(payload(), target(), o).await.unwrap();
    let id = handle.session_id().to_string();

    tokio::time::sleep(Duration::from_millis(150)).await;
    rig.coordinator.pause(&id).await.unwrap();
    assert!(matches!(handle.wait().await, SessionOutcome::Paused));
    let stored = rig.ledger.load_session(&id).await.unwrap().unwrap();
    assert_eq!(stored.completed_pieces, BTreeSet::from([0]));
}

#[tokio::test(start_paused = true)]
async fn pause_all_parks_every_running_session() {
    let rig = rig(100);
    let first = rig.coordinator.start(payload(), target(), opts(1)).await.unwrap();
    let mut again = opts(1);
    again.force_new = true;
    let second = rig.coordinator.start(payload(), target(), again).await.unwrap();
    assert_ne!(first.session_id(), second.session_id());
    assert_eq!(rig.coordinator.running_count(), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    rig.coordinator.pause_all().await;
    assert!(matches!(first.outcome(), Some(SessionOutcome::Paused)));
    assert!(matches!(second.outcome(), Some(SessionOutcome::Paused)));
    assert_eq!(rig.coordinator.running_count(), 0);
    assert!(rig.coordinator.handle(first.session_id()).is_none());
}

#[tokio::test(start_paused = true)]
async fn cancel_is_terminal_and_resume_restarts_from_zero() {
    let mut rig = rig(100);
    let handle = rig
        .coordinator
        .start(payload(), target(), opts(2))
        .await
        .unwrap();
    let id = handle.session_id().to_string();

    tokio::time::sleep(Duration::from_millis(150)).await;
    rig.coordinator.cancel(&id).await.unwrap();
    assert!(matches!(handle.outcome(), Some(SessionOutcome::Canceled)));
    assert_ledger_empty(&rig.ledger).await;
    assert_eq!(rig.coordinator.status(&id).await.unwrap().status, SessionStatus::Canceled);
    assert!(rig
        .drain_events()
        .contains(&TransferEvent::SessionCanceled { session_id: id.clone() }));

    let before = rig.transport.piece_log().len();
    let handle = rig.coordinator.resume(&id).await.unwrap();
    assert_eq!(handle.session_id(), id);
    assert!(handle.snapshot().completed_pieces.is_empty());
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));
    let mut again = rig.transport.piece_log().split_off(before);
    again.sort_unstable();
    assert_eq!(again, vec![0, 1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn canceled_session_is_not_found_after_restart() {
    let store = ledger();
    let first = rig_with(ScriptedTransport::new(100), store.clone(), |b| b);
    let handle = first
        .coordinator
        .start(payload(), target(), opts(1))
        .await
        .unwrap();
    let id = handle.session_id().to_string();
    first.coordinator.cancel(&id).await.unwrap();

    let second = rig_with(ScriptedTransport::new(100), store, |b| b);
    assert!(matches!(
        second.coordinator.resume(&id).await,
        Err(TransferError::NotFound(_))
    ));
    assert!(matches!(
        second.coordinator.cancel(&id).await,
        Err(TransferError::NotFound(_))
    ));
    assert!(matches!(
        second.coordinator.resume("not:valid").await,
        Err(TransferError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn resume_after_restart_sends_only_missing_pieces() {
    let store = ledger();
    let payload = payload();
    let mut session = TransferSession::new(
        "0123456789abcdef-00000001".to_string(),
        payload.descriptor().clone(),
        target(),
        crate::config::TransferConfig {
            concurrency: 2,
            ..Default::default()
        },
        4,
        5,
        SystemClock.now_ms(),
    );
    session.set_status(SessionStatus::Transferring, SystemClock.now_ms());
    store.save_session_state(&session).await.unwrap();
    store.save_piece_done(&session.session_id, 0, 5).await.unwrap();
    store.save_piece_done(&session.session_id, 2, 5).await.unwrap();

    let shared: SharedPayload = payload;
    let rig = rig_with(ScriptedTransport::new(10), store, |b| {
        b.opener(Arc::new(FixedOpener(shared)))
    });
    let handle = rig.coordinator.resume(&session.session_id).await.unwrap();
    assert_eq!(handle.snapshot().completed_pieces.len(), 2);
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));

    let mut sent = rig.transport.piece_log();
    sent.sort_unstable();
    assert_eq!(sent, vec![1, 3, 4]);
    assert_ledger_empty(&rig.ledger).await;
}

#[tokio::test(start_paused = true)]
async fn start_reuses_unfinished_session_for_same_payload() {
    let rig = rig(100);
    let payload = payload();
    let first = rig
        .coordinator
        .start(payload.clone(), target(), opts(1))
        .await
        .unwrap();
    // Same payload while running: same handle.
    let again = rig
        .coordinator
        .start(payload.clone(), target(), opts(1))
        .await
        .unwrap();
    assert_eq!(again.session_id(), first.session_id());

    rig.coordinator.pause(first.session_id()).await.unwrap();
    first.wait().await;
    let resumed = rig
        .coordinator
        .start(payload.clone(), target(), opts(1))
        .await
        .unwrap();
    assert_eq!(resumed.session_id(), first.session_id());
    rig.coordinator.pause(resumed.session_id()).await.unwrap();
    resumed.wait().await;

    let mut fresh = opts(1);
    fresh.force_new = true;
    let other = rig.coordinator.start(payload, target(), fresh).await.unwrap();
    assert_ne!(other.session_id(), first.session_id());
    assert_eq!(
        crate::session::fingerprint_of(other.session_id()),
        crate::session::fingerprint_of(first.session_id())
    );
    assert_eq!(rig.coordinator.list().await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrency_follows_parameter_feed() {
    let initial = AdaptiveParameterSet {
        concurrency: 1,
        piece_size: 4,
        max_retries: 3,
        quality_level: QualityLevel::Poor,
    };
    let (tx, rx) = watch::channel(initial);
    let rig = rig_with(ScriptedTransport::new(100), ledger(), |b| b.parameter_feed(rx));
    let bytes = vec![0u8; 40];
    let payload = Arc::new(MemoryPayload::new("feed.bin", "application/octet-stream", bytes));
    // No piece size override: the feed's piece size applies.
    let handle = rig
        .coordinator
        .start(payload, target(), StartOptions::default())
        .await
        .unwrap();
    assert_eq!(handle.snapshot().total_pieces, 10);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(rig.transport.peak(), 1);
    tx.send_replace(AdaptiveParameterSet {
        concurrency: 4,
        quality_level: QualityLevel::Excellent,
        ..initial
    });
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));
    assert_eq!(rig.transport.peak(), 4);
}

#[tokio::test(start_paused = true)]
async fn finalize_posts_summary_with_checksum() {
    let rig = rig(10);
    let payload = payload();
    let expected = hex::encode(Sha256::digest(payload.bytes()));
    let mut o = opts(3);
    o.overrides.checksum = Some(true);
    let handle = rig
        .coordinator
        .start(payload, TransferTarget::new(UPLOAD).with_finalize(FINALIZE), o)
        .await
        .unwrap();
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));

    let calls = rig.transport.finalize_calls();
    assert_eq!(calls.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&calls[0].body).unwrap();
    assert_eq!(body["session_id"], handle.session_id());
    assert_eq!(body["total_pieces"], 5);
    assert_eq!(body["payload_size"], 20);
    assert_eq!(body["sha256"], expected.as_str());
}

#[tokio::test(start_paused = true)]
async fn finalize_failure_fails_session_without_piece_index() {
    let rig = rig(10);
    rig.transport.script_finalize(&[Step::Status(503), Step::Status(409)]);
    let handle = rig
        .coordinator
        .start(payload(), TransferTarget::new(UPLOAD).with_finalize(FINALIZE), opts(3))
        .await
        .unwrap();
    match handle.wait().await {
        SessionOutcome::Failed { index, error } => {
            assert_eq!(index, None);
            assert!(matches!(*error, TransferError::Client { status: 409 }));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(rig.transport.finalize_calls().len(), 2);
    // Every piece is recorded, so a resume only repeats the finalize call.
    let id = handle.session_id().to_string();
    let handle = rig.coordinator.resume(&id).await.unwrap();
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));
    assert_eq!(rig.transport.piece_log().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn empty_payload_completes_without_pieces() {
    let rig = rig(10);
    let payload = Arc::new(MemoryPayload::new("empty", "text/plain", Vec::new()));
    let handle = rig
        .coordinator
        .start(payload, TransferTarget::new(UPLOAD).with_finalize(FINALIZE), opts(2))
        .await
        .unwrap();
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));
    assert!(rig.transport.piece_log().is_empty());
    assert_eq!(rig.transport.finalize_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn completed_session_releases_payload() {
    let rig = rig(1);
    let payload = payload();
    let handle = rig
        .coordinator
        .start(payload.clone(), target(), opts(2))
        .await
        .unwrap();
    let id = handle.session_id().to_string();
    assert!(matches!(handle.wait().await, SessionOutcome::Completed));
    drop(handle);
    assert_eq!(Arc::strong_count(&payload), 1);

    assert_eq!(rig.coordinator.status(&id).await.unwrap().status, SessionStatus::Completed);
    assert!(matches!(
        rig.coordinator.resume(&id).await,
        Err(TransferError::InvalidState { status: SessionStatus::Completed, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn known_sessions_are_bounded() {
    let rig = rig_with(ScriptedTransport::new(1), ledger(), |b| b.known_limit(2));
    let mut ids = Vec::new();
    for name in ["a.bin", "b.bin", "c.bin"] {
        let payload = Arc::new(MemoryPayload::new(name, "application/octet-stream", vec![7; 8]));
        let handle = rig
            .coordinator
            .start(payload, target(), opts(1))
            .await
            .unwrap();
        assert!(matches!(handle.wait().await, SessionOutcome::Completed));
        ids.push(handle.session_id().to_string());
    }
    assert!(matches!(
        rig.coordinator.status(&ids[0]).await,
        Err(TransferError::NotFound(_))
    ));
    for id in &ids[1..] {
        assert_eq!(rig.coordinator.status(id).await.unwrap().status, SessionStatus::Completed);
    }
}

#[tokio::test]
async fn unknown_session_operations_are_not_found() {
    let rig = rig(1);
    assert!(matches!(
        rig.coordinator.status("feed-01").await,
        Err(TransferError::NotFound(_))
    ));
    assert!(matches!(
        rig.coordinator.pause("feed-01").await,
        Err(TransferError::NotFound(_))
    ));
    assert!(rig.coordinator.list().await.unwrap().is_empty());
}
