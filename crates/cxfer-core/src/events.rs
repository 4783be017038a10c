//! Typed notifications emitted by the engine.
//!
//! Sinks are fire-and-forget: `emit` must never block the caller. The channel
//! sink uses `try_send` and drops the event when the consumer falls behind.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::governor::{AdaptiveParameterSet, QualityLevel};
use crate::retry::ErrorClass;
use crate::session::SessionId;

/// Every notification the core can raise.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    PieceStart {
        session_id: SessionId,
        index: u64,
        attempt: u32,
    },
    PieceSuccess {
        session_id: SessionId,
        index: u64,
        bytes: u64,
    },
    PieceError {
        session_id: SessionId,
        index: u64,
        attempt: u32,
        class: ErrorClass,
        message: String,
    },
    RetryStart {
        case_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    RetryCountdown {
        case_id: String,
        remaining_ms: u64,
    },
    RetrySuccess {
        case_id: String,
        attempt: u32,
    },
    RetryFailed {
        case_id: String,
        attempt: u32,
    },
    QualityChanged {
        old: QualityLevel,
        new: QualityLevel,
    },
    ParamsAdjusted {
        old: AdaptiveParameterSet,
        new: AdaptiveParameterSet,
    },
    SessionCompleted {
        session_id: SessionId,
    },
    SessionFailed {
        session_id: SessionId,
        index: Option<u64>,
        error: String,
    },
    SessionCanceled {
        session_id: SessionId,
    },
}

impl TransferEvent {
    /// Stable wire name (`piece:start`, `retry:countdown`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            TransferEvent::PieceStart { .. } => "piece:start",
            TransferEvent::PieceSuccess { .. } => "piece:success",
            TransferEvent::PieceError { .. } => "piece:error",
            TransferEvent::RetryStart { .. } => "retry:start",
            TransferEvent::RetryCountdown { .. } => "retry:countdown",
            TransferEvent::RetrySuccess { .. } => "retry:success",
            TransferEvent::RetryFailed { .. } => "retry:failed",
            TransferEvent::QualityChanged { .. } => "quality:changed",
            TransferEvent::ParamsAdjusted { .. } => "params:adjusted",
            TransferEvent::SessionCompleted { .. } => "session:completed",
            TransferEvent::SessionFailed { .. } => "session:failed",
            TransferEvent::SessionCanceled { .. } => "session:canceled",
        }
    }
}

/// Destination for engine notifications.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TransferEvent);
}

pub type SharedSink = Arc<dyn EventSink>;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TransferEvent) {}
}

/// Logs every event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TransferEvent) {
        tracing::debug!(event = event.name(), "{:?}", event);
    }
}

/// Forwards events into a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<TransferEvent>,
}

impl ChannelSink {
    /// Create a sink plus the receiving end. `capacity` bounds buffered events.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: TransferEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::trace!("event dropped: {}", e);
        }
    }
}
