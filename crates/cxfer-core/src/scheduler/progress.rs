//! Progress reporting for a running session (bytes done, rate, ETA).
//!
//! Completed pieces count in full; pieces in flight contribute whatever the
//! transport has reported through their byte counters so far. The tracker
//! also holds the per-piece state of the current run.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::session::{PieceState, TransferSession};

/// Snapshot of upload progress for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStats {
    /// Bytes acknowledged (completed pieces) plus bytes sent for pieces in flight.
    pub bytes_done: u64,
    pub total_bytes: u64,
    /// Seconds since this run started.
    pub elapsed_secs: f64,
    pub pieces_done: u64,
    pub total_pieces: u64,
    pub pieces_in_flight: usize,
}

impl ProgressStats {
    /// Bytes per second (0 if nothing has elapsed).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining; `None` while the rate is still 0.
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.total_bytes.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.bytes_done as f64 / self.total_bytes as f64).min(1.0)
    }
}

#[derive(Debug, Default)]
struct Pieces {
    counters: HashMap<u64, Arc<AtomicU64>>,
    states: BTreeMap<u64, PieceState>,
}

/// Per-piece state plus byte counters for the pieces currently in flight.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    pieces: Mutex<Pieces>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            pieces: Mutex::new(Pieces::default()),
        }
    }

    /// Seed states from the session: completed pieces are `Done`, the rest `Pending`.
    pub fn reset(&self, session: &TransferSession) {
        let mut pieces = self.lock();
        pieces.counters.clear();
        pieces.states = (0..session.total_pieces)
            .map(|i| {
                let state = if session.completed_pieces.contains(&i) {
                    PieceState::Done
                } else {
                    PieceState::Pending
                };
                (i, state)
            })
            .collect();
    }

    /// Mark `index` in flight; returns the counter handed to the transport.
    pub fn begin(&self, index: u64) -> Arc<AtomicU64> {
        let counter = Arc::new(AtomicU64::new(0));
        let mut pieces = self.lock();
        pieces.counters.insert(index, Arc::clone(&counter));
        pieces.states.insert(index, PieceState::InFlight);
        counter
    }

    /// The attempt on `index` ended in `state`.
    pub fn finish(&self, index: u64, state: PieceState) {
        let mut pieces = self.lock();
        pieces.counters.remove(&index);
        pieces.states.insert(index, state);
    }

    pub fn set_state(&self, index: u64, state: PieceState) {
        self.lock().states.insert(index, state);
    }

    /// Drop byte counters; pieces still marked in flight go back to `Pending`.
    pub fn clear(&self) {
        let mut pieces = self.lock();
        pieces.counters.clear();
        for state in pieces.states.values_mut() {
            if *state == PieceState::InFlight {
                *state = PieceState::Pending;
            }
        }
    }

    pub fn piece_states(&self) -> BTreeMap<u64, PieceState> {
        self.lock().states.clone()
    }

    pub fn count(&self, state: PieceState) -> usize {
        self.lock().states.values().filter(|s| **s == state).count()
    }

    pub fn stats(&self, session: &TransferSession) -> ProgressStats {
        let pieces = self.lock();
        let in_flight = &pieces.counters;
        let partial: u64 = in_flight
            .values()
            .map(|c| c.load(Ordering::Relaxed))
            .sum();
        ProgressStats {
            bytes_done: (session.bytes_done() + partial).min(session.payload_size),
            total_bytes: session.payload_size,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            pieces_done: session.completed_pieces.len() as u64,
            total_pieces: session.total_pieces,
            pieces_in_flight: in_flight.len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pieces> {
        self.pieces.lock().unwrap_or_else(|e| e.into_inner())
    }
}
