//! In-memory transport with a fixed per-request delay; records piece indices.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cxfer_core::transport::{Transport, TransportError, TransportRequest, TransportResponse};

pub struct ScriptedTransport {
    delay: Duration,
    pieces: Mutex<Vec<u64>>,
}

impl ScriptedTransport {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            pieces: Mutex::new(Vec::new()),
        })
    }

    /// Piece indices acknowledged so far, in arrival order.
    pub fn pieces(&self) -> Vec<u64> {
        self.pieces.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, req: TransportRequest) -> Result<TransportResponse, TransportError> {
        tokio::select! {
            _ = req.abort.cancelled() => return Err(TransportError::aborted("aborted")),
            _ = tokio::time::sleep(self.delay) => {}
        }
        if let Some(i) = req
            .header_value("X-Piece-Index")
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.pieces.lock().unwrap().push(i);
        }
        Ok(TransportResponse::ok())
    }
}
