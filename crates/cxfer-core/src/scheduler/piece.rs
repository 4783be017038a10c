//! One attempt at sending one piece.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::payload::SharedPayload;
use crate::segmenter::Piece;
use crate::session::TransferTarget;
use crate::transport::{Method, SharedTransport, TransportError, TransportRequest};

pub(crate) const HEADER_SESSION_ID: &str = "X-Session-Id";
pub(crate) const HEADER_PIECE_INDEX: &str = "X-Piece-Index";

/// Why a piece attempt failed.
#[derive(Debug)]
pub(crate) enum PieceFailure {
    /// Classified at the transport boundary; the retry policy decides.
    Transport(TransportError),
    /// The payload could not be read. Never retried.
    Payload(std::io::Error),
}

/// Everything a piece attempt needs, cloned into the spawned task.
#[derive(Clone)]
pub(crate) struct PieceSender {
    pub transport: SharedTransport,
    pub payload: SharedPayload,
    pub target: TransferTarget,
    pub method: Method,
    pub session_id: String,
    pub payload_size: u64,
    pub timeout: Duration,
}

impl PieceSender {
    pub(crate) fn request(&self, piece: &Piece, body: Vec<u8>) -> TransportRequest {
        let mut req = TransportRequest::new(self.method, self.target.url.clone());
        for (name, value) in &self.target.headers {
            req = req.header(name.clone(), value.clone());
        }
        req.header("Content-Type", "application/octet-stream")
            .header("Content-Range", piece.content_range(self.payload_size))
            .header(HEADER_SESSION_ID, self.session_id.clone())
            .header(HEADER_PIECE_INDEX, piece.index.to_string())
            .body(body)
            .timeout(self.timeout)
    }

    /// Read the range and send it. Returns the number of bytes acknowledged.
    pub(crate) async fn send(
        &self,
        piece: Piece,
        abort: CancellationToken,
        progress: Arc<AtomicU64>,
    ) -> Result<u64, PieceFailure> {
        let body = self
            .payload
            .read_range(piece.start, piece.end)
            .await
            .map_err(PieceFailure::Payload)?;
        let req = self
            .request(&piece, body)
            .abort_on(abort.clone())
            .progress(progress);

        let sent = tokio::select! {
            biased;
            _ = abort.cancelled() => Err(TransportError::aborted("piece aborted")),
            res = tokio::time::timeout(self.timeout, self.transport.send(req)) => match res {
                Ok(res) => res,
                Err(_) => Err(TransportError::timeout(format!(
                    "piece {} exceeded {:?}",
                    piece.index, self.timeout
                ))),
            },
        };
        sent.and_then(|resp| resp.error_for_status())
            .map_err(PieceFailure::Transport)?;
        Ok(piece.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::MemoryPayload;

    #[test]
    fn request_carries_piece_headers() {
        let payload = Arc::new(MemoryPayload::new("a.bin", "application/octet-stream", vec![7; 10]));
        let mut target = TransferTarget::new("http://upload.test/p");
        target.headers.insert("Authorization".into(), "Bearer t".into());
        let sender = PieceSender {
            transport: Arc::new(crate::transport::CurlTransport::new()),
            payload,
            target,
            method: Method::Post,
            session_id: "abc-01".into(),
            payload_size: 10,
            timeout: Duration::from_secs(5),
        };
        let piece = Piece {
            index: 1,
            start: 4,
            end: 8,
        };
        let req = sender.request(&piece, vec![7; 4]);
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.header_value("content-range"), Some("bytes 4-7/10"));
        assert_eq!(req.header_value(HEADER_SESSION_ID), Some("abc-01"));
        assert_eq!(req.header_value(HEADER_PIECE_INDEX), Some("1"));
        assert_eq!(req.header_value("Authorization"), Some("Bearer t"));
        assert_eq!(req.body.len(), 4);
    }
}
