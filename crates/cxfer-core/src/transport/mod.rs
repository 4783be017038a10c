//! Request/response transport used for pieces, finalize calls and probes.
//!
//! The engine only sees [`Transport`]; [`CurlTransport`] is the production
//! implementation and tests plug in scripted ones.

mod http;
mod types;

use async_trait::async_trait;

pub use http::CurlTransport;
pub use types::{Method, TransportError, TransportRequest, TransportResponse};

/// Sends one request. Implementations return `Ok` for any response that
/// arrived, whatever its status; callers use
/// [`TransportResponse::error_for_status`] to classify non-2xx replies.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

pub type SharedTransport = std::sync::Arc<dyn Transport>;
