//! Finalize call once every piece is acknowledged.

use std::io;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::events::EventSink;
use crate::payload::{sha256_payload, SharedPayload};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::session::TransferSession;
use crate::transport::{Method, SharedTransport, TransportRequest};

use super::piece::HEADER_SESSION_ID;

/// JSON body of the finalize request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizeRequest {
    pub session_id: String,
    pub total_pieces: u64,
    pub payload_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Hash the payload on its own task so a long read does not stall the session loop.
async fn digest(payload: &SharedPayload) -> Result<String, TransferError> {
    let payload = payload.clone();
    tokio::spawn(async move { sha256_payload(payload.as_ref()).await })
        .await
        .map_err(|e| io::Error::other(format!("digest task: {}", e)))?
        .map_err(TransferError::Payload)
}

/// POST the finalize body to the session's finalize URL, retrying per `policy`.
/// No-op when the target has no finalize URL.
pub(crate) async fn finalize(
    session: &TransferSession,
    payload: &SharedPayload,
    transport: &SharedTransport,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    sink: &dyn EventSink,
) -> Result<(), TransferError> {
    let Some(url) = session.target.finalize_url.as_deref() else {
        return Ok(());
    };
    let sha256 = if session.settings.checksum {
        Some(digest(payload).await?)
    } else {
        None
    };
    let body = FinalizeRequest {
        session_id: session.session_id.clone(),
        total_pieces: session.total_pieces,
        payload_size: session.payload_size,
        sha256,
    };
    let body = serde_json::to_vec(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let case_id = format!("{}:finalize", session.session_id);

    tracing::debug!(session_id = %session.session_id, url, "finalizing");
    run_with_retry(policy, &case_id, cancel, sink, |attempt| {
        let mut req = TransportRequest::new(Method::Post, url)
            .header("Content-Type", "application/json")
            .header(HEADER_SESSION_ID, session.session_id.clone())
            .body(body.clone())
            .abort_on(cancel.clone());
        for (name, value) in &session.target.headers {
            req = req.header(name.clone(), value.clone());
        }
        async move {
            if attempt > 0 {
                tracing::debug!(attempt, "finalize retry");
            }
            transport.send(req).await?.error_for_status()
        }
    })
    .await?;
    Ok(())
}
