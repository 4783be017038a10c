//! Probe requests: RTT via HEAD, download and upload rate via sized transfers.

use std::time::Duration;

use rand::RngCore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::sample::{rate_kbps, NetworkSample};
use crate::clock::Clock;
use crate::config::GovernorConfig;
use crate::retry::ErrorClass;
use crate::transport::{Method, SharedTransport, TransportError, TransportRequest};

/// Runs one probe against the configured endpoints.
#[derive(Clone)]
pub struct Prober {
    transport: SharedTransport,
    ping_url: Option<String>,
    download_url: Option<String>,
    upload_url: Option<String>,
    timeout: Duration,
}

impl Prober {
    pub fn new(transport: SharedTransport, config: &GovernorConfig) -> Self {
        Self {
            transport,
            ping_url: config.ping_url.clone(),
            download_url: config.download_url.clone(),
            upload_url: config.upload_url.clone(),
            timeout: Duration::from_millis(config.probe_timeout_ms.max(1)),
        }
    }

    pub fn has_endpoints(&self) -> bool {
        self.ping_url.is_some() || self.download_url.is_some() || self.upload_url.is_some()
    }

    /// Measure with a `sample_size`-byte transfer in each direction. Any failed
    /// step fails the whole probe.
    pub async fn probe(
        &self,
        sample_size: u64,
        clock: &dyn Clock,
        abort: &CancellationToken,
    ) -> Result<NetworkSample, TransportError> {
        let mut sample = NetworkSample::offline(clock.now_ms());

        if let Some(url) = &self.ping_url {
            let started = Instant::now();
            self.send(TransportRequest::new(Method::Head, url.as_str()), abort)
                .await?;
            sample.rtt_ms = Some(started.elapsed().as_millis() as u64);
        }

        if let Some(url) = &self.download_url {
            let url = sized_url(url, sample_size)?;
            let started = Instant::now();
            let resp = self
                .send(TransportRequest::new(Method::Get, url), abort)
                .await?;
            sample.download_rate_kbps = rate_kbps(resp.body.len() as u64, started.elapsed());
        }

        if let Some(url) = &self.upload_url {
            let mut body = vec![0u8; sample_size as usize];
            rand::thread_rng().fill_bytes(&mut body);
            let started = Instant::now();
            self.send(
                TransportRequest::new(Method::Post, url.as_str())
                    .header("Content-Type", "application/octet-stream")
                    .body(body),
                abort,
            )
            .await?;
            sample.upload_rate_kbps = rate_kbps(sample_size, started.elapsed());
        }

        Ok(sample)
    }

    async fn send(
        &self,
        request: TransportRequest,
        abort: &CancellationToken,
    ) -> Result<crate::transport::TransportResponse, TransportError> {
        let request = request.timeout(self.timeout).abort_on(abort.child_token());
        match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(res) => res?.error_for_status(),
            Err(_) => Err(TransportError::timeout("probe timed out")),
        }
    }
}

/// `url` with `bytes=<n>` appended to its query.
fn sized_url(url: &str, bytes: u64) -> Result<String, TransportError> {
    let mut parsed = Url::parse(url)
        .map_err(|e| TransportError::new(ErrorClass::Client(0), format!("probe url {}: {}", url, e)))?;
    parsed
        .query_pairs_mut()
        .append_pair("bytes", &bytes.to_string());
    Ok(parsed.into())
}
