//! libcurl-backed transport. Each request runs on the blocking pool.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use curl::easy::{Easy, List};
use tokio_util::sync::CancellationToken;

use super::{Method, Transport, TransportError, TransportRequest, TransportResponse};
use crate::retry::classify_curl_error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Transport`] over libcurl's easy interface.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    connect_timeout: Duration,
    user_agent: String,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            user_agent: format!("cxfer/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl CurlTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for CurlTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        if request.abort.is_cancelled() {
            return Err(TransportError::aborted("canceled before send"));
        }
        let connect_timeout = self.connect_timeout;
        let user_agent = self.user_agent.clone();
        tokio::task::spawn_blocking(move || perform(request, connect_timeout, &user_agent))
            .await
            .map_err(|e| TransportError::network(format!("transport task: {}", e)))?
    }
}

fn curl_err(e: curl::Error) -> TransportError {
    TransportError::new(classify_curl_error(&e), e.to_string())
}

fn perform(
    request: TransportRequest,
    connect_timeout: Duration,
    user_agent: &str,
) -> Result<TransportResponse, TransportError> {
    let TransportRequest {
        method,
        url,
        headers,
        body,
        timeout,
        abort,
        progress,
    } = request;

    let mut easy = Easy::new();
    easy.url(&url).map_err(curl_err)?;
    easy.follow_location(true).map_err(curl_err)?;
    easy.connect_timeout(connect_timeout).map_err(curl_err)?;
    easy.useragent(user_agent).map_err(curl_err)?;
    if let Some(t) = timeout {
        easy.timeout(t).map_err(curl_err)?;
    }
    easy.progress(true).map_err(curl_err)?;

    let body_len = body.len() as u64;
    match method {
        Method::Get => {}
        Method::Head => easy.nobody(true).map_err(curl_err)?,
        Method::Post => {
            easy.post(true).map_err(curl_err)?;
            easy.post_field_size(body_len).map_err(curl_err)?;
        }
        Method::Put => {
            easy.upload(true).map_err(curl_err)?;
            easy.in_filesize(body_len).map_err(curl_err)?;
        }
    }

    let mut list = List::new();
    for (k, v) in &headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(curl_err)?;
    }
    // Stop curl from sending `Expect: 100-continue` on large bodies.
    list.append("Expect:").map_err(curl_err)?;
    easy.http_headers(list).map_err(curl_err)?;

    let mut response_body = Vec::new();
    let mut response_headers = Vec::new();
    let mut source = std::io::Cursor::new(body);
    {
        let mut transfer = easy.transfer();
        if matches!(method, Method::Post | Method::Put) {
            transfer
                .read_function(|buf| Ok(source.read(buf).unwrap_or(0)))
                .map_err(curl_err)?;
        }
        transfer
            .write_function(|data| {
                response_body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(curl_err)?;
        transfer
            .header_function(|line| {
                if let Some(h) = parse_header_line(line) {
                    response_headers.push(h);
                }
                true
            })
            .map_err(curl_err)?;
        transfer
            .progress_function(progress_callback(abort, progress))
            .map_err(curl_err)?;
        transfer.perform().map_err(curl_err)?;
    }

    let status = easy.response_code().map_err(curl_err)? as u16;
    Ok(TransportResponse {
        status,
        headers: response_headers,
        body: response_body,
    })
}

/// `Name: value` from a raw header line; status lines and blanks yield `None`.
fn parse_header_line(line: &[u8]) -> Option<(String, String)> {
    let line = std::str::from_utf8(line).ok()?.trim_end();
    let (name, value) = line.split_once(':')?;
    if name.is_empty() || name.contains(' ') {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Returning `false` from the callback makes curl fail with "aborted by callback".
fn progress_callback(
    abort: CancellationToken,
    counter: Option<Arc<AtomicU64>>,
) -> impl FnMut(f64, f64, f64, f64) -> bool {
    move |_dltotal, dlnow, _ultotal, ulnow| {
        if let Some(c) = &counter {
            c.store(dlnow.max(ulnow) as u64, Ordering::Relaxed);
        }
        !abort.is_cancelled()
    }
}
