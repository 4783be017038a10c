//! Minimal HTTP/1.1 server that accepts piece uploads for integration tests.
//!
//! Records every POST/PUT with its `Content-Range` and `X-Piece-Index`, answers
//! HEAD with 200, serves `GET ...?bytes=N` with N bytes, and can be told to fail
//! the next requests for a given piece index with a status code.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Received {
    pub method: String,
    pub path: String,
    pub index: Option<u64>,
    /// (start, end_inclusive, total) from `Content-Range: bytes s-e/t`.
    pub range: Option<(u64, u64, u64)>,
    pub session_id: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct State {
    received: Vec<Received>,
    failures: HashMap<u64, VecDeque<u16>>,
}

/// Handle to a running server. The server thread lives until the process exits.
#[derive(Clone)]
pub struct PieceServer {
    base: String,
    state: Arc<Mutex<State>>,
}

impl PieceServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(State::default()));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&shared);
                thread::spawn(move || handle(stream, &state));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{}", port),
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Answer the next requests for piece `index` with these statuses, in order.
    pub fn fail_piece(&self, index: u64, statuses: &[u16]) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(index)
            .or_default()
            .extend(statuses.iter().copied());
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn received_on(&self, path: &str) -> Vec<Received> {
        self.received()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    /// Reassemble the uploaded payload from the pieces that were accepted.
    pub fn assembled(&self, path: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for r in self.received_on(path) {
            let Some((start, end, total)) = r.range else {
                continue;
            };
            if out.len() < total as usize {
                out.resize(total as usize, 0);
            }
            out[start as usize..=end as usize].copy_from_slice(&r.body);
        }
        out
    }
}

fn handle(mut stream: TcpStream, state: &Mutex<State>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some((head, mut body)) = read_head(&mut stream) else {
        return;
    };
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("/").to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while body.len() < length {
        let mut buf = vec![0u8; length - body.len()];
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => body.extend_from_slice(&buf[..n]),
        }
    }

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.clone(), None),
    };

    match method.as_str() {
        "HEAD" => respond(&mut stream, 200, &[]),
        "GET" => {
            let n = query
                .as_deref()
                .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("bytes=")))
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            respond(&mut stream, 200, &vec![b'x'; n]);
        }
        "POST" | "PUT" => {
            let index = headers.get("x-piece-index").and_then(|v| v.parse().ok());
            let status = {
                let mut st = state.lock().unwrap();
                let scripted = index.and_then(|i| st.failures.get_mut(&i).and_then(|q| q.pop_front()));
                match scripted {
                    Some(code) => code,
                    None => {
                        st.received.push(Received {
                            method: method.clone(),
                            path,
                            index,
                            range: headers.get("content-range").and_then(|v| parse_range(v)),
                            session_id: headers.get("x-session-id").cloned(),
                            body,
                        });
                        200
                    }
                }
            };
            respond(&mut stream, status, b"");
        }
        _ => respond(&mut stream, 405, b""),
    }
}

/// Read up to the end of the header block; returns it and any body bytes already read.
fn read_head(stream: &mut TcpStream) -> Option<(String, Vec<u8>)> {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..pos]).to_string();
            return Some((head, data[pos + 4..].to_vec()));
        }
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }
}

fn respond(stream: &mut TcpStream, status: u16, body: &[u8]) {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}

/// `bytes S-E/T` -> (S, E, T).
fn parse_range(value: &str) -> Option<(u64, u64, u64)> {
    let spec = value.strip_prefix("bytes ")?;
    let (range, total) = spec.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?, total.parse().ok()?))
}
