//! `cxfer send` arguments and the value parsers they use.

use clap::Args;
use cxfer_core::config::TransferOverrides;
use cxfer_core::session::TransferTarget;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct SendArgs {
    /// File to upload.
    pub path: PathBuf,

    /// Endpoint that receives each piece.
    #[arg(long, value_name = "URL")]
    pub url: String,

    /// Endpoint called once after every piece landed.
    #[arg(long, value_name = "URL")]
    pub finalize_url: Option<String>,

    /// Extra request header, repeatable.
    #[arg(long = "header", short = 'H', value_name = "NAME: VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Pieces in flight at once.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Piece size in bytes; accepts K, M and G suffixes.
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub piece_size: Option<u64>,

    /// Timeout for one piece attempt.
    #[arg(long, value_name = "MS")]
    pub piece_timeout_ms: Option<u64>,

    /// Send pieces one at a time in index order.
    #[arg(long)]
    pub sequential: bool,

    /// Keep sending other pieces when one fails permanently.
    #[arg(long)]
    pub tolerate_failures: bool,

    /// Abort in-flight pieces on pause instead of letting them finish.
    #[arg(long)]
    pub abort_on_pause: bool,

    /// Send the payload's SHA-256 with the finalize call.
    #[arg(long)]
    pub checksum: bool,

    /// Request method for pieces.
    #[arg(long, value_parser = ["POST", "PUT"])]
    pub method: Option<String>,

    /// Ledger priority, 1 (evicted first) to 10.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub priority: Option<u8>,

    /// Start a new session even if the ledger holds one for this file.
    #[arg(long = "new")]
    pub force_new: bool,

    /// Follow the network governor for concurrency, piece size and retry budget.
    #[arg(long)]
    pub adaptive: bool,
}

impl SendArgs {
    pub fn target(&self) -> TransferTarget {
        let mut target = TransferTarget::new(self.url.clone());
        target.finalize_url = self.finalize_url.clone();
        target.headers = self.headers.iter().cloned().collect();
        target
    }

    /// Flags left unset fall through to `[transfer]` in config.toml.
    pub fn overrides(&self) -> TransferOverrides {
        TransferOverrides {
            concurrency: self.concurrency,
            piece_size: self.piece_size,
            piece_timeout_ms: self.piece_timeout_ms,
            sequential: self.sequential.then_some(true),
            tolerate_partial_failure: self.tolerate_failures.then_some(true),
            abort_in_flight_on_pause: self.abort_on_pause.then_some(true),
            checksum: self.checksum.then_some(true),
            method: self.method.clone(),
        }
    }
}

/// `Name: value` -> `("Name", "value")`.
pub fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected NAME: VALUE, got {:?}", s))?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(format!("invalid header name in {:?}", s));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// `65536`, `512K`, `4M`, `1GiB` -> bytes. Suffixes are binary.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let t = s.trim();
    let digits_end = t.find(|c: char| !c.is_ascii_digit()).unwrap_or(t.len());
    let (num, unit) = t.split_at(digits_end);
    let n: u64 = num
        .parse()
        .map_err(|_| format!("invalid size: {:?}", s))?;
    let mult: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size unit in {:?}", s)),
    };
    let bytes = n
        .checked_mul(mult)
        .ok_or_else(|| format!("size too large: {:?}", s))?;
    if bytes == 0 {
        return Err("piece size must be positive".to_string());
    }
    Ok(bytes)
}
