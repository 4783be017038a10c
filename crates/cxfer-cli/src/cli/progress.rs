//! Live progress line for a running session; Ctrl-C pauses it.

use anyhow::Result;
use cxfer_core::scheduler::ProgressStats;
use cxfer_core::{Coordinator, SessionHandle, SessionOutcome};
use std::io::Write;
use std::time::Duration;

const PROGRESS_INTERVAL_MS: u64 = 500;

/// Print progress until the run ends. The first Ctrl-C requests a pause and
/// waits for in-flight pieces to settle.
pub async fn follow(coordinator: &Coordinator, handle: &SessionHandle) -> Result<SessionOutcome> {
    let id = handle.session_id().to_string();
    let mut ticker = tokio::time::interval(Duration::from_millis(PROGRESS_INTERVAL_MS));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let wait = handle.wait();
    tokio::pin!(wait);
    let mut pausing = false;

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            _ = ticker.tick() => print_line(&format_progress(&handle.progress())),
            signal = &mut ctrl_c, if !pausing => {
                pausing = true;
                if signal.is_ok() {
                    eprintln!("\npausing {} ...", id);
                    coordinator.pause(&id).await?;
                }
            }
        }
    };
    print_line(&format_progress(&handle.progress()));
    println!();
    Ok(outcome)
}

fn print_line(line: &str) {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "\r{}", line);
    let _ = out.flush();
}

pub fn format_progress(stats: &ProgressStats) -> String {
    let done_mib = stats.bytes_done as f64 / 1_048_576.0;
    let total_mib = stats.total_bytes as f64 / 1_048_576.0;
    let rate_mib = stats.bytes_per_sec() / 1_048_576.0;
    let eta = stats
        .eta_secs()
        .map(|s| format!("{:.0}s", s))
        .unwrap_or_else(|| "?".to_string());
    format!(
        "  {:.1} / {:.1} MiB ({:.1}%)  {}/{} pieces  {:.2} MiB/s  ETA {}  ",
        done_mib,
        total_mib,
        stats.fraction() * 100.0,
        stats.pieces_done,
        stats.total_pieces,
        rate_mib,
        eta
    )
}
