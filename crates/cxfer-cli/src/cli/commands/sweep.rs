//! `cxfer sweep` – one expiry and eviction pass over the ledger.

use anyhow::Result;

use crate::cli::engine::Engine;

pub async fn run_sweep(engine: &Engine) -> Result<()> {
    let report = engine.ledger.sweep_expired().await?;
    println!(
        "expired {} session(s) ({} entries), demoted {}, evicted {}",
        report.expired_sessions,
        report.expired_entries,
        report.demoted_sessions,
        report.evicted_sessions
    );
    Ok(())
}
