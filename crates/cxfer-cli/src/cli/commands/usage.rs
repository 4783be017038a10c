//! `cxfer usage` – ledger size and entry counts.

use anyhow::Result;

use crate::cli::engine::Engine;

pub async fn run_usage(engine: &Engine) -> Result<()> {
    let usage = engine.ledger.usage().await?;
    println!("sessions:  {}", usage.session_count);
    println!("pieces:    {}", usage.piece_count);
    println!("size:      {} bytes", usage.total_size);
    if let Some(limit) = engine.config.ledger.max_total_bytes {
        let pct = if limit > 0 {
            usage.total_size as f64 / limit as f64 * 100.0
        } else {
            0.0
        };
        println!("limit:     {} bytes ({:.1}% used)", limit, pct);
    }
    Ok(())
}
