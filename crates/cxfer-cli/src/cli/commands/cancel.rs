//! `cxfer cancel` – cancel a session and drop its ledger state.

use anyhow::Result;

use crate::cli::engine::Engine;

pub async fn run_cancel(engine: &Engine, id: &str) -> Result<()> {
    engine.coordinator.cancel(id).await?;
    println!("canceled {}", id);
    Ok(())
}
