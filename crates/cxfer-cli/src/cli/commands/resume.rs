//! `cxfer resume` – continue a session from the ledger.

use anyhow::Result;

use super::drive;
use crate::cli::engine::Engine;

pub async fn run_resume(engine: &Engine, id: &str) -> Result<()> {
    let handle = engine.coordinator.resume(id).await?;
    let session = handle.snapshot();
    println!(
        "resuming {}: {}/{} piece(s) done",
        id,
        session.completed_pieces.len(),
        session.total_pieces
    );
    drive(engine, handle).await
}
