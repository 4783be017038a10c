//! `cxfer status` – show sessions in the ledger.

use anyhow::Result;
use cxfer_core::session::TransferSession;

use crate::cli::engine::Engine;

pub async fn run_status(engine: &Engine, id: Option<&str>) -> Result<()> {
    match id {
        Some(id) => {
            let s = engine.coordinator.status(id).await?;
            print_detail(&s);
        }
        None => {
            let sessions = engine.coordinator.list().await?;
            if sessions.is_empty() {
                println!("No sessions in the ledger.");
            } else {
                println!(
                    "{:<48} {:<13} {:>11} {:>12} {}",
                    "ID", "STATE", "PIECES", "SIZE", "FILE"
                );
                for s in sessions {
                    println!(
                        "{:<48} {:<13} {:>11} {:>12} {}",
                        s.session_id,
                        s.status.as_str(),
                        format!("{}/{}", s.completed_pieces.len(), s.total_pieces),
                        s.payload_size,
                        s.payload.name
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_detail(s: &TransferSession) {
    println!("session:   {}", s.session_id);
    println!("file:      {}", s.payload.name);
    println!("state:     {}", s.status.as_str());
    println!("target:    {}", s.target.url);
    if let Some(finalize) = &s.target.finalize_url {
        println!("finalize:  {}", finalize);
    }
    println!(
        "pieces:    {}/{} ({} bytes each)",
        s.completed_pieces.len(),
        s.total_pieces,
        s.piece_size
    );
    println!("bytes:     {}/{}", s.bytes_done(), s.payload_size);
    println!("priority:  {}", s.priority);
    println!("retries:   {}", s.retry_budget_used);
    if !s.failed_pieces.is_empty() {
        println!("failed:    {:?}", s.failed_pieces);
    }
    if let Some(err) = &s.last_error {
        println!("error:     {}", err);
    }
}
