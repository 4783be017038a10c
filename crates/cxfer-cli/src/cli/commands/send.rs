//! `cxfer send` – upload a file in pieces.

use anyhow::{Context, Result};
use cxfer_core::payload::FilePayload;
use cxfer_core::StartOptions;
use std::sync::Arc;

use super::drive;
use crate::cli::args::SendArgs;
use crate::cli::engine::Engine;

pub async fn run_send(engine: &Engine, args: &SendArgs) -> Result<()> {
    let payload = FilePayload::open(&args.path)
        .await
        .with_context(|| format!("open {}", args.path.display()))?;
    let options = StartOptions {
        overrides: args.overrides(),
        priority: args.priority,
        force_new: args.force_new,
    };
    let handle = engine
        .coordinator
        .start(Arc::new(payload), args.target(), options)
        .await?;

    let session = handle.snapshot();
    tracing::info!(
        session_id = handle.session_id(),
        pieces = session.total_pieces,
        "send {}",
        args.path.display()
    );
    println!(
        "session {}: {} bytes in {} piece(s), {} already done",
        session.session_id,
        session.payload_size,
        session.total_pieces,
        session.completed_pieces.len()
    );
    drive(engine, handle).await
}
