//! CLI for the cxfer upload engine.

mod args;
mod commands;
mod engine;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cxfer_core::config;

use args::SendArgs;
use commands::{
    run_cancel, run_probe, run_resume, run_send, run_status, run_sweep, run_usage,
};
use engine::Engine;

/// Top-level CLI for cxfer.
#[derive(Debug, Parser)]
#[command(name = "cxfer")]
#[command(about = "cxfer: resumable chunked uploads", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Upload a file in pieces. Ctrl-C pauses; `cxfer resume` picks it up again.
    Send(SendArgs),

    /// Resume a paused, failed or interrupted session.
    Resume {
        /// Session identifier (see `cxfer status`).
        id: String,

        /// Follow the network governor for concurrency and retry budget.
        #[arg(long)]
        adaptive: bool,
    },

    /// Show one session, or every session in the ledger.
    Status {
        id: Option<String>,
    },

    /// Cancel a session and drop its progress.
    Cancel {
        id: String,
    },

    /// Measure the link once against the configured probe endpoints.
    Probe,

    /// Remove expired ledger entries and evict if over the size limit.
    Sweep,

    /// Show ledger size and entry counts.
    Usage,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        if let CliCommand::Probe = cli.command {
            return run_probe(&cfg).await;
        }

        let adaptive = cli.command.wants_governor(cfg.governor.enabled);
        let engine = Engine::open(cfg, adaptive).await?;
        let result = match cli.command {
            CliCommand::Send(args) => run_send(&engine, &args).await,
            CliCommand::Resume { id, .. } => run_resume(&engine, &id).await,
            CliCommand::Status { id } => run_status(&engine, id.as_deref()).await,
            CliCommand::Cancel { id } => run_cancel(&engine, &id).await,
            CliCommand::Sweep => run_sweep(&engine).await,
            CliCommand::Usage => run_usage(&engine).await,
            CliCommand::Probe => Ok(()),
        };
        engine.shutdown().await;
        result
    }

    /// Transfer commands follow the governor when asked to or when it is enabled in config.
    fn wants_governor(&self, enabled: bool) -> bool {
        match self {
            CliCommand::Send(args) => enabled || args.adaptive,
            CliCommand::Resume { adaptive, .. } => enabled || *adaptive,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests;
