//! CLI command handlers, one file per command.

mod cancel;
mod probe;
mod resume;
mod send;
mod status;
mod sweep;
mod usage;

pub use cancel::run_cancel;
pub use probe::run_probe;
pub use resume::run_resume;
pub use send::run_send;
pub use status::run_status;
pub use sweep::run_sweep;
pub use usage::run_usage;

use anyhow::{bail, Result};
use cxfer_core::{SessionHandle, SessionOutcome};

use super::engine::Engine;
use super::progress;

/// Follow a started or resumed session and report how it ended.
async fn drive(engine: &Engine, handle: SessionHandle) -> Result<()> {
    let id = handle.session_id().to_string();
    engine.start_sweeper();
    match progress::follow(&engine.coordinator, &handle).await? {
        SessionOutcome::Completed => println!("completed {}", id),
        SessionOutcome::Paused => println!("paused {}; continue with `cxfer resume {}`", id, id),
        SessionOutcome::Canceled => println!("canceled {}", id),
        SessionOutcome::Failed {
            index: Some(index),
            error,
        } => bail!(
            "session {} failed at piece {}: {}; retry with `cxfer resume {}`",
            id,
            index,
            error,
            id
        ),
        SessionOutcome::Failed { index: None, error } => {
            bail!("session {} failed to finalize: {}", id, error)
        }
    }
    Ok(())
}
