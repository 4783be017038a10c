//! Chunk scheduler and session coordinator.
//!
//! Splits a payload into pieces, sends missing pieces through the transport
//! with bounded concurrency, hands failures to the retry policy, records
//! progress in the ledger, and finalizes once every piece is acknowledged:
//! ledger → remaining pieces → piece pool → finalize → ledger cleanup.

mod control;
mod coordinator;
mod finalize;
mod handle;
mod piece;
mod pipeline;
mod progress;

pub use control::{ControlRegistry, SessionControl};
pub use coordinator::{Coordinator, CoordinatorBuilder, StartOptions};
pub use finalize::FinalizeRequest;
pub use handle::SessionHandle;
pub use pipeline::SessionOutcome;
pub use progress::{ProgressStats, ProgressTracker};

#[cfg(test)]
mod tests;
