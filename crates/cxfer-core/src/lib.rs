//! cxfer core: resumable, adaptive chunked uploads.
//!
//! A [`scheduler::Coordinator`] splits a payload into pieces and sends them
//! through a [`transport::Transport`], recording progress in a
//! [`ledger::TransferLedger`] so an interrupted session resumes where it left
//! off. A [`governor::NetworkGovernor`] can feed it concurrency and retry
//! budgets derived from measured link quality.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod governor;
pub mod ledger;
pub mod logging;
pub mod payload;
pub mod retry;
pub mod scheduler;
pub mod segmenter;
pub mod session;
pub mod store;
pub mod transport;

pub use error::TransferError;
pub use scheduler::{Coordinator, SessionHandle, SessionOutcome, StartOptions};
