//! Payload sources: what the engine reads piece bytes from.

mod digest;
mod file;
mod memory;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use digest::sha256_payload;
pub use file::{guess_content_type, FileOpener, FilePayload};
pub use memory::MemoryPayload;

/// Identifying metadata of a payload. Feeds the session fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDescriptor {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    /// Modification time, unix millis.
    pub modified_ms: u64,
    /// Set for file payloads so a later process can reopen them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl PayloadDescriptor {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        content_type: impl Into<String>,
        modified_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            content_type: content_type.into(),
            modified_ms,
            path: None,
        }
    }
}

/// Random-access byte source.
#[async_trait]
pub trait Payload: Send + Sync {
    fn descriptor(&self) -> &PayloadDescriptor;

    /// Bytes `[start, end)`. Ranges past the end of the payload are an error.
    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>>;
}

pub type SharedPayload = Arc<dyn Payload>;

/// Reopens a payload from its persisted descriptor (resume after restart).
#[async_trait]
pub trait PayloadOpener: Send + Sync {
    async fn open(&self, descriptor: &PayloadDescriptor) -> io::Result<SharedPayload>;
}

pub(crate) fn check_range(start: u64, end: u64, size: u64) -> io::Result<()> {
    if start > end || end > size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range {}..{} outside payload of {} bytes", start, end, size),
        ));
    }
    Ok(())
}
