//! Whole-payload SHA-256, computed on demand for the finalize call.

use std::io;

use sha2::{Digest, Sha256};

use super::Payload;

const CHUNK: u64 = 256 * 1024;

/// SHA-256 of the whole payload as lowercase hex. Reads in bounded chunks.
pub async fn sha256_payload(payload: &dyn Payload) -> io::Result<String> {
    let size = payload.descriptor().size;
    let mut hasher = Sha256::new();
    let mut offset = 0;
    while offset < size {
        let end = (offset + CHUNK).min(size);
        let bytes = payload.read_range(offset, end).await?;
        hasher.update(&bytes);
        offset = end;
    }
    Ok(hex::encode(hasher.finalize()))
}
