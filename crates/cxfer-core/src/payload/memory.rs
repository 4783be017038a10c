use std::io;
use std::sync::Arc;

use async_trait::async_trait;

use super::{check_range, Payload, PayloadDescriptor};

/// Payload held in memory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MemoryPayload {
    descriptor: PayloadDescriptor,
    bytes: Arc<Vec<u8>>,
}

impl MemoryPayload {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::with_modified(name, content_type, bytes, 0)
    }

    pub fn with_modified(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
        modified_ms: u64,
    ) -> Self {
        let descriptor =
            PayloadDescriptor::new(name, bytes.len() as u64, content_type, modified_ms);
        Self {
            descriptor,
            bytes: Arc::new(bytes),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[async_trait]
impl Payload for MemoryPayload {
    fn descriptor(&self) -> &PayloadDescriptor {
        &self.descriptor
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        check_range(start, end, self.descriptor.size)?;
        Ok(self.bytes[start as usize..end as usize].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_slices_and_rejects_overruns() {
        let p = MemoryPayload::new("a.txt", "text/plain", b"hello world".to_vec());
        assert_eq!(p.descriptor().size, 11);
        assert_eq!(p.read_range(6, 11).await.unwrap(), b"world");
        assert!(p.read_range(6, 12).await.is_err());
        assert!(p.read_range(4, 2).await.is_err());
    }
}
