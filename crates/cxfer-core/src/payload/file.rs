use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{check_range, Payload, PayloadDescriptor, PayloadOpener, SharedPayload};

/// Payload backed by a file on disk. Each read opens its own handle so
/// concurrent pieces never share a cursor.
#[derive(Debug, Clone)]
pub struct FilePayload {
    descriptor: PayloadDescriptor,
    path: PathBuf,
}

impl FilePayload {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "payload".to_string());
        let mut descriptor =
            PayloadDescriptor::new(name, meta.len(), guess_content_type(&path), modified_ms);
        descriptor.path = Some(path.clone());
        Ok(Self { descriptor, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Payload for FilePayload {
    fn descriptor(&self) -> &PayloadDescriptor {
        &self.descriptor
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        check_range(start, end, self.descriptor.size)?;
        let mut f = tokio::fs::File::open(&self.path).await?;
        f.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (end - start) as usize];
        f.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// Reopens file payloads by their recorded path. Refuses files whose size or
/// modification time no longer match, since completed pieces would be stale.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileOpener;

#[async_trait]
impl PayloadOpener for FileOpener {
    async fn open(&self, descriptor: &PayloadDescriptor) -> io::Result<SharedPayload> {
        let path = descriptor.path.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("payload {} has no recorded path", descriptor.name),
            )
        })?;
        let payload = FilePayload::open(path).await?;
        let current = payload.descriptor();
        if current.size != descriptor.size || current.modified_ms != descriptor.modified_ms {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("payload changed since session start: {}", path.display()),
            ));
        }
        Ok(Arc::new(payload))
    }
}

/// Content type from the file extension; `application/octet-stream` when unknown.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") | Some("log") => "text/plain",
        Some("json") => "application/json",
        Some("html") | Some("htm") => "text/html",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}
