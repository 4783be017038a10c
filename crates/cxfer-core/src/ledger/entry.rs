//! Entry encoding: fixed binary header followed by the (maybe deflated) value.
//!
//! Header layout, big-endian:
//! `magic[4] | flags u8 | priority u8 | created_at u64 | expires_at u64 |
//!  last_accessed_at u64 | access_count u32`

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use super::LedgerError;

const MAGIC: &[u8; 4] = b"CXL1";
const FLAG_COMPRESSED: u8 = 0x01;
pub const HEADER_LEN: usize = 4 + 1 + 1 + 8 + 8 + 8 + 4;

/// Bookkeeping stored with every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub created_at: u64,
    pub expires_at: u64,
    pub priority: u8,
    pub last_accessed_at: u64,
    pub access_count: u32,
}

impl EntryMeta {
    pub fn new(now_ms: u64, ttl_ms: u64, priority: u8) -> Self {
        Self {
            created_at: now_ms,
            expires_at: now_ms.saturating_add(ttl_ms),
            priority,
            last_accessed_at: now_ms,
            access_count: 0,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at <= now_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub meta: EntryMeta,
    pub value: Vec<u8>,
}

impl LedgerEntry {
    /// Serialize; the value is deflated when longer than `threshold` and
    /// compression actually shrinks it.
    pub fn encode(&self, threshold: usize) -> Vec<u8> {
        let (flags, body) = if self.value.len() > threshold {
            match deflate(&self.value) {
                Ok(c) if c.len() < self.value.len() => (FLAG_COMPRESSED, c),
                Ok(_) => (0, self.value.clone()),
                Err(e) => {
                    tracing::warn!(error = %e, "ledger compression failed, storing raw");
                    (0, self.value.clone())
                }
            }
        } else {
            (0, self.value.clone())
        };
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        write_header(&mut out, flags, &self.meta);
        out.extend_from_slice(&body);
        out
    }

    pub fn decode(key: &str, bytes: &[u8]) -> Result<Self, LedgerError> {
        let (flags, meta) = read_header(key, bytes)?;
        let body = &bytes[HEADER_LEN..];
        let value = if flags & FLAG_COMPRESSED != 0 {
            inflate(body).map_err(|e| corrupt(key, format!("inflate: {}", e)))?
        } else {
            body.to_vec()
        };
        Ok(Self { meta, value })
    }
}

/// Header only, without touching the value.
pub fn decode_meta(key: &str, bytes: &[u8]) -> Result<EntryMeta, LedgerError> {
    read_header(key, bytes).map(|(_, meta)| meta)
}

/// Rewrite the header in place, keeping flags and body.
pub fn replace_meta(key: &str, bytes: &mut [u8], meta: &EntryMeta) -> Result<(), LedgerError> {
    let (flags, _) = read_header(key, bytes)?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    write_header(&mut header, flags, meta);
    bytes[..HEADER_LEN].copy_from_slice(&header);
    Ok(())
}

fn write_header(out: &mut Vec<u8>, flags: u8, meta: &EntryMeta) {
    out.extend_from_slice(MAGIC);
    out.push(flags);
    out.push(meta.priority);
    out.extend_from_slice(&meta.created_at.to_be_bytes());
    out.extend_from_slice(&meta.expires_at.to_be_bytes());
    out.extend_from_slice(&meta.last_accessed_at.to_be_bytes());
    out.extend_from_slice(&meta.access_count.to_be_bytes());
}

fn read_header(key: &str, bytes: &[u8]) -> Result<(u8, EntryMeta), LedgerError> {
    if bytes.len() < HEADER_LEN {
        return Err(corrupt(key, format!("{} bytes, header needs {}", bytes.len(), HEADER_LEN)));
    }
    if &bytes[..4] != MAGIC {
        return Err(corrupt(key, "bad magic".to_string()));
    }
    let u64_at = |at: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&bytes[at..at + 8]);
        u64::from_be_bytes(b)
    };
    let mut count = [0u8; 4];
    count.copy_from_slice(&bytes[30..34]);
    let meta = EntryMeta {
        priority: bytes[5],
        created_at: u64_at(6),
        expires_at: u64_at(14),
        last_accessed_at: u64_at(22),
        access_count: u32::from_be_bytes(count),
    };
    Ok((bytes[4], meta))
}

fn corrupt(key: &str, reason: String) -> LedgerError {
    LedgerError::Corrupt {
        key: key.to_string(),
        reason,
    }
}

fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data)?;
    enc.finish()
}

fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
