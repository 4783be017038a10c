//! Piece type and range planning.

/// One addressable byte range of a payload: `[start, end)` (half-open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub index: u64,
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive).
    pub end: u64,
}

impl Piece {
    /// Length of this piece in bytes.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Content-Range` value (inclusive end): `bytes start-(end-1)/total`.
    pub fn content_range(&self, total: u64) -> String {
        if self.start >= self.end {
            format!("bytes */{}", total)
        } else {
            format!("bytes {}-{}/{}", self.start, self.end - 1, total)
        }
    }
}

/// `ceil(payload_size / piece_size)`; 0 for an empty payload.
pub fn piece_count(payload_size: u64, piece_size: u64) -> u64 {
    if payload_size == 0 {
        return 0;
    }
    let piece_size = piece_size.max(1);
    payload_size.div_ceil(piece_size)
}

/// Builds the piece plan for a payload. Every piece is `piece_size` long except
/// possibly the last. Returns an empty vec for an empty payload.
pub fn plan_pieces(payload_size: u64, piece_size: u64) -> Vec<Piece> {
    let piece_size = piece_size.max(1);
    let count = piece_count(payload_size, piece_size);
    (0..count)
        .map(|index| {
            let start = index * piece_size;
            let end = (start + piece_size).min(payload_size);
            Piece { index, start, end }
        })
        .collect()
}
