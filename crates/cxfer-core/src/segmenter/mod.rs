//! Piece planning: split a payload into fixed-size byte ranges.
//!
//! Partitioning is inline; nothing here touches the payload bytes.

mod range;

pub use range::{piece_count, plan_pieces, Piece};
