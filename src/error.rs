// =============================================================================
// error.rs - EVERYTHING THAT CAN GO WRONG, IN ONE PLACE
// =============================================================================
//
// There is no retry layer anywhere in this crate. A dedup pass is a single
// benchmark run: if the stream is broken halfway through, the numbers from
// that run are worthless, so we stop and say why.
//
// Clean end-of-stream is NOT in here. Readers return `Ok(None)` for that.
// =============================================================================

use std::io;

use thiserror::Error;

/// Errors surfaced by the dedup core and its stream collaborators.
#[derive(Debug, Error)]
pub enum DedupError {
    /// Bloom filter sizing was asked for something impossible.
    #[error("invalid filter parameters: {0}")]
    InvalidParameters(String),

    /// A bit index fell outside the store. Always a sizing or hashing bug.
    #[error("bit index out of range: the len is {len} but the index is {index}")]
    OutOfRangeAccess { index: usize, len: usize },

    /// The record stream failed for a reason other than a clean end.
    #[error("failed to read record #{record}: {source}")]
    StreamRead {
        record: u64,
        #[source]
        source: io::Error,
    },

    /// The stream ended in the middle of a frame.
    #[error("record stream truncated inside frame #{record} ({got} of {expected} bytes)")]
    TruncatedFrame { record: u64, got: usize, expected: usize },

    /// A frame header declared a payload larger than we are willing to buffer.
    #[error("frame #{record} declares {len} bytes, limit is {max}")]
    FrameTooLarge { record: u64, len: usize, max: usize },

    /// Writing a generated record failed.
    #[error("failed to write record #{record}: {source}")]
    StreamWrite {
        record: u64,
        #[source]
        source: io::Error,
    },
}

impl DedupError {
    /// True for every flavour of read-side stream failure.
    pub fn is_stream_read(&self) -> bool {
        matches!(
            self,
            DedupError::StreamRead { .. }
                | DedupError::TruncatedFrame { .. }
                | DedupError::FrameTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DedupError>;
