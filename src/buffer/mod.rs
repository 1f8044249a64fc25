//! Decoder-facing byte sources
//!
//! A running task owns exactly one byte source. File-mode tasks buffer the
//! whole download in a [`FixedBuffer`] the decoder can seek freely; stream
//! mode appends into a [`ChainedQueue`] of chunks the decoder reads
//! sequentially. Both are single-writer (fetcher) / single-reader (decoder)
//! with respect to logical bytes.

mod chained;
mod fixed;

#[cfg(test)]
mod tests;

use std::io::SeekFrom;
use std::sync::{Arc, Mutex};

pub use chained::ChainedQueue;
pub use fixed::FixedBuffer;

/// Outcome of a source read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Copied `n` bytes into the destination
    Copied(usize),
    /// No bytes available right now, but the source is still filling
    WouldBlock,
    /// The source is drained and latched end-of-file
    Eof,
}

/// Why a seek was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekError {
    /// The source variant does not support repositioning
    Unsupported,
    /// The target position falls outside the known byte range
    InvalidSeek,
}

/// A byte source shared between the fetcher (writer) and the decoder
/// (reader). The inner mutex is taken per call, never held across awaits.
pub type SharedByteSource = Arc<Mutex<ByteSource>>;

/// Tagged byte source: one variant per task
#[derive(Debug)]
pub enum ByteSource {
    /// Fixed-capacity contiguous buffer for whole-file tasks
    Fixed(FixedBuffer),
    /// Ordered chain of byte chunks for stream-mode tasks
    Chained(ChainedQueue),
}

impl ByteSource {
    /// Wrap a source for sharing between fetcher and decoder
    #[must_use]
    pub fn into_shared(self) -> SharedByteSource {
        Arc::new(Mutex::new(self))
    }

    /// Append bytes at the write end.
    ///
    /// Returns `false` when the fixed variant would exceed its capacity; the
    /// buffer is left untouched in that case. The chained variant always
    /// accepts (backpressure is the fetcher's job).
    pub fn append(&mut self, data: &[u8]) -> bool {
        match self {
            Self::Fixed(buffer) => buffer.append(data),
            Self::Chained(queue) => {
                queue.append(data);
                true
            }
        }
    }

    /// Copy bytes at the read cursor, advancing it
    pub fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        match self {
            Self::Fixed(buffer) => buffer.read(buf),
            Self::Chained(queue) => queue.read(buf),
        }
    }

    /// Copy up to `max` bytes from the front of the source without moving
    /// the read cursor. Used for format probing.
    pub fn read_front(&self, out: &mut Vec<u8>, max: usize) {
        match self {
            Self::Fixed(buffer) => buffer.read_front(out, max),
            Self::Chained(queue) => queue.read_front(out, max),
        }
    }

    /// Reposition the read cursor
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, SeekError> {
        match self {
            Self::Fixed(buffer) => buffer.seek(pos),
            Self::Chained(queue) => queue.seek(pos),
        }
    }

    /// Bytes known to the source so far
    pub fn len(&self) -> u64 {
        match self {
            Self::Fixed(buffer) => buffer.len(),
            Self::Chained(queue) => queue.len(),
        }
    }

    /// Whether no bytes have arrived yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes not yet consumed by the reader
    pub fn pending(&self) -> u64 {
        match self {
            Self::Fixed(buffer) => buffer.len().saturating_sub(buffer.position()),
            Self::Chained(queue) => queue.pending(),
        }
    }

    /// Current read cursor position
    pub fn position(&self) -> u64 {
        match self {
            Self::Fixed(buffer) => buffer.position(),
            Self::Chained(queue) => queue.position(),
        }
    }

    /// Latch end-of-file: the length is final once set
    pub fn set_eof(&mut self) {
        match self {
            Self::Fixed(buffer) => buffer.set_eof(),
            Self::Chained(queue) => queue.set_eof(),
        }
    }

    /// Whether end-of-file has been latched
    pub fn eof_latched(&self) -> bool {
        match self {
            Self::Fixed(buffer) => buffer.eof_latched(),
            Self::Chained(queue) => queue.eof_latched(),
        }
    }

    /// Whether the variant supports repositioning
    pub fn is_seekable(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    /// Drop all buffered bytes and reset cursors. The eof latch clears too;
    /// only used between task cycles.
    pub fn clear(&mut self) {
        match self {
            Self::Fixed(buffer) => buffer.clear(),
            Self::Chained(queue) => queue.clear(),
        }
    }
}
