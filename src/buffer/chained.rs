//! Chained byte queue for stream-mode tasks

use std::collections::VecDeque;
use std::io::SeekFrom;

use bytes::Bytes;

use super::{ReadOutcome, SeekError};

/// Ordered append-only chain of byte chunks.
///
/// The decoder reads sequentially; consumed chunks are released as the read
/// cursor crosses them, so memory stays proportional to the unread backlog.
/// Seeking is unsupported except for the position query
/// (`SeekFrom::Current(0)`).
#[derive(Debug, Default)]
pub struct ChainedQueue {
    chain: VecDeque<Bytes>,
    /// Offset into the front chunk
    front_offset: usize,
    /// Total bytes ever appended
    total_len: u64,
    /// Absolute read position
    read_pos: u64,
    eof: bool,
}

impl ChainedQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes appended so far
    pub fn len(&self) -> u64 {
        self.total_len
    }

    /// Absolute read position
    pub fn position(&self) -> u64 {
        self.read_pos
    }

    /// Bytes appended but not yet consumed.
    ///
    /// This is the consumer-visible backlog the fetcher checks against its
    /// pause threshold.
    pub fn pending(&self) -> u64 {
        self.total_len - self.read_pos
    }

    /// Append one chunk at the tail
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.total_len += bytes.len() as u64;
        self.chain.push_back(Bytes::copy_from_slice(bytes));
    }

    /// Copy bytes at the read cursor, releasing fully consumed chunks
    pub fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        if self.pending() == 0 {
            return if self.eof {
                ReadOutcome::Eof
            } else {
                ReadOutcome::WouldBlock
            };
        }

        let mut copied = 0;
        while copied < buf.len() {
            let Some(front) = self.chain.front() else {
                break;
            };
            let available = front.len() - self.front_offset;
            let n = available.min(buf.len() - copied);
            buf[copied..copied + n]
                .copy_from_slice(&front[self.front_offset..self.front_offset + n]);
            copied += n;
            self.front_offset += n;
            if self.front_offset == front.len() {
                self.chain.pop_front();
                self.front_offset = 0;
            }
        }
        self.read_pos += copied as u64;
        ReadOutcome::Copied(copied)
    }

    /// Copy up to `max` bytes starting at the read cursor without advancing
    pub fn read_front(&self, out: &mut Vec<u8>, max: usize) {
        let mut remaining = max;
        let mut skip = self.front_offset;
        for chunk in &self.chain {
            if remaining == 0 {
                break;
            }
            let slice = &chunk[skip..];
            skip = 0;
            let n = slice.len().min(remaining);
            out.extend_from_slice(&slice[..n]);
            remaining -= n;
        }
    }

    /// Only `SeekFrom::Current(0)` (position query) is supported
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, SeekError> {
        match pos {
            SeekFrom::Current(0) => Ok(self.read_pos),
            _ => Err(SeekError::Unsupported),
        }
    }

    /// Latch end-of-file
    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    /// Whether end-of-file has been latched
    pub fn eof_latched(&self) -> bool {
        self.eof
    }

    /// Drop all chunks and reset cursors
    pub fn clear(&mut self) {
        self.chain.clear();
        self.front_offset = 0;
        self.total_len = 0;
        self.read_pos = 0;
        self.eof = false;
    }
}
