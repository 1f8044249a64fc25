//! Fixed-capacity contiguous buffer for whole-file tasks

use std::io::SeekFrom;

use super::{ReadOutcome, SeekError};

/// Append-only contiguous byte buffer with a bounded capacity.
///
/// The fetcher appends until it latches eof; the decoder reads and seeks
/// freely within `[0, len)`. Appends that would overflow the capacity are
/// rejected whole, with no partial write.
#[derive(Debug)]
pub struct FixedBuffer {
    data: Vec<u8>,
    capacity: usize,
    read_pos: u64,
    eof: bool,
}

impl FixedBuffer {
    /// Create an empty buffer with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.min(64 * 1024)),
            capacity,
            read_pos: 0,
            eof: false,
        }
    }

    /// Buffer capacity in bytes
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written so far
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Current read cursor
    pub fn position(&self) -> u64 {
        self.read_pos
    }

    /// Append bytes; returns `false` (leaving the buffer untouched) when the
    /// write would exceed the capacity.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if self.data.len() + bytes.len() > self.capacity {
            return false;
        }
        self.data.extend_from_slice(bytes);
        true
    }

    /// Copy bytes at the read cursor
    pub fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        let available = self.data.len() as u64 - self.read_pos.min(self.data.len() as u64);
        if available == 0 {
            return if self.eof {
                ReadOutcome::Eof
            } else {
                ReadOutcome::WouldBlock
            };
        }
        let start = self.read_pos as usize;
        let n = (buf.len() as u64).min(available) as usize;
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.read_pos += n as u64;
        ReadOutcome::Copied(n)
    }

    /// Copy up to `max` bytes from offset zero without advancing
    pub fn read_front(&self, out: &mut Vec<u8>, max: usize) {
        let n = max.min(self.data.len());
        out.extend_from_slice(&self.data[..n]);
    }

    /// Reposition the read cursor within `[0, len]`
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, SeekError> {
        let len = self.data.len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.read_pos as i64 + offset,
            SeekFrom::End(offset) => len + offset,
        };
        if target < 0 || target > len {
            return Err(SeekError::InvalidSeek);
        }
        self.read_pos = target as u64;
        Ok(self.read_pos)
    }

    /// Latch end-of-file
    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    /// Whether end-of-file has been latched
    pub fn eof_latched(&self) -> bool {
        self.eof
    }

    /// Drop contents and reset cursors
    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
        self.eof = false;
    }
}
