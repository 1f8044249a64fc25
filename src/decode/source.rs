//! Media-source adapter over a shared byte source
//!
//! Bridges the fetcher-fed [`ByteSource`](crate::buffer::ByteSource) into the
//! blocking `Read + Seek` view the decoders expect. The shared lock is taken
//! per call and never held across reads. A drained-but-still-filling source
//! surfaces as `WouldBlock`, which the decoders translate into their
//! need-more state.

use std::io::{self, Read, Seek, SeekFrom};

use symphonia::core::io::MediaSource;

use crate::buffer::{ReadOutcome, SeekError, SharedByteSource};

/// `Read + Seek` view over a shared byte source
pub struct SourceReader {
    source: SharedByteSource,
}

impl SourceReader {
    /// Wrap a shared byte source
    #[must_use]
    pub fn new(source: SharedByteSource) -> Self {
        Self { source }
    }
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut source = self.source.lock().expect("byte source lock poisoned");
        match source.read(buf) {
            ReadOutcome::Copied(n) => Ok(n),
            ReadOutcome::Eof => Ok(0),
            ReadOutcome::WouldBlock => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "byte source still filling",
            )),
        }
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut source = self.source.lock().expect("byte source lock poisoned");
        source.seek(pos).map_err(|e| match e {
            SeekError::Unsupported => io::Error::new(
                io::ErrorKind::Unsupported,
                "seek unsupported on streaming source",
            ),
            SeekError::InvalidSeek => {
                io::Error::new(io::ErrorKind::InvalidInput, "seek out of range")
            }
        })
    }
}

impl MediaSource for SourceReader {
    fn is_seekable(&self) -> bool {
        self.source
            .lock()
            .expect("byte source lock poisoned")
            .is_seekable()
    }

    fn byte_len(&self) -> Option<u64> {
        let source = self.source.lock().expect("byte source lock poisoned");
        // Only meaningful once the writer has latched eof; before that the
        // length is still growing and must not be reported as final.
        source.eof_latched().then(|| source.len())
    }
}
