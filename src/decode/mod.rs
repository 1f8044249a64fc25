//! Decoder adapters
//!
//! A uniform pull interface over two symphonia-backed implementations: an
//! MP3-specialised decoder and a general probe-driven container decoder.
//! The producer probes the first bytes of a task, picks the implementation,
//! and drives `setup`; the consumer pulls PCM through `read`.

mod container;
mod engine;
mod mp3;
mod source;


pub use container::ContainerDecoder;
pub use mp3::Mp3Decoder;
pub use source::SourceReader;

use crate::audio::AudioFormat;
use crate::buffer::SharedByteSource;
use crate::error::{Result, StreamError};

/// Outcome of one decoder pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeRead {
    /// `n` bytes of PCM were written to the output buffer
    Pcm(usize),
    /// The stream parameters changed; `n` bytes were decoded under the new
    /// format, which `format()` now reports
    NewFormat(usize),
    /// The source would block mid-read; re-invoke when bytes arrive
    NeedMore,
    /// The stream is fully drained
    Done,
}

/// Uniform pull interface over an audio decoder
pub trait Decoder: Send {
    /// Open the decoder over a byte source and resolve stream parameters.
    ///
    /// May be re-invoked after more bytes arrive when resolution fails.
    fn setup(&mut self, source: SharedByteSource) -> Result<()>;

    /// Decode into `out`, returning how the pull ended
    fn read(&mut self, out: &mut [u8]) -> Result<DecodeRead>;

    /// Resolved stream parameters, `None` until known
    fn format(&self) -> Option<AudioFormat>;

    /// Seek to an absolute position in seconds
    fn seek(&mut self, seconds: f64) -> Result<()>;

    /// Samples decoded so far, per channel, at the source rate
    fn current_samples(&self) -> i64;

    /// Total samples per channel, 0 while unknown
    fn total_samples(&self) -> i64;

    /// Drop all decoder state so a fresh `setup` can run
    fn reset(&mut self);
}

/// Container family detected by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// MPEG audio (ID3 tag or MPEG sync)
    Mp3,
    /// ISO base media (`ftyp` box); needs the full byte range before setup
    Mp4Family,
    /// Anything else the general decoder may recognise
    Other,
}

impl ContainerKind {
    /// Whether setup must wait for the complete byte range
    #[must_use]
    pub fn needs_complete_source(self) -> bool {
        matches!(self, Self::Mp4Family)
    }
}

/// Classify the leading bytes of a media stream.
///
/// Returns `None` when the run is too short to say anything.
pub fn probe_container(head: &[u8]) -> Option<ContainerKind> {
    if head.len() < 8 {
        return None;
    }
    if &head[..3] == b"ID3" {
        return Some(ContainerKind::Mp3);
    }
    if &head[4..8] == b"ftyp" {
        return Some(ContainerKind::Mp4Family);
    }
    // MPEG audio frame sync: 11 set bits
    if head[0] == 0xFF && (head[1] & 0xE0) == 0xE0 {
        return Some(ContainerKind::Mp3);
    }
    Some(ContainerKind::Other)
}

/// Instantiate the decoder matching a probed container kind
#[must_use]
pub fn make_decoder(kind: ContainerKind) -> Box<dyn Decoder> {
    match kind {
        ContainerKind::Mp3 => Box::new(Mp3Decoder::new()),
        ContainerKind::Mp4Family | ContainerKind::Other => Box::new(ContainerDecoder::new()),
    }
}

/// Map a symphonia error to the adapter's pull outcome.
///
/// `WouldBlock` I/O means the source is still filling; `UnexpectedEof` after
/// the writer latched eof means the stream is drained.
pub(crate) fn classify_symphonia_error(
    error: &symphonia::core::errors::Error,
) -> Option<DecodeRead> {
    use symphonia::core::errors::Error;
    match error {
        Error::IoError(io_err) if io_err.kind() == std::io::ErrorKind::WouldBlock => {
            Some(DecodeRead::NeedMore)
        }
        Error::IoError(io_err) if io_err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Some(DecodeRead::Done)
        }
        _ => None,
    }
}

pub(crate) fn decoder_error(message: impl std::fmt::Display) -> StreamError {
    StreamError::Decoder {
        message: message.to_string(),
    }
}
