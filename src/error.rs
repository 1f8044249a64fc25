use std::io;
use thiserror::Error;

/// Classification of a failed read cycle, recorded on the running task.
///
/// These are the error kinds that count toward the instance's
/// consecutive-error threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorKind {
    /// The probe failed to identify a supported container
    InvalidFormat,
    /// The decoder could not produce sample-rate/channel information
    CannotFindInfo,
    /// The decoder returned an unrecoverable status
    DecoderError,
}

/// A read error recorded on a running task
#[derive(Debug, Clone)]
pub struct ReadError {
    /// What went wrong
    pub kind: ReadErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl ReadError {
    /// Create a new read error record
    #[must_use]
    pub fn new(kind: ReadErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ReadErrorKind::InvalidFormat => write!(f, "invalid format: {}", self.message),
            ReadErrorKind::CannotFindInfo => write!(f, "cannot find info: {}", self.message),
            ReadErrorKind::DecoderError => write!(f, "decoder error: {}", self.message),
        }
    }
}

/// Errors that can occur during stream operations
#[derive(Debug, Error)]
pub enum StreamError {
    // ===== Transport Errors =====
    /// HTTP transfer failed: network failure, non-2xx status, timeout or
    /// low-speed abort
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure
        message: String,
    },

    /// The HTTP driver rejected or lost the transfer
    #[error("http driver error: {message}")]
    HttpDriver {
        /// Description of the failure
        message: String,
    },

    // ===== Pipeline Errors =====
    /// Format probe failed to identify a supported container
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the failure
        message: String,
    },

    /// Decoder could not report sample rate / channel info
    #[error("cannot find stream info: {message}")]
    CannotFindInfo {
        /// Description of the failure
        message: String,
    },

    /// Decoder returned an unrecoverable status
    #[error("decoder error: {message}")]
    Decoder {
        /// Description of the failure
        message: String,
    },

    /// Opus encoder returned an error
    #[error("encoder error: {message}")]
    Encoder {
        /// Description of the failure
        message: String,
    },

    /// Sample rate conversion failed
    #[error("resampler error: {message}")]
    Resampler {
        /// Description of the failure
        message: String,
    },

    // ===== RTP Errors =====
    /// RTP frame push failed
    #[error("send error: {message}")]
    Send {
        /// Description of the failure
        message: String,
    },

    /// RTP session could not be created
    #[error("rtp session error: {message}")]
    RtpSession {
        /// Description of the failure
        message: String,
    },

    // ===== Control Plane Errors =====
    /// Lookup by stream id failed
    #[error("stream not found: {stream_id}")]
    NotFound {
        /// The missing stream id
        stream_id: String,
    },

    /// Operation rejected without side effects: duplicate task names,
    /// dangling order references, unknown task names
    #[error("rejected: {message}")]
    Rejected {
        /// Why the operation was rejected
        message: String,
    },

    // ===== Process Errors =====
    /// Configuration could not be loaded
    #[error("config error: {message}")]
    Config {
        /// Description of the failure
        message: String,
    },

    /// Network or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// Whether this error counts toward the instance's consecutive
    /// cycle-error threshold.
    #[must_use]
    pub fn is_cycle_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::InvalidFormat { .. }
                | Self::CannotFindInfo { .. }
                | Self::Decoder { .. }
        )
    }
}

/// Result type alias for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;
