//! # omnicast
//!
//! A multi-tenant, per-destination audio streaming engine.
//!
//! Each active stream consumes an ordered play list of remote audio URLs,
//! fetches every item over HTTP, decodes it into 48 kHz PCM, encodes 40 ms
//! Opus frames, and transmits them as RTP with a bounded, paced cadence.
//! A control surface (request/response plus server-pushed events) starts and
//! stops streams, mutates the play list, skips, seeks, changes play mode and
//! volume while playback is live.
//!
//! ## Architecture
//!
//! Data flows one way per stream:
//!
//! ```text
//! Fetcher -> ByteSource -> Decoder -> Consumer -> Ring -> Sender -> RTP
//! ```
//!
//! Control flow is event driven: the producer opens each task cycle, the
//! fetcher fills bytes asynchronously, the consumer pulls until the source
//! signals end of data, and the sender drains the ring on a wall-clock
//! schedule.
//!
//! ## Example
//!
//! ```rust,no_run
//! use omnicast::config::Config;
//! use omnicast::runtime::Runtime;
//!
//! # async fn example() -> Result<(), omnicast::StreamError> {
//! let config = Config::default();
//! let runtime = Runtime::new(config)?;
//! runtime.serve().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Configuration loading
pub mod config;
/// Core types
pub mod types;
/// Process runtime
pub mod runtime;
/// Control plane
pub mod control;
/// Process-wide HTTP driver
pub mod http;

// Internal modules
mod audio;
mod buffer;
mod decode;
mod fetch;
mod pipeline;
mod playlist;
mod rtp;
mod sync;

// Re-exports
pub use error::{ReadErrorKind, StreamError};
pub use pipeline::StreamInstance;
pub use playlist::Playlist;
pub use types::{PlayMode, PlayState, StreamDestination, TaskItem, TaskKind};
