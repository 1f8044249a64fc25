//! Per-stream destination and playback state

use serde::{Deserialize, Serialize};

/// Playback state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayState {
    /// Frames flow at cadence
    #[default]
    Playing,
    /// The sender is parked; no frames flow
    Paused,
}

/// RTP destination description for one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDestination {
    /// Remote address
    pub ip: String,
    /// Remote RTP port
    pub port: u16,
    /// Remote RTCP port (informational; only honored with `rtcp_mux`)
    #[serde(default)]
    pub rtcp_port: u16,
    /// Synchronization source identifier
    pub audio_ssrc: u32,
    /// Dynamic payload type
    pub audio_pt: u8,
    /// Target bitrate in bits per second; also the Opus encoder bitrate and
    /// the stream-mode receive cap
    pub bitrate: u32,
    /// Multiplex RTCP on the RTP port
    #[serde(default)]
    pub rtcp_mux: bool,
}
