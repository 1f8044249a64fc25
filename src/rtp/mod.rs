//! RTP transport binding
//!
//! The pipeline depends only on the [`MediaStream`] contract; the concrete
//! [`RtpSession`] binds it to a connected UDP socket. One session serves one
//! stream instance and is only driven from the sender task, so sequence and
//! marker state need no synchronisation.

mod packet;

use async_trait::async_trait;
use bytes::BytesMut;
use rand::Rng;
use tokio::net::UdpSocket;
use tracing::info;

use crate::error::StreamError;
use crate::types::StreamDestination;

pub use packet::RtpPacket;

/// RTP clock rate for Opus
pub const CLOCK_RATE: u32 = 48_000;

/// Maximum transmission unit honored by the receiver; frames that would
/// exceed it are rejected (no generic fragmentation).
pub const MTU: usize = 1408;

/// Wire transport contract the sender drives
#[async_trait]
pub trait MediaStream: Send {
    /// Transmit one encoded frame at the given RTP timestamp
    async fn push_frame(&mut self, payload: &[u8], timestamp: u32) -> Result<(), StreamError>;
}

/// UDP-backed RTP session for one stream
pub struct RtpSession {
    socket: UdpSocket,
    ssrc: u32,
    payload_type: u8,
    sequence: u16,
    first_packet: bool,
    scratch: BytesMut,
}

impl RtpSession {
    /// Create a session bound to the destination in the channel description.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket cannot be bound or connected.
    pub async fn connect(destination: &StreamDestination) -> Result<Self, StreamError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect((destination.ip.as_str(), destination.port))
            .await
            .map_err(|e| StreamError::RtpSession {
                message: format!(
                    "connect {}:{} failed: {e}",
                    destination.ip, destination.port
                ),
            })?;
        info!(
            ip = %destination.ip,
            port = destination.port,
            ssrc = destination.audio_ssrc,
            payload_type = destination.audio_pt,
            rtcp_mux = destination.rtcp_mux,
            "rtp session up"
        );
        Ok(Self {
            socket,
            ssrc: destination.audio_ssrc,
            payload_type: destination.audio_pt,
            sequence: rand::thread_rng().gen(),
            first_packet: true,
            scratch: BytesMut::with_capacity(MTU),
        })
    }

    /// Random initial timestamp for a fresh session
    #[must_use]
    pub fn initial_timestamp() -> u32 {
        rand::thread_rng().gen()
    }
}

#[async_trait]
impl MediaStream for RtpSession {
    async fn push_frame(&mut self, payload: &[u8], timestamp: u32) -> Result<(), StreamError> {
        if payload.len() + packet::HEADER_SIZE > MTU {
            return Err(StreamError::Send {
                message: format!(
                    "frame of {} bytes exceeds the {MTU} byte MTU",
                    payload.len()
                ),
            });
        }
        let packet = RtpPacket {
            marker: self.first_packet,
            payload_type: self.payload_type,
            sequence: self.sequence,
            timestamp,
            ssrc: self.ssrc,
            payload,
        };
        packet.encode_into(&mut self.scratch);
        self.socket
            .send(&self.scratch)
            .await
            .map_err(|e| StreamError::Send {
                message: e.to_string(),
            })?;
        self.sequence = self.sequence.wrapping_add(1);
        self.first_packet = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamDestination;

    fn destination(port: u16) -> StreamDestination {
        StreamDestination {
            ip: "127.0.0.1".to_string(),
            port,
            rtcp_port: 0,
            audio_ssrc: 0x1234,
            audio_pt: 111,
            bitrate: 96_000,
            rtcp_mux: true,
        }
    }

    #[tokio::test]
    async fn test_push_frame_wire_format() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut session = RtpSession::connect(&destination(port)).await.unwrap();
        session.push_frame(&[1, 2, 3], 1000).await.unwrap();
        session.push_frame(&[4, 5], 2920).await.unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(n, packet::HEADER_SIZE + 3);
        assert_eq!(buf[0], 0x80);
        // First packet carries the marker.
        assert_eq!(buf[1], 0x80 | 111);
        let first_seq = u16::from_be_bytes([buf[2], buf[3]]);

        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(n, packet::HEADER_SIZE + 2);
        assert_eq!(buf[1], 111);
        let second_seq = u16::from_be_bytes([buf[2], buf[3]]);
        assert_eq!(second_seq, first_seq.wrapping_add(1));
        assert_eq!(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]), 2920);
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();
        let mut session = RtpSession::connect(&destination(port)).await.unwrap();

        let oversize = vec![0u8; MTU];
        let err = session.push_frame(&oversize, 0).await.unwrap_err();
        assert!(matches!(err, StreamError::Send { .. }));
    }
}
