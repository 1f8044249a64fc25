//! RTP packet serialization (RFC 3550 fixed header)

use bytes::{BufMut, BytesMut};

/// RTP protocol version
const RTP_VERSION: u8 = 2;

/// Fixed header length in bytes
pub const HEADER_SIZE: usize = 12;

/// One outgoing RTP packet
#[derive(Debug, Clone)]
pub struct RtpPacket<'a> {
    /// Marker bit (set on the first packet of a talkspurt)
    pub marker: bool,
    /// Dynamic payload type
    pub payload_type: u8,
    /// Sequence number (wraps at 65535)
    pub sequence: u16,
    /// Timestamp in clock-rate ticks
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
    /// Encoded payload
    pub payload: &'a [u8],
}

impl RtpPacket<'_> {
    /// Serialize into `out`, which is cleared first
    pub fn encode_into(&self, out: &mut BytesMut) {
        out.clear();
        out.reserve(HEADER_SIZE + self.payload.len());
        out.put_u8(RTP_VERSION << 6);
        let marker_bit = u8::from(self.marker) << 7;
        out.put_u8(marker_bit | (self.payload_type & 0x7F));
        out.put_u16(self.sequence);
        out.put_u32(self.timestamp);
        out.put_u32(self.ssrc);
        out.put_slice(self.payload);
    }
}
