//! RTP (Real-time Transport Protocol) framing
//!
//! Optional RFC 3550 header for outbound telephony frames.
//! One packetizer per session keeps sequence/timestamp continuity across sends.

use bytes::{BufMut, Bytes, BytesMut};

use super::VosError;

pub const RTP_HEADER_LEN: usize = 12;

/// RTP packet header (fixed 12 bytes, no CSRC list)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Marker bit (set on the first packet of a talkspurt)
    pub marker: bool,
    /// Payload type (0 = PCMU, 8 = PCMA)
    pub payload_type: u8,
    pub sequence: u16,
    /// Timestamp in samples
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Serialize header into `buf`
    pub fn write_to(&self, buf: &mut BytesMut) {
        // V=2, P=0, X=0, CC=0
        buf.put_u8(2 << 6);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    /// Parse header, returning it and the offset of the payload
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), VosError> {
        if data.len() < RTP_HEADER_LEN {
            return Err(VosError::Transport("RTP packet too short".to_string()));
        }

        let version = data[0] >> 6;
        if version != 2 {
            return Err(VosError::Transport(format!("Invalid RTP version: {}", version)));
        }
        let csrc_count = (data[0] & 0x0F) as usize;
        let header_len = RTP_HEADER_LEN + csrc_count * 4;
        if data.len() < header_len {
            return Err(VosError::Transport("RTP CSRC list truncated".to_string()));
        }

        Ok((
            Self {
                marker: data[1] & 0x80 != 0,
                payload_type: data[1] & 0x7F,
                sequence: u16::from_be_bytes([data[2], data[3]]),
                timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
                ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            },
            header_len,
        ))
    }
}

/// RTP packet with header and payload
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_LEN + self.payload.len());
        self.header.write_to(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, VosError> {
        let (header, header_len) = RtpHeader::from_bytes(data)?;
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&data[header_len..]),
        })
    }
}

/// Stamps outgoing frames with consecutive sequence numbers and timestamps
#[derive(Debug)]
pub(crate) struct RtpPacketizer {
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    first: bool,
}

impl RtpPacketizer {
    /// Random SSRC and initial sequence/timestamp, per RFC 3550
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            ssrc: rand::random::<u32>(),
            sequence: rand::random::<u16>(),
            timestamp: rand::random::<u32>(),
            first: true,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Wrap one frame; the timestamp advances by its sample count (1 byte per sample)
    pub fn packetize(&mut self, frame: &[u8]) -> Bytes {
        let mut header = RtpHeader::new(self.payload_type, self.sequence, self.timestamp, self.ssrc);
        header.marker = self.first;
        self.first = false;

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(frame.len() as u32);

        RtpPacket::new(header, Bytes::copy_from_slice(frame)).to_bytes()
    }
}
