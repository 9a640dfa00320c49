//! VOS Voice Bridge
//!
//! Streams outbound call audio to a telephony endpoint.
//! Features:
//! - G.711 (PCMA/PCMU) <-> wideband PCM conversion for the AI speech engine
//! - 20ms packet pacing on absolute deadlines
//! - Per-call UDP sessions with cancellation on close
//! - Optional RTP framing of outbound frames

mod config;
mod codec;
mod resampler;
mod audio_converter;
mod rtp;
mod pacer;
mod session;
mod dialer;


pub use config::{DuplicatePolicy, TelephonyCodec, VosConfig, WidebandRate};
pub use codec::G711Codec;
pub use resampler::Resampler;
pub use audio_converter::{pcm24k_to_pcma, pcma_to_pcm16k, AudioConverter, CodecConverter};
pub use rtp::{RtpHeader, RtpPacket};
pub use pacer::{FrameSink, PacingJob, PacingReport, PacketPacer};
pub use session::{Session, SessionRegistry, SessionStats, UdpTransport};
pub use dialer::{DialerEvent, DialerService, SendComplete, SendHandle};

use std::time::Duration;
use thiserror::Error;

/// Samples in one 20ms telephony frame (8kHz)
pub const TELEPHONY_FRAME_SAMPLES: usize = 160;

/// Bytes in one 20ms telephony frame (1 byte per sample)
pub const TELEPHONY_FRAME_BYTES: usize = TELEPHONY_FRAME_SAMPLES;

/// Telephony sample rate in Hz
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Nominal frame duration
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Voice bridge errors
#[derive(Error, Debug)]
pub enum VosError {
    #[error("Invalid frame size: expected {expected} bytes, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },

    #[error("Invalid buffer length: {actual} bytes is not a multiple of the {frame} byte frame")]
    InvalidBufferLength { frame: usize, actual: usize },

    #[error("Audio buffer is empty")]
    EmptyAudio,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already active: {0}")]
    SessionExists(String),

    #[error("Could not resolve {host}:{port}: {reason}")]
    Resolve {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Send timed out after {0:?}")]
    SendTimeout(Duration),

    #[error("Send cancelled after {packets_sent} packets")]
    Cancelled { packets_sent: usize },

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Split a buffer into fixed-size frames, rejecting partial trailing frames.
pub(crate) fn split_frames(data: &[u8], frame_len: usize) -> Result<std::slice::ChunksExact<'_, u8>, VosError> {
    if data.is_empty() {
        return Err(VosError::EmptyAudio);
    }
    if data.len() % frame_len != 0 {
        return Err(VosError::InvalidBufferLength {
            frame: frame_len,
            actual: data.len(),
        });
    }
    Ok(data.chunks_exact(frame_len))
}
