//! Audio Format Conversion
//!
//! `CodecConverter` moves single 20ms frames between the telephony codec
//! (8kHz G.711) and the speech engine's wideband linear PCM
//! (16-bit little-endian at 16kHz or 24kHz). Companding and resampling are
//! separate steps so each can be checked on its own.
//!
//! `AudioConverter` handles WAV prompt files.

use std::io::Cursor;
use std::sync::OnceLock;

use super::codec::G711Codec;
use super::config::{TelephonyCodec, VosConfig, WidebandRate};
use super::resampler::Resampler;
use super::{split_frames, VosError, TELEPHONY_FRAME_BYTES, TELEPHONY_FRAME_SAMPLES, TELEPHONY_SAMPLE_RATE};

/// Frame converter between telephony and wideband audio.
///
/// Holds only immutable filter taps, so one instance can be shared by every session.
#[derive(Debug, Clone)]
pub struct CodecConverter {
    codec: G711Codec,
    rate: WidebandRate,
    upsampler: Resampler,
    downsampler: Resampler,
}

impl CodecConverter {
    pub fn new(codec: TelephonyCodec, rate: WidebandRate) -> Self {
        Self {
            codec: G711Codec::new(codec),
            rate,
            upsampler: Resampler::upsampler(TELEPHONY_SAMPLE_RATE, rate.factor()),
            downsampler: Resampler::downsampler(TELEPHONY_SAMPLE_RATE, rate.factor()),
        }
    }

    pub fn from_config(config: &VosConfig) -> Self {
        Self::new(config.codec, config.wideband_rate)
    }

    pub fn codec(&self) -> G711Codec {
        self.codec
    }

    pub fn wideband_rate(&self) -> WidebandRate {
        self.rate
    }

    /// Byte length of one wideband frame
    pub fn wideband_frame_bytes(&self) -> usize {
        self.rate.frame_bytes()
    }

    /// Expand one 160-byte telephony frame to wideband PCM
    pub fn telephony_to_wideband(&self, frame: &[u8]) -> Result<Vec<u8>, VosError> {
        if frame.len() != TELEPHONY_FRAME_BYTES {
            return Err(VosError::InvalidFrameSize {
                expected: TELEPHONY_FRAME_BYTES,
                actual: frame.len(),
            });
        }

        let narrow = self.codec.decode(frame);
        let wide = self.upsampler.process(&narrow);
        Ok(pcm16_to_le_bytes(&wide))
    }

    /// Reduce one wideband PCM frame to a 160-byte telephony frame
    pub fn wideband_to_telephony(&self, frame: &[u8]) -> Result<Vec<u8>, VosError> {
        let expected = self.wideband_frame_bytes();
        if frame.len() != expected {
            return Err(VosError::InvalidFrameSize {
                expected,
                actual: frame.len(),
            });
        }

        let wide = pcm16_from_le_bytes(frame);
        let narrow = self.downsampler.process(&wide);
        Ok(self.codec.encode(&narrow))
    }

    /// Convert a buffer of whole telephony frames.
    ///
    /// The buffer is resampled as one continuous signal, so frame boundaries
    /// inside it carry no edge effects.
    pub fn telephony_to_wideband_stream(&self, audio: &[u8]) -> Result<Vec<u8>, VosError> {
        let narrow: Vec<i16> = split_frames(audio, TELEPHONY_FRAME_BYTES)?
            .flat_map(|frame| self.codec.decode(frame))
            .collect();
        Ok(pcm16_to_le_bytes(&self.upsampler.process(&narrow)))
    }

    /// Convert a buffer of whole wideband frames as one continuous signal
    pub fn wideband_to_telephony_stream(&self, audio: &[u8]) -> Result<Vec<u8>, VosError> {
        let wide: Vec<i16> = split_frames(audio, self.wideband_frame_bytes())?
            .flat_map(pcm16_from_le_bytes)
            .collect();
        Ok(self.codec.encode(&self.downsampler.process(&wide)))
    }

    /// Encode arbitrary-length linear PCM (e.g. a prompt file) to telephony frames.
    ///
    /// Any integer-ratio rate is accepted. The tail is padded with encoded
    /// silence up to a whole frame.
    pub fn pcm_to_telephony(&self, samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, VosError> {
        if samples.is_empty() {
            return Err(VosError::EmptyAudio);
        }

        let narrow = if sample_rate == TELEPHONY_SAMPLE_RATE {
            samples.to_vec()
        } else if sample_rate == self.rate.hz() {
            self.downsampler.process(samples)
        } else {
            Resampler::new(sample_rate, TELEPHONY_SAMPLE_RATE)?.process(samples)
        };

        let mut encoded = self.codec.encode(&narrow);
        let remainder = encoded.len() % TELEPHONY_FRAME_SAMPLES;
        if remainder != 0 {
            let pad = TELEPHONY_FRAME_SAMPLES - remainder;
            encoded.extend(std::iter::repeat(self.codec.silence_byte()).take(pad));
        }
        Ok(encoded)
    }
}

static PCMA_16K: OnceLock<CodecConverter> = OnceLock::new();
static PCMA_24K: OnceLock<CodecConverter> = OnceLock::new();

/// A-law telephony frame to 16kHz PCM16LE
pub fn pcma_to_pcm16k(frame: &[u8]) -> Result<Vec<u8>, VosError> {
    PCMA_16K
        .get_or_init(|| CodecConverter::new(TelephonyCodec::Pcma, WidebandRate::Hz16000))
        .telephony_to_wideband(frame)
}

/// 24kHz PCM16LE frame to A-law telephony
pub fn pcm24k_to_pcma(frame: &[u8]) -> Result<Vec<u8>, VosError> {
    PCMA_24K
        .get_or_init(|| CodecConverter::new(TelephonyCodec::Pcma, WidebandRate::Hz24000))
        .wideband_to_telephony(frame)
}

pub(crate) fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub(crate) fn pcm16_from_le_bytes(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// WAV helpers for prompt audio
pub struct AudioConverter;

impl AudioConverter {
    /// Encode mono 16-bit PCM samples as a WAV file
    pub fn pcm_to_wav(pcm_samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, VosError> {
        if sample_rate == 0 {
            return Err(VosError::UnsupportedFormat(
                "Invalid sample rate: must be greater than 0".to_string(),
            ));
        }

        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VosError::UnsupportedFormat(format!("Failed to create WAV writer: {}", e)))?;
        for &sample in pcm_samples {
            writer
                .write_sample(sample)
                .map_err(|e| VosError::UnsupportedFormat(format!("Failed to write sample: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| VosError::UnsupportedFormat(format!("Failed to finalize WAV: {}", e)))?;

        Ok(cursor.into_inner())
    }

    /// Read mono 16-bit PCM samples and the sample rate from WAV data
    pub fn wav_to_pcm(wav_data: &[u8]) -> Result<(Vec<i16>, u32), VosError> {
        let mut reader = hound::WavReader::new(Cursor::new(wav_data))
            .map_err(|e| VosError::UnsupportedFormat(format!("Failed to read WAV file: {}", e)))?;

        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(VosError::UnsupportedFormat(format!(
                "Only 16-bit PCM is supported, got {} bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }
        if spec.channels != 1 {
            return Err(VosError::UnsupportedFormat(format!(
                "Only mono audio is supported, got {} channels",
                spec.channels
            )));
        }

        let samples = reader
            .samples::<i16>()
            .collect::<Result<Vec<i16>, _>>()
            .map_err(|e| VosError::UnsupportedFormat(format!("Failed to read WAV samples: {}", e)))?;

        Ok((samples, spec.sample_rate))
    }

    /// Load a WAV file from disk
    pub async fn load_wav_file(file_path: &str) -> Result<(Vec<i16>, u32), VosError> {
        let wav_data = tokio::fs::read(file_path).await?;
        Self::wav_to_pcm(&wav_data)
    }
}
