//! G.711 Audio Codec
//!
//! μ-law (PCMU) and A-law (PCMA) companding between 16-bit linear PCM
//! and the 8-bit telephony encoding. Decoding goes through 256-entry
//! tables built at compile time.

use super::config::TelephonyCodec;

/// G.711 codec for encoding/decoding telephone audio
#[derive(Debug, Clone, Copy)]
pub struct G711Codec {
    codec_type: TelephonyCodec,
}

impl G711Codec {
    pub fn new(codec_type: TelephonyCodec) -> Self {
        Self { codec_type }
    }

    pub fn pcmu() -> Self {
        Self::new(TelephonyCodec::Pcmu)
    }

    pub fn pcma() -> Self {
        Self::new(TelephonyCodec::Pcma)
    }

    pub fn codec_type(&self) -> TelephonyCodec {
        self.codec_type
    }

    /// Encode 16-bit PCM samples to G.711
    pub fn encode(&self, pcm: &[i16]) -> Vec<u8> {
        match self.codec_type {
            TelephonyCodec::Pcmu => pcm.iter().map(|&s| linear_to_ulaw(s)).collect(),
            TelephonyCodec::Pcma => pcm.iter().map(|&s| linear_to_alaw(s)).collect(),
        }
    }

    /// Decode G.711 to 16-bit PCM samples
    pub fn decode(&self, encoded: &[u8]) -> Vec<i16> {
        let table = match self.codec_type {
            TelephonyCodec::Pcmu => &ULAW_DECODE,
            TelephonyCodec::Pcma => &ALAW_DECODE,
        };
        encoded.iter().map(|&b| table[b as usize]).collect()
    }

    /// Encoded byte for digital silence
    pub fn silence_byte(&self) -> u8 {
        match self.codec_type {
            TelephonyCodec::Pcmu => linear_to_ulaw(0),
            TelephonyCodec::Pcma => linear_to_alaw(0),
        }
    }

    pub fn payload_type(&self) -> u8 {
        self.codec_type.payload_type()
    }
}

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;
const ALAW_CLIP: i32 = 32767;

/// Segment number for a magnitude in [0x100, 0x7FFF]; 0 below 0x100
#[inline]
fn segment(magnitude: i32) -> u8 {
    if magnitude < 0x100 {
        return 0;
    }
    // Highest set bit: 8 -> segment 1 ... 14 -> segment 7
    let msb = 31 - (magnitude as u32).leading_zeros();
    (msb - 7).min(7) as u8
}

fn linear_to_ulaw(sample: i16) -> u8 {
    let sign = if sample < 0 { 0x80 } else { 0x00 };
    let magnitude = (sample as i32).abs().min(ULAW_CLIP) + ULAW_BIAS;

    let exponent = segment(magnitude);
    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

const fn ulaw_to_linear(ulaw: u8) -> i16 {
    let ulaw = !ulaw;
    let exponent = ((ulaw >> 4) & 0x07) as i32;
    let mantissa = (ulaw & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;

    if ulaw & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

fn linear_to_alaw(sample: i16) -> u8 {
    // A-law sets the sign bit for non-negative samples
    let sign = if sample < 0 { 0x00 } else { 0x80 };
    let magnitude = (sample as i32).abs().min(ALAW_CLIP);

    let exponent = segment(magnitude);
    let mantissa = if exponent == 0 {
        (magnitude >> 4) & 0x0F
    } else {
        (magnitude >> (exponent + 3)) & 0x0F
    } as u8;

    (sign | (exponent << 4) | mantissa) ^ 0x55
}

const fn alaw_to_linear(alaw: u8) -> i16 {
    let alaw = alaw ^ 0x55;
    let exponent = ((alaw >> 4) & 0x07) as i32;
    let mantissa = (alaw & 0x0F) as i32;

    let magnitude = if exponent > 0 {
        ((mantissa << 4) + 0x108) << (exponent - 1)
    } else {
        (mantissa << 4) + 0x08
    };

    if alaw & 0x80 == 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

const fn build_ulaw_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = ulaw_to_linear(i as u8);
        i += 1;
    }
    table
}

const fn build_alaw_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = alaw_to_linear(i as u8);
        i += 1;
    }
    table
}

static ULAW_DECODE: [i16; 256] = build_ulaw_table();
static ALAW_DECODE: [i16; 256] = build_alaw_table();
