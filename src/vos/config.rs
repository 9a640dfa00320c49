//! Voice Bridge Configuration
//!
//! Codec, cadence and session policy for the outbound audio path.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{VosError, TELEPHONY_FRAME_SAMPLES, TELEPHONY_SAMPLE_RATE};

/// Telephony codec carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TelephonyCodec {
    /// G.711 A-law (EU standard) - Payload type 8
    #[default]
    Pcma,
    /// G.711 μ-law (US standard) - Payload type 0
    Pcmu,
}

impl TelephonyCodec {
    /// RTP payload type number
    pub fn payload_type(&self) -> u8 {
        match self {
            TelephonyCodec::Pcmu => 0,
            TelephonyCodec::Pcma => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TelephonyCodec::Pcmu => "PCMU",
            TelephonyCodec::Pcma => "PCMA",
        }
    }
}

impl std::fmt::Display for TelephonyCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Sample rate of the linear PCM used by the speech engine.
///
/// Samples are 16-bit signed little-endian, mono.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WidebandRate {
    #[default]
    Hz16000,
    Hz24000,
}

impl WidebandRate {
    pub fn hz(&self) -> u32 {
        match self {
            WidebandRate::Hz16000 => 16000,
            WidebandRate::Hz24000 => 24000,
        }
    }

    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            16000 => Some(WidebandRate::Hz16000),
            24000 => Some(WidebandRate::Hz24000),
            _ => None,
        }
    }

    /// Integer ratio to the 8kHz telephony rate
    pub fn factor(&self) -> usize {
        (self.hz() / TELEPHONY_SAMPLE_RATE) as usize
    }

    /// Samples in one 20ms frame
    pub fn frame_samples(&self) -> usize {
        TELEPHONY_FRAME_SAMPLES * self.factor()
    }

    /// Bytes in one 20ms frame (2 bytes per sample)
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * 2
    }
}

/// What `create_session` does when the call id is already active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail with `SessionExists`, leaving the existing session untouched
    #[default]
    Reject,
    /// Close the existing session and install the new one
    Replace,
}

/// Voice bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VosConfig {
    /// Codec of outbound telephony frames
    pub codec: TelephonyCodec,

    /// Rate of the speech engine's linear PCM
    pub wideband_rate: WidebandRate,

    /// Frame cadence in milliseconds
    pub frame_interval_ms: u64,

    /// Lateness above which a frame is reported as drifting
    pub drift_tolerance_ms: u64,

    /// Upper bound for a single datagram write
    pub send_timeout_ms: u64,

    /// Duplicate call id handling
    pub duplicate_policy: DuplicatePolicy,

    /// Prefix each frame with a 12-byte RTP header
    pub rtp_framing: bool,

    /// Local address sessions bind their sockets to
    pub bind_addr: String,

    /// Capacity of the dialer event channel
    pub event_buffer: usize,
}

impl Default for VosConfig {
    fn default() -> Self {
        Self {
            codec: TelephonyCodec::Pcma,
            wideband_rate: WidebandRate::Hz16000,
            frame_interval_ms: 20,
            drift_tolerance_ms: 50,
            send_timeout_ms: 100,
            duplicate_policy: DuplicatePolicy::Reject,
            rtp_framing: false,
            bind_addr: "0.0.0.0".to_string(),
            event_buffer: 100,
        }
    }
}

impl VosConfig {
    /// Create config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let codec = match std::env::var("VOS_CODEC")
            .unwrap_or_default()
            .to_uppercase()
            .as_str()
        {
            "PCMU" | "ULAW" => TelephonyCodec::Pcmu,
            _ => TelephonyCodec::Pcma,
        };

        let wideband_rate = std::env::var("VOS_WIDEBAND_RATE")
            .ok()
            .and_then(|r| r.parse().ok())
            .and_then(WidebandRate::from_hz)
            .unwrap_or(defaults.wideband_rate);

        let duplicate_policy = match std::env::var("VOS_DUPLICATE_POLICY")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "replace" => DuplicatePolicy::Replace,
            _ => DuplicatePolicy::Reject,
        };

        let rtp_framing = matches!(
            std::env::var("VOS_RTP_FRAMING")
                .unwrap_or_default()
                .to_lowercase()
                .as_str(),
            "1" | "true" | "yes"
        );

        Self {
            codec,
            wideband_rate,
            frame_interval_ms: env_parse("VOS_FRAME_INTERVAL_MS").unwrap_or(defaults.frame_interval_ms),
            drift_tolerance_ms: env_parse("VOS_DRIFT_TOLERANCE_MS").unwrap_or(defaults.drift_tolerance_ms),
            send_timeout_ms: env_parse("VOS_SEND_TIMEOUT_MS").unwrap_or(defaults.send_timeout_ms),
            duplicate_policy,
            rtp_framing,
            bind_addr: std::env::var("VOS_BIND_ADDR").unwrap_or(defaults.bind_addr),
            event_buffer: env_parse("VOS_EVENT_BUFFER").unwrap_or(defaults.event_buffer),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), VosError> {
        if self.frame_interval_ms == 0 {
            return Err(VosError::Config("frame interval must be greater than 0".to_string()));
        }
        if self.send_timeout_ms == 0 {
            return Err(VosError::Config("send timeout must be greater than 0".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(VosError::Config("event buffer must be greater than 0".to_string()));
        }
        if self.bind_addr.parse::<std::net::IpAddr>().is_err() {
            return Err(VosError::Config(format!("invalid bind address: {}", self.bind_addr)));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn drift_tolerance(&self) -> Duration {
        Duration::from_millis(self.drift_tolerance_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wideband_frame_sizes() {
        assert_eq!(WidebandRate::Hz16000.frame_samples(), 320);
        assert_eq!(WidebandRate::Hz16000.frame_bytes(), 640);
        assert_eq!(WidebandRate::Hz24000.frame_samples(), 480);
        assert_eq!(WidebandRate::Hz24000.frame_bytes(), 960);
    }

    #[test]
    fn test_wideband_from_hz() {
        assert_eq!(WidebandRate::from_hz(24000), Some(WidebandRate::Hz24000));
        assert_eq!(WidebandRate::from_hz(44100), None);
    }

    #[test]
    fn test_codec_payload_types() {
        assert_eq!(TelephonyCodec::Pcma.payload_type(), 8);
        assert_eq!(TelephonyCodec::Pcmu.payload_type(), 0);
        assert_eq!(TelephonyCodec::Pcma.to_string(), "PCMA");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = VosConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_interval(), Duration::from_millis(20));
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = VosConfig::default();
        config.frame_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = VosConfig::default();
        config.bind_addr = "not-an-ip".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_policy_serde() {
        let json = serde_json::to_string(&DuplicatePolicy::Replace).unwrap();
        assert_eq!(json, "\"replace\"");
    }
}
