//! VOS voice bridge
//!
//! Carries audio between an AI speech engine (wideband 16-bit PCM) and a
//! telephony endpoint (G.711 at 8kHz), pacing outbound frames every 20ms.

pub mod vos;

pub use vos::{
    DialerEvent, DialerService, DuplicatePolicy, SendComplete, SendHandle, Session, SessionStats,
    TelephonyCodec, VosConfig, VosError, WidebandRate,
};
