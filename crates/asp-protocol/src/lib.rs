//! Audio Session Protocol (ASP) — a versioned WebSocket protocol that
//! negotiates audio/VAD configuration per session and multiplexes JSON
//! control frames with binary audio frames (spec.md §4.1, component C1).
//!
//! This crate has no dependency on the other broker components: it is pure
//! codec, negotiation, and state-machine logic, consumed by both
//! `voice-call-orchestrator` (as a client of C4) and
//! `voice-ai-session-server` (as the server accepting ASP connections).

pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod negotiator;

/// Convenience re-exports for downstream crates.
pub mod prelude {
    pub use crate::config::{
        Adjustment, AudioConfig, Encoding, NegotiatedConfig, ProtocolCapabilities, VadConfig,
        SUPPORTED_ENCODINGS, SUPPORTED_FRAME_DURATIONS_MS, SUPPORTED_SAMPLE_RATES,
    };
    pub use crate::error::{AspError, AspResult, ErrorCode};
    pub use crate::frame::{self, AudioFrame, Direction, FrameError};
    pub use crate::handshake::{HandshakeEvent, HandshakeState, InvalidTransition};
    pub use crate::message::{
        self, AspMessage, AudioConfigRequest, CallActionKind, SessionStatus, VadConfigRequest, WireError,
    };
    pub use crate::negotiator::{
        negotiate, renegotiate_vad, status_for, NegotiationOutcome, NegotiationStatus, RequestedAudio,
        RequestedVad,
    };
}
