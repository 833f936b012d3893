//! Value types for audio/VAD configuration, server capabilities, and the
//! negotiated configuration produced by the [`negotiator`](crate::negotiator).

use serde::{Deserialize, Serialize};

/// Supported PCM sample rates (spec.md §3 `AudioConfig`).
pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [8000, 16000, 24000, 48000];

/// Supported PCM encodings.
pub const SUPPORTED_ENCODINGS: [&str; 3] = ["pcm_s16le", "mulaw", "alaw"];

/// Supported frame durations, in milliseconds.
pub const SUPPORTED_FRAME_DURATIONS_MS: [u32; 3] = [10, 20, 30];

/// Audio encoding carried in a session's negotiated [`AudioConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    PcmS16le,
    Mulaw,
    Alaw,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::PcmS16le => "pcm_s16le",
            Encoding::Mulaw => "mulaw",
            Encoding::Alaw => "alaw",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pcm_s16le" => Some(Encoding::PcmS16le),
            "mulaw" => Some(Encoding::Mulaw),
            "alaw" => Some(Encoding::Alaw),
            _ => None,
        }
    }
}

/// Audio parameters negotiated once per session and immutable thereafter
/// (spec.md §3 `AudioConfig`). `channels` is always 1 (mono); it is not
/// user-configurable, matching the spec's fixed invariant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub encoding: Encoding,
    pub channels: u8,
    pub frame_duration_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            encoding: Encoding::PcmS16le,
            channels: 1,
            frame_duration_ms: 20,
        }
    }
}

impl AudioConfig {
    /// Number of PCM bytes a single frame of this config carries, per
    /// spec.md §3 `AudioFrame` ("frame_duration_ms × sample_rate × 2 bytes").
    /// This is always derived from the negotiated config, never from a
    /// process-wide constant (spec.md §9).
    pub fn frame_byte_len(&self) -> usize {
        (self.frame_duration_ms as usize * self.sample_rate as usize * 2) / 1000
    }
}

/// A single clamped-into-range VAD field, recorded whenever the negotiator
/// snaps a request to its nearest bound (spec.md §3 `NegotiatedConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjustment {
    pub field: String,
    pub requested: f64,
    pub applied: f64,
    pub reason: String,
}

/// Voice-activity-detection tuning, independently configurable per session
/// and mutable post-accept via `session.update` (spec.md §3 `VADConfig`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VadConfig {
    pub enabled: bool,
    pub silence_threshold_ms: u32,
    pub min_speech_ms: u32,
    pub threshold: f32,
    pub ring_buffer_frames: u32,
    pub speech_ratio: f32,
    pub prefix_padding_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            silence_threshold_ms: 500,
            min_speech_ms: 250,
            threshold: 0.5,
            ring_buffer_frames: 5,
            speech_ratio: 0.4,
            prefix_padding_ms: 300,
        }
    }
}

/// A closed numeric range used to validate and clamp a single VAD field.
#[derive(Debug, Clone, Copy)]
pub struct VadFieldRange {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
}

/// The seven tunable VAD fields and their closed ranges, in the order
/// spec.md §3 lists them. Order does not affect the result: each field is
/// clamped against its own range independently (spec.md §4.1 negotiator
/// note, property P1/P2).
pub const VAD_FIELD_RANGES: [VadFieldRange; 6] = [
    VadFieldRange { name: "vad.silence_threshold_ms", min: 100.0, max: 2000.0 },
    VadFieldRange { name: "vad.min_speech_ms", min: 100.0, max: 1000.0 },
    VadFieldRange { name: "vad.threshold", min: 0.0, max: 1.0 },
    VadFieldRange { name: "vad.ring_buffer_frames", min: 3.0, max: 10.0 },
    VadFieldRange { name: "vad.speech_ratio", min: 0.2, max: 0.8 },
    VadFieldRange { name: "vad.prefix_padding_ms", min: 0.0, max: 500.0 },
];

/// Server-declared, connection-wide protocol capabilities, sent once as
/// `protocol.capabilities` immediately after transport accept
/// (spec.md §3 `ProtocolCapabilities`, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolCapabilities {
    pub version: String,
    pub supported_sample_rates: Vec<u32>,
    pub supported_encodings: Vec<String>,
    pub supported_frame_durations_ms: Vec<u32>,
    pub vad_configurable: bool,
    pub tunable_vad_fields: Vec<String>,
    pub features: Vec<String>,
}

impl Default for ProtocolCapabilities {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            supported_sample_rates: SUPPORTED_SAMPLE_RATES.to_vec(),
            supported_encodings: SUPPORTED_ENCODINGS.iter().map(|s| s.to_string()).collect(),
            supported_frame_durations_ms: SUPPORTED_FRAME_DURATIONS_MS.to_vec(),
            vad_configurable: true,
            tunable_vad_fields: VAD_FIELD_RANGES.iter().map(|r| r.name.to_string()).collect(),
            features: vec!["barge_in".to_string(), "streaming_tts".to_string()],
        }
    }
}

/// Outcome of negotiation, returned to the client in `session.started` and
/// held read-only by C4 for the life of the session. The `vad` portion may
/// be replaced in place by a later successful `session.update`; `audio` is
/// immutable once accepted (spec.md §3 `NegotiatedConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiatedConfig {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub adjustments: Vec<Adjustment>,
}
