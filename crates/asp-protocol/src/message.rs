//! The ASP message set: one Rust variant per wire `type` tag (spec.md §4.1,
//! §6.1). `ASPMessage` is the tagged-variant sum type the source-pattern
//! refactor in spec.md §9 calls for, replacing "dynamic typing of message
//! payloads" with a single parse function that returns either a typed
//! variant or a typed [`AspError`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{Adjustment, NegotiatedConfig};
use crate::error::{AspError, AspResult};

/// Wire-level requested audio block inside `session.start`. Every field is
/// optional; absent fields fall back to [`crate::config::AudioConfig::default`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioConfigRequest {
    pub sample_rate: Option<u32>,
    pub encoding: Option<String>,
    pub frame_duration_ms: Option<u32>,
}

/// Wire-level requested VAD block inside `session.start`/`session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VadConfigRequest {
    pub enabled: Option<bool>,
    pub silence_threshold_ms: Option<u32>,
    pub min_speech_ms: Option<u32>,
    pub threshold: Option<f32>,
    pub ring_buffer_frames: Option<u32>,
    pub speech_ratio: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
}

impl From<&AudioConfigRequest> for crate::negotiator::RequestedAudio {
    fn from(r: &AudioConfigRequest) -> Self {
        Self {
            sample_rate: r.sample_rate,
            encoding: r.encoding.clone(),
            frame_duration_ms: r.frame_duration_ms,
        }
    }
}

impl From<&VadConfigRequest> for crate::negotiator::RequestedVad {
    fn from(r: &VadConfigRequest) -> Self {
        Self {
            enabled: r.enabled,
            silence_threshold_ms: r.silence_threshold_ms,
            min_speech_ms: r.min_speech_ms,
            threshold: r.threshold,
            ring_buffer_frames: r.ring_buffer_frames,
            speech_ratio: r.speech_ratio,
            prefix_padding_ms: r.prefix_padding_ms,
        }
    }
}

/// `session.started`/`session.updated` status (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Accepted,
    AcceptedWithChanges,
    Rejected,
}

/// A single entry in `session.started.errors[]`/`session.updated.errors[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: u32,
    pub message: String,
    pub recoverable: bool,
}

impl From<&AspError> for WireError {
    fn from(e: &AspError) -> Self {
        Self { code: e.code().0, message: e.to_string(), recoverable: e.is_recoverable() }
    }
}

/// The action kind carried by `call.action` (spec.md §4.4 tools, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallActionKind {
    Transfer,
    Hangup,
}

/// One ASP control message. `#[serde(tag = "type")]` makes this an
/// internally-tagged sum type: `encode`/`parse` roundtrip through this enum
/// without any manual dispatch on the `type` string (property P3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AspMessage {
    #[serde(rename = "protocol.capabilities")]
    ProtocolCapabilities {
        timestamp: String,
        version: String,
        supported_sample_rates: Vec<u32>,
        supported_encodings: Vec<String>,
        supported_frame_durations_ms: Vec<u32>,
        vad_configurable: bool,
        tunable_vad_fields: Vec<String>,
        features: Vec<String>,
    },

    #[serde(rename = "session.start")]
    SessionStart {
        timestamp: String,
        session_id: Uuid,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        audio: Option<AudioConfigRequest>,
        #[serde(default)]
        vad: Option<VadConfigRequest>,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },

    #[serde(rename = "session.started")]
    SessionStarted {
        timestamp: String,
        session_id: Uuid,
        status: SessionStatus,
        #[serde(default)]
        negotiated: Option<NegotiatedConfig>,
        #[serde(default)]
        errors: Option<Vec<WireError>>,
    },

    #[serde(rename = "session.update")]
    SessionUpdate {
        timestamp: String,
        session_id: Uuid,
        vad: VadConfigRequest,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        timestamp: String,
        session_id: Uuid,
        status: SessionStatus,
        #[serde(default)]
        negotiated: Option<NegotiatedConfig>,
        #[serde(default)]
        errors: Option<Vec<WireError>>,
    },

    #[serde(rename = "session.end")]
    SessionEnd {
        timestamp: String,
        session_id: Uuid,
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "session.ended")]
    SessionEnded {
        timestamp: String,
        session_id: Uuid,
        reason: String,
    },

    #[serde(rename = "protocol.error")]
    ProtocolError {
        timestamp: String,
        #[serde(default)]
        session_id: Option<Uuid>,
        code: u32,
        message: String,
        recoverable: bool,
    },

    #[serde(rename = "audio.speech_start")]
    AudioSpeechStart { timestamp: String, session_id: Uuid },

    #[serde(rename = "audio.speech_end")]
    AudioSpeechEnd { timestamp: String, session_id: Uuid, duration_ms: u64 },

    #[serde(rename = "response.start")]
    ResponseStart { timestamp: String, session_id: Uuid },

    #[serde(rename = "response.end")]
    ResponseEnd { timestamp: String, session_id: Uuid },

    #[serde(rename = "call.action")]
    CallAction {
        timestamp: String,
        session_id: Uuid,
        action: CallActionKind,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl AspMessage {
    /// The `session_id` carried by session-bound messages, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            AspMessage::ProtocolCapabilities { .. } => None,
            AspMessage::SessionStart { session_id, .. }
            | AspMessage::SessionStarted { session_id, .. }
            | AspMessage::SessionUpdate { session_id, .. }
            | AspMessage::SessionUpdated { session_id, .. }
            | AspMessage::SessionEnd { session_id, .. }
            | AspMessage::SessionEnded { session_id, .. }
            | AspMessage::AudioSpeechStart { session_id, .. }
            | AspMessage::AudioSpeechEnd { session_id, .. }
            | AspMessage::ResponseStart { session_id, .. }
            | AspMessage::ResponseEnd { session_id, .. }
            | AspMessage::CallAction { session_id, .. } => Some(*session_id),
            AspMessage::ProtocolError { session_id, .. } => *session_id,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            AspMessage::ProtocolCapabilities { .. } => "protocol.capabilities",
            AspMessage::SessionStart { .. } => "session.start",
            AspMessage::SessionStarted { .. } => "session.started",
            AspMessage::SessionUpdate { .. } => "session.update",
            AspMessage::SessionUpdated { .. } => "session.updated",
            AspMessage::SessionEnd { .. } => "session.end",
            AspMessage::SessionEnded { .. } => "session.ended",
            AspMessage::ProtocolError { .. } => "protocol.error",
            AspMessage::AudioSpeechStart { .. } => "audio.speech_start",
            AspMessage::AudioSpeechEnd { .. } => "audio.speech_end",
            AspMessage::ResponseStart { .. } => "response.start",
            AspMessage::ResponseEnd { .. } => "response.end",
            AspMessage::CallAction { .. } => "call.action",
        }
    }
}

/// Current UTC time formatted as the ISO-8601 string every message carries.
/// Centralized so callers never hand-format timestamps inconsistently.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Parse a UTF-8 JSON text frame into a typed [`AspMessage`].
pub fn parse(json: &str) -> AspResult<AspMessage> {
    serde_json::from_str(json).map_err(|e| AspError::MalformedJson { reason: e.to_string() })
}

/// Serialize a message back to its wire JSON representation.
pub fn encode(message: &AspMessage) -> AspResult<String> {
    serde_json::to_string(message).map_err(|e| AspError::MalformedJson { reason: e.to_string() })
}

/// Build a `protocol.error` message for the given error, optionally
/// attached to a session.
pub fn protocol_error(session_id: Option<Uuid>, error: &AspError) -> AspMessage {
    AspMessage::ProtocolError {
        timestamp: now_iso8601(),
        session_id,
        code: error.code().0,
        message: error.to_string(),
        recoverable: error.is_recoverable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_session_start() {
        let msg = AspMessage::SessionStart {
            timestamp: now_iso8601(),
            session_id: Uuid::new_v4(),
            call_id: Some("call-123".to_string()),
            audio: Some(AudioConfigRequest { sample_rate: Some(8000), encoding: None, frame_duration_ms: None }),
            vad: None,
            metadata: None,
        };
        let json = encode(&msg).unwrap();
        let parsed = parse(&json).unwrap();
        assert_eq!(parsed.type_tag(), "session.start");
        assert_eq!(parsed.session_id(), msg.session_id());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse("{not json").unwrap_err();
        assert!(matches!(err, AspError::MalformedJson { .. }));
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let err = parse(r#"{"type":"bogus.message","timestamp":"2026-01-01T00:00:00Z"}"#).unwrap_err();
        assert!(matches!(err, AspError::MalformedJson { .. }));
    }

    #[test]
    fn call_action_parses_transfer() {
        let json = format!(
            r#"{{"type":"call.action","session_id":"{}","action":"transfer","target":"1001","timestamp":"{}"}}"#,
            Uuid::new_v4(),
            now_iso8601()
        );
        let parsed = parse(&json).unwrap();
        match parsed {
            AspMessage::CallAction { action, target, .. } => {
                assert_eq!(action, CallActionKind::Transfer);
                assert_eq!(target.as_deref(), Some("1001"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
