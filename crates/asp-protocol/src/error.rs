//! Error taxonomy for the Audio Session Protocol.
//!
//! Error codes are grouped by the thousands digit per the wire spec:
//! `1xxx` protocol, `2xxx` audio, `3xxx` VAD, `4xxx` session. Each variant
//! carries a `recoverable` flag mirrored from [`AspError::is_recoverable`]
//! so that callers can decide whether to keep the transport open.

use thiserror::Error;

/// Result alias for ASP codec/handshake operations.
pub type AspResult<T> = Result<T, AspError>;

/// Numeric wire error code as sent in a `protocol.error` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErrorCode(pub u32);

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// All error conditions the ASP codec and handshake state machine can raise.
#[derive(Error, Debug, Clone)]
pub enum AspError {
    /// The text frame was not valid JSON.
    #[error("malformed JSON: {reason}")]
    MalformedJson { reason: String },

    /// The JSON was valid but `type` was missing, unknown, or the wrong shape
    /// for the fields present.
    #[error("unrecognized message type: {type_tag}")]
    UnknownMessageType { type_tag: String },

    /// Client did not send `session.start` within `T_handshake`.
    #[error("handshake timed out waiting for session.start")]
    HandshakeTimeout,

    /// Client and server disagree on the protocol major version.
    #[error("protocol version mismatch: server={server}, client={client}")]
    VersionMismatch { server: String, client: String },

    /// Requested sample rate is not in the server's supported set.
    #[error("unsupported sample rate: {requested}")]
    UnsupportedSampleRate { requested: u32 },

    /// Requested encoding is not in the server's supported set.
    #[error("unsupported encoding: {requested}")]
    UnsupportedEncoding { requested: String },

    /// A `session.update` attempted to change audio parameters post-accept.
    #[error("audio parameters are immutable after session.started")]
    AudioImmutable,

    /// Referenced `session_id` has no active session (duplicate `session.end`,
    /// stale `session.update`, ...).
    #[error("no active session: {session_id}")]
    UnknownSession { session_id: String },

    /// A `session.start` arrived for a `session_id` that is already active.
    #[error("duplicate session: {session_id}")]
    DuplicateSession { session_id: String },
}

impl AspError {
    /// Numeric wire code per spec.md §4.1/§7's `1xxx`/`2xxx`/`3xxx`/`4xxx` taxonomy.
    pub fn code(&self) -> ErrorCode {
        ErrorCode(match self {
            AspError::MalformedJson { .. } => 1001,
            AspError::HandshakeTimeout => 1002,
            AspError::UnknownMessageType { .. } => 1003,
            AspError::VersionMismatch { .. } => 1004,
            AspError::UnsupportedSampleRate { .. } => 2001,
            AspError::UnsupportedEncoding { .. } => 2002,
            AspError::AudioImmutable => 4004,
            AspError::UnknownSession { .. } => 4001,
            AspError::DuplicateSession { .. } => 4002,
        })
    }

    /// Whether the peer may retry on the same transport, per spec.md §4.1/§7.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AspError::HandshakeTimeout | AspError::VersionMismatch { .. }
        )
    }
}
