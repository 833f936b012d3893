//! Error types for the AI session server.

use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("unknown session {session_id}")]
    UnknownSession { session_id: String },

    #[error("STT provider failed: {reason}")]
    SttFailed { reason: String },

    #[error("LLM provider failed: {reason}")]
    LlmFailed { reason: String },

    #[error("TTS provider failed: {reason}")]
    TtsFailed { reason: String },

    #[error("LLM call timed out after T_llm")]
    LlmTimeout,

    #[error("session idle for longer than T_idle")]
    IdleTimeout,

    #[error("session exceeded T_session_max")]
    SessionMaxDurationExceeded,

    #[error("ASP transport error: {reason}")]
    Transport { reason: String },
}

impl SessionError {
    /// Provider errors never end the session (spec.md §7): they are
    /// converted into a canned apology. Timeouts and transport loss do end
    /// it, with a specific reason code.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            SessionError::SttFailed { .. } | SessionError::LlmFailed { .. } | SessionError::TtsFailed { .. }
        )
    }

    /// The `session.ended` reason code this error maps to when it does
    /// terminate the session.
    pub fn end_reason(&self) -> &'static str {
        match self {
            SessionError::LlmTimeout => "llm_timeout",
            SessionError::IdleTimeout => "idle_timeout",
            SessionError::SessionMaxDurationExceeded => "session_max_duration",
            SessionError::Transport { .. } => "transport_error",
            SessionError::UnknownSession { .. } => "unknown_session",
            _ => "internal_error",
        }
    }
}
