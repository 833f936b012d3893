//! Error types for the call orchestrator.
//!
//! Mirrors the category/recoverability scheme client-core's `ClientError`
//! uses, generalized to this crate's SIP/control-plane surface.

use thiserror::Error;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("SIP registration failed: {reason}")]
    RegistrationFailed { reason: String },

    #[error("not registered with the PBX")]
    NotRegistered,

    #[error("no call with channel {channel}")]
    CallNotFound { channel: String },

    #[error("call on channel {channel} already exists")]
    CallAlreadyExists { channel: String },

    #[error("invalid call state transition: {from} -> {event}")]
    InvalidCallState { from: String, event: String },

    #[error("caller channel header absent; control actions disabled for this call")]
    CallerChannelMissing,

    #[error("transfer target {target:?} does not match ^[0-9*#]+$")]
    InvalidTransferTarget { target: String },

    #[error("PBX control channel is not connected")]
    ControlChannelDisconnected,

    #[error("PBX control channel login failed: {reason}")]
    ControlChannelAuthFailed { reason: String },

    #[error("Redirect for ActionID {action_id} timed out after T_ctl")]
    RedirectTimedOut { action_id: String },

    #[error("Redirect for ActionID {action_id} was refused: {reason}")]
    RedirectRefused { action_id: String, reason: String },
}

impl OrchestratorError {
    /// Whether the caller may retry the same operation (e.g. after a
    /// backoff). Registration/transport failures are recoverable; state
    /// and validation errors are not since retrying changes nothing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::RegistrationFailed { .. }
                | OrchestratorError::NotRegistered
                | OrchestratorError::ControlChannelDisconnected
                | OrchestratorError::RedirectTimedOut { .. }
        )
    }

    /// Whether this is a control-plane (PBX Redirect/Login) error, which
    /// per the deferred-action rule is logged and dropped rather than
    /// propagated to the caller.
    pub fn is_control_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::CallerChannelMissing
                | OrchestratorError::InvalidTransferTarget { .. }
                | OrchestratorError::ControlChannelDisconnected
                | OrchestratorError::ControlChannelAuthFailed { .. }
                | OrchestratorError::RedirectTimedOut { .. }
                | OrchestratorError::RedirectRefused { .. }
        )
    }

    pub fn category(&self) -> &'static str {
        match self {
            OrchestratorError::RegistrationFailed { .. } | OrchestratorError::NotRegistered => "registration",
            OrchestratorError::CallNotFound { .. }
            | OrchestratorError::CallAlreadyExists { .. }
            | OrchestratorError::InvalidCallState { .. } => "call",
            OrchestratorError::CallerChannelMissing
            | OrchestratorError::InvalidTransferTarget { .. }
            | OrchestratorError::ControlChannelDisconnected
            | OrchestratorError::ControlChannelAuthFailed { .. }
            | OrchestratorError::RedirectTimedOut { .. }
            | OrchestratorError::RedirectRefused { .. } => "control",
        }
    }
}
