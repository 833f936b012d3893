//! The per-connection handshake state machine (spec.md §4.1).
//!
//! ```text
//! IDLE -> CONNECTED -> CAPS_SENT -> NEGOTIATING -> ACTIVE -> (UPDATING <-> ACTIVE) -> ENDING -> CLOSED
//! ```
//!
//! This type only tracks the state and validates transitions; it does not
//! own a transport. The server task (`voice-ai-session-server`) and the
//! backwards-compat gate both drive it through [`HandshakeState::advance`].

use crate::error::AspError;

/// One state in the handshake lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Connected,
    CapsSent,
    Negotiating,
    Active,
    Updating,
    Ending,
    Closed,
}

/// An event that can move the handshake forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeEvent {
    TransportOpened,
    CapabilitiesSent,
    SessionStartReceived,
    NegotiationAccepted,
    NegotiationRejectedRecoverable,
    UpdateReceived,
    UpdateResolved,
    SessionEndReceived,
    TransportClosed,
}

/// A transition that is not valid from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {event:?} from state {from:?}")]
pub struct InvalidTransition {
    pub from: HandshakeState,
    pub event: HandshakeEvent,
}

impl HandshakeState {
    pub fn new() -> Self {
        HandshakeState::Idle
    }

    /// Attempt one transition. On success returns the new state; on
    /// failure the state is left unchanged and an [`InvalidTransition`] is
    /// returned (callers typically escalate this to an
    /// `AspError::UnknownMessageType`-style protocol error, since receiving
    /// a message that is not valid in the current state is itself a
    /// protocol violation).
    pub fn advance(&mut self, event: HandshakeEvent) -> Result<HandshakeState, InvalidTransition> {
        use HandshakeEvent::*;
        use HandshakeState::*;

        let next = match (*self, event) {
            (Idle, TransportOpened) => Connected,
            (Connected, CapabilitiesSent) => CapsSent,
            (CapsSent, SessionStartReceived) => Negotiating,
            (Negotiating, NegotiationAccepted) => Active,
            // A recoverable rejection lets the client retry session.start
            // from the same CAPS_SENT state (spec.md §4.1).
            (Negotiating, NegotiationRejectedRecoverable) => CapsSent,
            (Active, UpdateReceived) => Updating,
            (Updating, UpdateResolved) => Active,
            (Active, SessionEndReceived) | (Updating, SessionEndReceived) => Ending,
            (CapsSent, TransportClosed)
            | (Negotiating, TransportClosed)
            | (Active, TransportClosed)
            | (Updating, TransportClosed)
            | (Ending, TransportClosed) => Closed,
            _ => return Err(InvalidTransition { from: *self, event }),
        };

        *self = next;
        Ok(next)
    }

    /// Whether binary audio frames are permitted in this state
    /// (spec.md §4.1: "In ACTIVE, binary audio frames are permitted in both
    /// directions").
    pub fn audio_permitted(&self) -> bool {
        matches!(self, HandshakeState::Active | HandshakeState::Updating)
    }
}

impl Default for HandshakeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the handshake-timeout protocol error (spec.md §4.1: code `1002`,
/// non-recoverable).
pub fn handshake_timeout_error() -> AspError {
    AspError::HandshakeTimeout
}
