//! The SIP-side state machine and the `Call` entity it drives
//! (spec.md §3 `Call`, §4.3).

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, OrchestratorResult};

/// SIP call states, abstracted over pjsua2-style callbacks (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipState {
    Unregistered,
    Registering,
    Registered,
    Incoming,
    Confirmed,
    Disconnected,
}

impl SipState {
    pub fn is_active(&self) -> bool {
        matches!(self, SipState::Incoming | SipState::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SipState::Disconnected)
    }
}

#[derive(Debug, Clone)]
pub enum SipEvent {
    RegisterRequested,
    RegistrationSucceeded,
    RegistrationFailed { reason: String },
    InviteReceived,
    Confirmed,
    ByeReceived,
    Error { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid SIP transition {event:?} from state {from:?}")]
pub struct InvalidSipTransition {
    pub from: SipState,
    pub event: SipEventKind,
}

/// Discriminant-only mirror of [`SipEvent`], for the error type (so it
/// stays `Copy` without dragging the `String` payloads along).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipEventKind {
    RegisterRequested,
    RegistrationSucceeded,
    RegistrationFailed,
    InviteReceived,
    Confirmed,
    ByeReceived,
    Error,
}

impl SipEvent {
    fn kind(&self) -> SipEventKind {
        match self {
            SipEvent::RegisterRequested => SipEventKind::RegisterRequested,
            SipEvent::RegistrationSucceeded => SipEventKind::RegistrationSucceeded,
            SipEvent::RegistrationFailed { .. } => SipEventKind::RegistrationFailed,
            SipEvent::InviteReceived => SipEventKind::InviteReceived,
            SipEvent::Confirmed => SipEventKind::Confirmed,
            SipEvent::ByeReceived => SipEventKind::ByeReceived,
            SipEvent::Error { .. } => SipEventKind::Error,
        }
    }
}

impl SipState {
    /// `unregistered -> registering -> registered -> {incoming -> confirmed -> disconnected}*`
    pub fn advance(&mut self, event: &SipEvent) -> Result<SipState, InvalidSipTransition> {
        use SipEvent::*;
        use SipState::*;

        let next = match (*self, event) {
            (Unregistered, RegisterRequested) => Registering,
            (Registering, RegistrationSucceeded) => Registered,
            (Registering, RegistrationFailed { .. }) => Unregistered,
            (Registered, InviteReceived) => Incoming,
            (Incoming, Confirmed) => SipState::Confirmed,
            (SipState::Confirmed, ByeReceived) | (Incoming, ByeReceived) => Disconnected,
            (_, Error { .. }) => Disconnected,
            _ => return Err(InvalidSipTransition { from: *self, event: event.kind() }),
        };

        *self = next;
        Ok(next)
    }
}

/// The transfer/hangup action C4 has requested but which C3 has not yet
/// executed. Write-once per response cycle: a new action replaces the old
/// one outright, it is never queued (spec.md §4.3 deferred-action rule).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    None,
    Transfer { target: String, reason: Option<String> },
    Hangup { reason: Option<String> },
}

/// A live call, owned exclusively by C3. Cross-task fields (`pending_action`,
/// `playback_finished`) use interior mutability because the SIP callback
/// thread and the playback-draining task both touch this value, but there
/// is still exactly one logical owner: the orchestrator entry for this
/// `caller_channel`.
pub struct Call {
    pub caller_channel: Option<String>,
    state: Mutex<SipState>,
    pending_action: Mutex<PendingAction>,
    playback_finished: Notify,
    is_playing_response: AtomicBool,
    is_muted: AtomicBool,
}

/// Caller channel targets must be digits, `*`, or `#` only (spec.md §4.3
/// step 3).
fn is_valid_transfer_target(target: &str) -> bool {
    !target.is_empty() && target.chars().all(|c| c.is_ascii_digit() || c == '*' || c == '#')
}

impl Call {
    pub fn new(caller_channel: Option<String>) -> Self {
        Self {
            caller_channel,
            state: Mutex::new(SipState::Incoming),
            pending_action: Mutex::new(PendingAction::None),
            playback_finished: Notify::new(),
            is_playing_response: AtomicBool::new(false),
            is_muted: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SipState {
        *self.state.lock()
    }

    pub fn advance(&self, event: &SipEvent) -> Result<SipState, InvalidSipTransition> {
        self.state.lock().advance(event)
    }

    /// Store the pending action, last-write-wins (spec.md §4.3 step 1).
    pub fn set_pending_action(&self, action: PendingAction) {
        debug!(?action, "pending action stored, deferred until playback_finished");
        *self.pending_action.lock() = action;
    }

    pub fn take_pending_action(&self) -> PendingAction {
        std::mem::replace(&mut self.pending_action.lock(), PendingAction::None)
    }

    /// Raise the edge-triggered `playback_finished` event. Must only be
    /// called after the last outbound audio frame of the response cycle has
    /// actually drained (spec.md §5 ordering guarantee ii).
    pub fn notify_playback_finished(&self) {
        self.is_playing_response.store(false, Ordering::Release);
        self.playback_finished.notify_one();
    }

    pub async fn wait_playback_finished(&self) {
        self.playback_finished.notified().await
    }

    pub fn set_playing_response(&self, playing: bool) {
        self.is_playing_response.store(playing, Ordering::Release);
    }

    pub fn is_playing_response(&self) -> bool {
        self.is_playing_response.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.is_muted.store(muted, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted.load(Ordering::Acquire)
    }

    /// Validate a transfer request against the rules enforced right before
    /// a `Redirect` is issued (spec.md §4.3 step 3).
    pub fn validate_transfer(&self, target: &str) -> OrchestratorResult<()> {
        let Some(channel) = self.caller_channel.as_ref() else {
            warn!("transfer requested but caller_channel is absent; degrading gracefully");
            return Err(OrchestratorError::CallerChannelMissing);
        };
        if channel.is_empty() {
            return Err(OrchestratorError::CallerChannelMissing);
        }
        if !is_valid_transfer_target(target) {
            return Err(OrchestratorError::InvalidTransferTarget { target: target.to_string() });
        }
        Ok(())
    }

    /// Reset on SIP disconnect (spec.md §4.3: `_stop_conversation`,
    /// `_cleanup`, `pending_action = none`).
    pub fn reset_on_disconnect(&self) {
        *self.pending_action.lock() = PendingAction::None;
        self.is_playing_response.store(false, Ordering::Release);
        self.is_muted.store(false, Ordering::Release);
    }
}
