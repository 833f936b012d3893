//! Ties the SIP state machine, the PBX control channel, and C2's fork
//! manager together and enforces the deferred-action ordering rule
//! (spec.md §4.3).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};
use voice_media_fork::fork_manager::ForkManager;

use crate::ami_client::AmiClient;
use crate::call::{Call, PendingAction, SipEvent};
use crate::error::OrchestratorResult;

/// The header the PBX dialplan is expected to set on the inbound INVITE so
/// the orchestrator can recover the original caller's channel identifier
/// (spec.md §6.2). The agent leg's own channel is not useful here.
pub const CALLER_CHANNEL_HEADER: &str = "X-Caller-Channel";

/// Extract the caller-channel header from a raw SIP message's header
/// block. Returns `None` if the header is absent, which disables control
/// actions for that call but otherwise degrades gracefully.
pub fn extract_caller_channel(raw_sip_headers: &str) -> Option<String> {
    raw_sip_headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case(CALLER_CHANNEL_HEADER) {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

pub struct CallOrchestrator {
    calls: DashMap<String, Arc<Call>>,
    fork_managers: DashMap<String, Arc<ForkManager>>,
    ami: Arc<AmiClient>,
}

impl CallOrchestrator {
    pub fn new(ami: Arc<AmiClient>) -> Self {
        Self { calls: DashMap::new(), fork_managers: DashMap::new(), ami }
    }

    /// SIP INVITE accepted: create the `Call` and its fork manager slot.
    pub fn accept_invite(&self, session_key: &str, raw_sip_headers: &str, fork_manager: Arc<ForkManager>) -> Arc<Call> {
        let caller_channel = extract_caller_channel(raw_sip_headers);
        if caller_channel.is_none() {
            warn!(session_key, "caller channel header absent; control actions disabled for this call");
        }
        let call = Arc::new(Call::new(caller_channel));
        let _ = call.advance(&SipEvent::InviteReceived);
        self.calls.insert(session_key.to_string(), call.clone());
        self.fork_managers.insert(session_key.to_string(), fork_manager);
        call
    }

    pub fn call(&self, session_key: &str) -> Option<Arc<Call>> {
        self.calls.get(session_key).map(|c| c.clone())
    }

    /// SIP BYE or media error: run the teardown sequence (spec.md §4.3:
    /// `_stop_conversation`, `_cleanup`, `pending_action = none`).
    pub fn disconnect(&self, session_key: &str) {
        if let Some((_, call)) = self.calls.remove(session_key) {
            let _ = call.advance(&SipEvent::ByeReceived);
            call.reset_on_disconnect();
        }
        self.fork_managers.remove(session_key);
        info!(session_key, "call torn down");
    }

    /// C4 emitted `call.action`. Per the deferred-action rule this only
    /// stores the action and spawns a task that waits for
    /// `playback_finished`; it never executes the PBX command inline.
    pub fn on_call_action(self: &Arc<Self>, session_key: &str, action: PendingAction) {
        let Some(call) = self.call(session_key) else {
            warn!(session_key, "call.action for unknown session, dropping");
            return;
        };
        call.set_pending_action(action);

        let orchestrator = self.clone();
        let session_key = session_key.to_string();
        tokio::spawn(async move {
            orchestrator.execute_deferred_action(&session_key).await;
        });
    }

    async fn execute_deferred_action(&self, session_key: &str) {
        let Some(call) = self.call(session_key) else { return };
        call.wait_playback_finished().await;

        let action = call.take_pending_action();
        match action {
            PendingAction::None => {}
            PendingAction::Transfer { target, .. } => {
                if let Err(e) = self.do_transfer(&call, &target).await {
                    warn!(session_key, error = %e, "transfer action dropped, call continues");
                }
            }
            PendingAction::Hangup { reason } => {
                info!(session_key, ?reason, "hangup action would be issued to PBX here");
            }
        }
    }

    async fn do_transfer(&self, call: &Call, target: &str) -> OrchestratorResult<()> {
        call.validate_transfer(target)?;
        let channel = call.caller_channel.as_deref().expect("validated above");
        self.ami.redirect(channel, target).await
    }

    pub fn fork_manager(&self, session_key: &str) -> Option<Arc<ForkManager>> {
        self.fork_managers.get(session_key).map(|f| f.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_caller_channel_header_case_insensitively() {
        let headers = "Via: SIP/2.0/UDP 10.0.0.1\r\nx-caller-channel: SIP/1001-00000001\r\nTo: <sip:2000@pbx>";
        assert_eq!(extract_caller_channel(headers), Some("SIP/1001-00000001".to_string()));
    }

    #[test]
    fn missing_header_returns_none() {
        let headers = "Via: SIP/2.0/UDP 10.0.0.1\r\nTo: <sip:2000@pbx>";
        assert_eq!(extract_caller_channel(headers), None);
    }
}
