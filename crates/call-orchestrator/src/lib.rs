//! Call Orchestrator — the SIP-driven state machine that owns per-call
//! state and schedules PBX control actions under the deferred-action
//! ordering rule (spec.md §4.3, component C3).

pub mod ami_client;
pub mod call;
pub mod config;
pub mod error;
pub mod orchestrator;

pub mod prelude {
    pub use crate::ami_client::{ActionPacket, AmiClient, RetryConfig};
    pub use crate::call::{Call, PendingAction, SipEvent, SipState};
    pub use crate::config::OrchestratorConfig;
    pub use crate::error::{OrchestratorError, OrchestratorResult};
    pub use crate::orchestrator::{extract_caller_channel, CallOrchestrator, CALLER_CHANNEL_HEADER};
}
