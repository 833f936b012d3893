//! AI Session Server — accepts ASP connections and drives one
//! STT -> LLM(+tools) -> TTS pipeline per session (spec.md §4.4, component C4).
//!
//! This crate depends only on `voice-asp-protocol`; it has no knowledge of
//! SIP, RTP, or the PBX control channel. `call.action` messages it emits are
//! consumed by `voice-call-orchestrator` over the same ASP transport C2
//! forwards audio across.

pub mod config;
pub mod connection;
pub mod error;
pub mod providers;
pub mod resample;
pub mod sentence_splitter;
pub mod server;
pub mod session;
pub mod utterance_buffer;

pub mod prelude {
    pub use crate::config::SessionServerConfig;
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::providers::{
        FinishReason, HistoryTurn, LlmChunk, LlmProvider, LocalEchoLlm, LocalEchoStt, LocalSilenceTts,
        ProviderBundle, RemoteLlmClient, RemoteSttClient, RemoteTtsClient, SttProvider, ToolCall, ToolSchema,
        Transcript, TtsProvider,
    };
    pub use crate::server::AiSessionServer;
    pub use crate::session::{OutboundEvent, Session, SessionState};
}
