//! STT / LLM / TTS provider contracts (spec.md §6.4) and the two
//! implementations each supports: a local in-process model and a remote
//! API. Both are stubs here — this crate only needs the interface
//! boundary; wiring a real model or HTTP client in is an integration
//! concern outside the core.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub language: String,
    pub confidence: f32,
}

#[async_trait]
pub trait SttProvider: Send + Sync {
    async fn transcribe(&self, pcm_bytes: &[u8], sample_rate: u32) -> SessionResult<Transcript>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
}

/// One chunk of an in-flight LLM stream: either more text or the final
/// chunk's finish reason plus any accumulated tool calls.
pub enum LlmChunk {
    Text(String),
    Done { finish_reason: FinishReason, tool_calls: Vec<ToolCall> },
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn stream(
        &self,
        history: &[HistoryTurn],
        user_text: &str,
        tools: &[ToolSchema],
    ) -> SessionResult<BoxStream<'static, LlmChunk>>;
}

#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn stream(&self, text: &str, sample_rate: u32) -> SessionResult<BoxStream<'static, Vec<u8>>>;
}

/// Minimal local-model stand-in: deterministic, offline, useful for
/// integration tests and the degraded/no-network path.
pub struct LocalEchoStt;

#[async_trait]
impl SttProvider for LocalEchoStt {
    async fn transcribe(&self, pcm_bytes: &[u8], _sample_rate: u32) -> SessionResult<Transcript> {
        Ok(Transcript {
            text: format!("<{} bytes of audio>", pcm_bytes.len()),
            language: "und".to_string(),
            confidence: 0.0,
        })
    }
}

pub struct RemoteSttClient {
    pub endpoint: String,
}

#[async_trait]
impl SttProvider for RemoteSttClient {
    async fn transcribe(&self, _pcm_bytes: &[u8], _sample_rate: u32) -> SessionResult<Transcript> {
        Err(SessionError::SttFailed { reason: format!("remote STT at {} not reachable in this build", self.endpoint) })
    }
}

/// Local stand-in LLM: echoes a fixed acknowledgment with no tool calls.
/// Useful offline and as the degraded path when the remote LLM is down.
pub struct LocalEchoLlm;

#[async_trait]
impl LlmProvider for LocalEchoLlm {
    async fn stream(
        &self,
        _history: &[HistoryTurn],
        user_text: &str,
        _tools: &[ToolSchema],
    ) -> SessionResult<BoxStream<'static, LlmChunk>> {
        let reply = format!("Entendi: {user_text}.");
        let chunks = vec![
            LlmChunk::Text(reply),
            LlmChunk::Done { finish_reason: FinishReason::Stop, tool_calls: Vec::new() },
        ];
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }
}

pub struct RemoteLlmClient {
    pub endpoint: String,
}

#[async_trait]
impl LlmProvider for RemoteLlmClient {
    async fn stream(
        &self,
        _history: &[HistoryTurn],
        _user_text: &str,
        _tools: &[ToolSchema],
    ) -> SessionResult<BoxStream<'static, LlmChunk>> {
        Err(SessionError::LlmFailed { reason: format!("remote LLM at {} not reachable in this build", self.endpoint) })
    }
}

/// Local stand-in TTS: emits one chunk of silence sized for the requested
/// sample rate instead of real speech.
pub struct LocalSilenceTts;

#[async_trait]
impl TtsProvider for LocalSilenceTts {
    async fn stream(&self, text: &str, sample_rate: u32) -> SessionResult<BoxStream<'static, Vec<u8>>> {
        let duration_ms = (text.chars().count() as u32 * 60).clamp(200, 4000);
        let samples = (sample_rate * duration_ms / 1000) as usize;
        let silence = vec![0u8; samples * 2];
        Ok(Box::pin(tokio_stream::iter(vec![silence])))
    }
}

pub struct RemoteTtsClient {
    pub endpoint: String,
}

#[async_trait]
impl TtsProvider for RemoteTtsClient {
    async fn stream(&self, _text: &str, _sample_rate: u32) -> SessionResult<BoxStream<'static, Vec<u8>>> {
        Err(SessionError::TtsFailed { reason: format!("remote TTS at {} not reachable in this build", self.endpoint) })
    }
}

/// Groups the three injected provider interfaces plus the STT model's
/// native sample rate (spec.md §6.4: STT must handle at least 8/16 kHz;
/// resampling up to whatever rate the model is fixed at is the caller's
/// responsibility when the model itself doesn't resample).
#[derive(Clone)]
pub struct ProviderBundle {
    pub stt: std::sync::Arc<dyn SttProvider>,
    pub llm: std::sync::Arc<dyn LlmProvider>,
    pub tts: std::sync::Arc<dyn TtsProvider>,
    pub stt_native_sample_rate: u32,
}

impl ProviderBundle {
    /// Fully local, offline provider set: useful for tests and as the
    /// degraded default when no remote endpoints are configured.
    pub fn local_stub() -> Self {
        Self {
            stt: std::sync::Arc::new(LocalEchoStt),
            llm: std::sync::Arc::new(LocalEchoLlm),
            tts: std::sync::Arc::new(LocalSilenceTts),
            stt_native_sample_rate: 16000,
        }
    }
}
