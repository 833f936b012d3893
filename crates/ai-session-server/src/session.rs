//! The `Session` entity and its per-utterance pipeline (spec.md §3
//! `Session`, §4.4). Owned exclusively by C4; `NegotiatedConfig` is
//! produced by C1 and read-only here.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;
use voice_asp_protocol::config::NegotiatedConfig;
use voice_asp_protocol::message::{AspMessage, CallActionKind};

use crate::config::SessionServerConfig;
use crate::error::{SessionError, SessionResult};
use crate::providers::{FinishReason, HistoryTurn, LlmProvider, SttProvider, ToolCall, ToolSchema, TtsProvider};
use crate::resample::linear_upsample;
use crate::sentence_splitter::SentenceSplitter;
use crate::utterance_buffer::{FrameEvent, MonitorVad, UtteranceBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Processing,
    Responding,
}

/// A typed event emitted toward the transport layer: either a control
/// message or a chunk of outbound PCM (spec.md §9: "adapter owns a
/// channel of typed events").
pub enum OutboundEvent {
    Control(AspMessage),
    AudioChunk(Vec<u8>),
}

fn whitelisted_tools() -> Vec<ToolSchema> {
    vec![
        ToolSchema { name: "transfer_call".to_string(), description: "Transfer the caller to another extension".to_string() },
        ToolSchema { name: "end_call".to_string(), description: "End the call".to_string() },
    ]
}

pub struct Session {
    pub session_id: Uuid,
    pub negotiated: NegotiatedConfig,
    pub state: SessionState,
    config: Arc<SessionServerConfig>,
    stt: Arc<dyn SttProvider>,
    llm: Arc<dyn LlmProvider>,
    tts: Arc<dyn TtsProvider>,
    stt_native_sample_rate: u32,
    history: Vec<HistoryTurn>,
    unresolved_turns: u32,
    utterance_buffer: UtteranceBuffer,
    monitor_vad: MonitorVad,
    last_ttfb_ms: Option<u64>,
    barge_in_count: u64,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: Uuid,
        negotiated: NegotiatedConfig,
        config: Arc<SessionServerConfig>,
        stt: Arc<dyn SttProvider>,
        llm: Arc<dyn LlmProvider>,
        tts: Arc<dyn TtsProvider>,
        stt_native_sample_rate: u32,
    ) -> Self {
        let utterance_buffer = UtteranceBuffer::new(
            negotiated.vad.clone(),
            negotiated.audio.frame_duration_ms as u64,
            config.max_buffer_seconds,
        );
        let monitor_vad = MonitorVad::new(&negotiated.vad);
        Self {
            session_id,
            negotiated,
            state: SessionState::Idle,
            config,
            stt,
            llm,
            tts,
            stt_native_sample_rate,
            history: Vec::new(),
            unresolved_turns: 0,
            utterance_buffer,
            monitor_vad,
            last_ttfb_ms: None,
            barge_in_count: 0,
        }
    }

    /// TTFB of the most recently completed response cycle (spec.md §4.4
    /// step 7): elapsed time from `speech_end` to the first outbound audio
    /// chunk of the corresponding response. `None` until a full cycle with
    /// at least one spoken sentence has completed.
    pub fn last_ttfb_ms(&self) -> Option<u64> {
        self.last_ttfb_ms
    }

    /// Number of times monitor-mode VAD has detected speech during
    /// playback (spec.md §4.3 "Barge-in"), for observability.
    pub fn barge_in_count(&self) -> u64 {
        self.barge_in_count
    }

    /// Synthesize and play the greeting, then enter `listening`. Skipped
    /// when `metadata.transfer_retry` was set on `session.start` (spec.md
    /// §4.4 "Greeting").
    pub async fn greet(&mut self, transfer_retry: bool, out: &mut Vec<OutboundEvent>) {
        if transfer_retry {
            self.state = SessionState::Listening;
            return;
        }
        self.speak("Ola! Como posso ajudar voce hoje?", out).await;
        self.state = SessionState::Listening;
    }

    /// Feed one inbound binary frame. Per spec.md §3, frames only
    /// contribute to the buffer while `state == listening`; this is where
    /// that invariant (and P6) is enforced. While playback is in flight
    /// (`state == responding`), frames are instead routed to monitor-mode
    /// VAD for barge-in detection (spec.md §4.3).
    pub async fn on_inbound_audio(&mut self, pcm: &[u8], out: &mut Vec<OutboundEvent>) -> SessionResult<()> {
        if self.state != SessionState::Listening {
            self.monitor_playback_for_barge_in(pcm, out);
            return Ok(());
        }
        match self.utterance_buffer.push_frame(pcm) {
            FrameEvent::SpeechStarted => {
                out.push(OutboundEvent::Control(speech_start_message(self.session_id)));
            }
            FrameEvent::Completed(utterance) => {
                self.run_response_cycle(utterance.pcm, utterance.duration_ms, out).await?;
            }
            FrameEvent::None => {}
        }
        Ok(())
    }

    /// Monitor-mode VAD during playback: detects speech onset but never
    /// forwards frames into the utterance buffer (spec.md §4.3
    /// "Barge-in"). A detected onset emits `audio.speech_start` and raises
    /// a `barge_in_triggered` signal for observability; the current policy
    /// lets playback drain naturally rather than interrupting it (spec.md
    /// §9 Open Questions).
    fn monitor_playback_for_barge_in(&mut self, pcm: &[u8], out: &mut Vec<OutboundEvent>) {
        if !self.config.barge_in_enabled || !self.negotiated.vad.enabled || self.state != SessionState::Responding {
            return;
        }
        if self.monitor_vad.push(pcm) {
            self.barge_in_count += 1;
            info!(session_id = %self.session_id, barge_in_triggered = true, "speech detected during playback (monitor mode)");
            out.push(OutboundEvent::Control(speech_start_message(self.session_id)));
        }
    }

    async fn run_response_cycle(&mut self, pcm: Vec<u8>, duration_ms: u64, out: &mut Vec<OutboundEvent>) -> SessionResult<()> {
        out.push(OutboundEvent::Control(speech_end_message(self.session_id, duration_ms)));
        self.state = SessionState::Processing;
        let speech_end_at = Instant::now();

        let transcript = match self.transcribe(&pcm).await {
            Ok(t) => t,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "STT failed, apologizing");
                self.speak_apology(out).await;
                self.state = SessionState::Listening;
                self.monitor_vad.reset();
                return Ok(());
            }
        };

        self.state = SessionState::Responding;
        out.push(OutboundEvent::Control(response_start_message(self.session_id)));

        let outcome = self.drive_llm_and_tts(&transcript.text, out, speech_end_at).await;
        out.push(OutboundEvent::Control(response_end_message(self.session_id)));

        match outcome {
            Ok(tool_calls) => {
                self.dispatch_tool_calls(&tool_calls, out).await;
                if tool_calls.is_empty() {
                    self.unresolved_turns += 1;
                    self.maybe_escalate(out).await;
                } else {
                    self.unresolved_turns = 0;
                }
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "LLM/TTS failed mid-response, apologizing");
                self.speak_apology(out).await;
            }
        }

        self.history.push(HistoryTurn { role: "user".to_string(), content: transcript.text });
        self.state = SessionState::Listening;
        self.monitor_vad.reset();
        Ok(())
    }

    async fn transcribe(&self, pcm: &[u8]) -> SessionResult<crate::providers::Transcript> {
        let native_rate = self.negotiated.audio.sample_rate;
        let pcm_for_stt = if native_rate < self.stt_native_sample_rate {
            linear_upsample(pcm, native_rate, self.stt_native_sample_rate)
        } else {
            pcm.to_vec()
        };
        self.stt.transcribe(&pcm_for_stt, self.stt_native_sample_rate.max(native_rate)).await
    }

    /// Stream LLM tokens into sentences, speak each sentence via TTS as
    /// soon as it completes, and return whatever tool calls the stream
    /// ultimately surfaced. Records TTFB (spec.md §4.4 step 7) at the
    /// first outbound audio chunk of the response.
    async fn drive_llm_and_tts(
        &mut self,
        user_text: &str,
        out: &mut Vec<OutboundEvent>,
        speech_end_at: Instant,
    ) -> SessionResult<Vec<ToolCall>> {
        let mut stream = self.llm.stream(&self.history, user_text, &whitelisted_tools()).await?;
        let mut splitter = SentenceSplitter::new();
        let mut tool_calls = Vec::new();
        let mut assistant_text = String::new();
        let mut ttfb_recorded = false;

        while let Some(chunk) = stream.next().await {
            match chunk {
                crate::providers::LlmChunk::Text(text) => {
                    assistant_text.push_str(&text);
                    for sentence in splitter.push(&text) {
                        self.speak(&sentence, out).await;
                        if !ttfb_recorded {
                            ttfb_recorded = self.maybe_record_ttfb(out, speech_end_at);
                        }
                    }
                }
                crate::providers::LlmChunk::Done { finish_reason, tool_calls: calls } => {
                    if finish_reason == FinishReason::ToolCalls {
                        tool_calls = calls;
                    }
                }
            }
        }
        if let Some(tail) = splitter.finish() {
            self.speak(&tail, out).await;
            if !ttfb_recorded {
                ttfb_recorded = self.maybe_record_ttfb(out, speech_end_at);
            }
        }
        self.history.push(HistoryTurn { role: "assistant".to_string(), content: assistant_text });
        Ok(tool_calls)
    }

    /// Records `last_ttfb_ms` on the first outbound audio chunk found in
    /// `out` since this response cycle began. Returns whether it has now
    /// been recorded, so the caller can stop checking.
    fn maybe_record_ttfb(&mut self, out: &[OutboundEvent], speech_end_at: Instant) -> bool {
        if !out.iter().any(|e| matches!(e, OutboundEvent::AudioChunk(_))) {
            return false;
        }
        let ttfb_ms = speech_end_at.elapsed().as_millis() as u64;
        self.last_ttfb_ms = Some(ttfb_ms);
        info!(session_id = %self.session_id, ttfb_ms, "recorded time to first byte");
        true
    }

    async fn speak(&self, text: &str, out: &mut Vec<OutboundEvent>) {
        match self.tts.stream(text, self.negotiated.audio.sample_rate).await {
            Ok(mut pcm_stream) => {
                while let Some(chunk) = pcm_stream.next().await {
                    out.push(OutboundEvent::AudioChunk(chunk));
                }
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "TTS stream failed");
            }
        }
    }

    async fn speak_apology(&self, out: &mut Vec<OutboundEvent>) {
        self.speak("Desculpe, tive um problema. Pode repetir, por favor?", out).await;
    }

    /// Whitelisted tools only: `transfer_call`/`end_call` become a
    /// `call.action`, emitted after `response.end` per spec.md §4.4 step 6
    /// and the P5 ordering property.
    async fn dispatch_tool_calls(&mut self, tool_calls: &[ToolCall], out: &mut Vec<OutboundEvent>) {
        for call in tool_calls {
            let action = match call.name.as_str() {
                "transfer_call" => {
                    let target = call.arguments.get("target").and_then(|v| v.as_str()).unwrap_or_default();
                    let resolved = self.config.resolve_transfer_target(target);
                    resolved.map(|target| call_action_message(self.session_id, CallActionKind::Transfer, Some(target), None))
                }
                "end_call" => Some(call_action_message(self.session_id, CallActionKind::Hangup, None, None)),
                other => {
                    warn!(tool = other, "ignoring non-whitelisted tool call");
                    None
                }
            };
            if let Some(message) = action {
                out.push(OutboundEvent::Control(message));
            }
            // Synthetic tool-result so the LLM does not re-emit the call on retry.
            self.history.push(HistoryTurn { role: "tool".to_string(), content: "Action queued for execution.".to_string() });
        }
    }

    async fn maybe_escalate(&mut self, out: &mut Vec<OutboundEvent>) {
        if self.unresolved_turns < self.config.max_unresolved_interactions {
            return;
        }
        info!(session_id = %self.session_id, "escalating after consecutive unresolved turns");
        self.speak("Vou transferir voce para um atendente agora.", out).await;
        out.push(OutboundEvent::Control(response_end_message(self.session_id)));
        out.push(OutboundEvent::Control(call_action_message(
            self.session_id,
            CallActionKind::Transfer,
            Some(self.config.default_transfer_target.clone()),
            Some("escalation".to_string()),
        )));
        self.unresolved_turns = 0;
    }
}

fn speech_start_message(session_id: Uuid) -> AspMessage {
    AspMessage::AudioSpeechStart { session_id, timestamp: voice_asp_protocol::message::now_iso8601() }
}

fn speech_end_message(session_id: Uuid, duration_ms: u64) -> AspMessage {
    AspMessage::AudioSpeechEnd { session_id, timestamp: voice_asp_protocol::message::now_iso8601(), duration_ms }
}

fn response_start_message(session_id: Uuid) -> AspMessage {
    AspMessage::ResponseStart { session_id, timestamp: voice_asp_protocol::message::now_iso8601() }
}

fn response_end_message(session_id: Uuid) -> AspMessage {
    AspMessage::ResponseEnd { session_id, timestamp: voice_asp_protocol::message::now_iso8601() }
}

fn call_action_message(session_id: Uuid, action: CallActionKind, target: Option<String>, reason: Option<String>) -> AspMessage {
    AspMessage::CallAction { session_id, action, target, reason, timestamp: voice_asp_protocol::message::now_iso8601() }
}

/// `is_recoverable` passthrough used by the server loop when a provider
/// error surfaces as a `SessionResult::Err` outside a response cycle.
pub fn is_terminal_error(err: &SessionError) -> bool {
    !err.is_provider_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use proptest::prelude::*;
    use serde_json::json;
    use voice_asp_protocol::config::{AudioConfig, NegotiatedConfig, VadConfig};

    use crate::providers::{LlmChunk, LocalEchoStt, LocalSilenceTts};

    /// Plays back a fixed, single-use chunk sequence: enough to script one
    /// response cycle's worth of LLM output per test.
    struct ScriptedLlm {
        chunks: std::sync::Mutex<Option<Vec<LlmChunk>>>,
    }

    impl ScriptedLlm {
        fn new(chunks: Vec<LlmChunk>) -> Self {
            Self { chunks: std::sync::Mutex::new(Some(chunks)) }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn stream(
            &self,
            _history: &[HistoryTurn],
            _user_text: &str,
            _tools: &[ToolSchema],
        ) -> SessionResult<BoxStream<'static, LlmChunk>> {
            let chunks = self.chunks.lock().unwrap().take().unwrap_or_default();
            Ok(Box::pin(tokio_stream::iter(chunks)))
        }
    }

    fn test_session() -> Session {
        let negotiated = NegotiatedConfig { audio: AudioConfig::default(), vad: VadConfig::default(), adjustments: Vec::new() };
        Session::new(
            Uuid::new_v4(),
            negotiated,
            Arc::new(SessionServerConfig::default()),
            Arc::new(LocalEchoStt),
            Arc::new(ScriptedLlm::new(Vec::new())),
            Arc::new(LocalSilenceTts),
            16000,
        )
    }

    fn control_index(out: &[OutboundEvent], matcher: impl Fn(&AspMessage) -> bool) -> Option<usize> {
        out.iter().position(|event| matches!(event, OutboundEvent::Control(msg) if matcher(msg)))
    }

    #[tokio::test]
    async fn greet_skips_audio_on_transfer_retry() {
        let mut session = test_session();
        let mut out = Vec::new();
        session.greet(true, &mut out).await;
        assert!(out.is_empty());
        assert_eq!(session.state, SessionState::Listening);
    }

    #[tokio::test]
    async fn greet_speaks_on_a_fresh_session() {
        let mut session = test_session();
        let mut out = Vec::new();
        session.greet(false, &mut out).await;
        assert!(out.iter().any(|e| matches!(e, OutboundEvent::AudioChunk(_))));
        assert_eq!(session.state, SessionState::Listening);
    }

    /// Scenario 3 (transfer): the outbound Redirect-triggering `call.action`
    /// must land strictly after `response.end`, which itself lands after the
    /// spoken acknowledgment's audio (property P5).
    #[tokio::test]
    async fn transfer_tool_call_is_emitted_after_response_end() {
        let mut session = test_session();
        session.llm = Arc::new(ScriptedLlm::new(vec![
            LlmChunk::Text("Claro, um momento.".to_string()),
            LlmChunk::Done {
                finish_reason: FinishReason::ToolCalls,
                tool_calls: vec![ToolCall {
                    id: "call-1".to_string(),
                    name: "transfer_call".to_string(),
                    arguments: json!({"target": "1001"}),
                }],
            },
        ]));

        let mut out = Vec::new();
        session.run_response_cycle(vec![0u8; 640], 20, &mut out).await.unwrap();

        let response_end = control_index(&out, |m| matches!(m, AspMessage::ResponseEnd { .. }))
            .expect("response.end must be emitted");
        let call_action = control_index(&out, |m| matches!(m, AspMessage::CallAction { action: CallActionKind::Transfer, .. }))
            .expect("call.action must be emitted");
        assert!(call_action > response_end, "call.action must follow response.end");

        let last_audio = out.iter().rposition(|e| matches!(e, OutboundEvent::AudioChunk(_)));
        if let Some(last_audio) = last_audio {
            assert!(last_audio < response_end, "acknowledgment audio must precede response.end");
        }
        assert_eq!(session.unresolved_turns, 0);
    }

    #[tokio::test]
    async fn escalates_after_max_unresolved_interactions() {
        let mut session = test_session();
        let no_tool_calls = || {
            vec![
                LlmChunk::Text("Nao entendi.".to_string()),
                LlmChunk::Done { finish_reason: FinishReason::Stop, tool_calls: Vec::new() },
            ]
        };

        // unresolved_turns increments inside the same response cycle that
        // reaches the threshold, so the Nth consecutive no-tool-call turn
        // is the one that escalates, not an (N+1)th turn after it.
        for turn in 0..session.config.max_unresolved_interactions - 1 {
            session.llm = Arc::new(ScriptedLlm::new(no_tool_calls()));
            let mut out = Vec::new();
            session.run_response_cycle(vec![0u8; 640], 20, &mut out).await.unwrap();
            let escalated = out.iter().any(|e| matches!(e, OutboundEvent::Control(AspMessage::CallAction { .. })));
            assert!(!escalated, "must not escalate before reaching the threshold (turn {turn})");
        }

        session.llm = Arc::new(ScriptedLlm::new(no_tool_calls()));
        let mut out = Vec::new();
        session.run_response_cycle(vec![0u8; 640], 20, &mut out).await.unwrap();
        let escalation = control_index(&out, |m| matches!(m, AspMessage::CallAction { action: CallActionKind::Transfer, reason: Some(r), .. } if r == "escalation"));
        assert!(escalation.is_some(), "must escalate on reaching the threshold");
        assert_eq!(session.unresolved_turns, 0);
    }

    proptest! {
        /// P6: while `state != listening`, no inbound frame count, however
        /// many or however loud, can ever complete an utterance — a frame
        /// outside `listening` is either dropped (idle/processing) or routed
        /// to monitor-mode VAD (responding), never into the buffer.
        #[test]
        fn property_p6_frames_never_complete_an_utterance_outside_listening(
            frame_count in 0usize..100,
            loud in any::<bool>(),
        ) {
            let mut session = test_session();
            session.state = SessionState::Idle;
            let frame: Vec<u8> = if loud {
                (0..320u32).map(|i| if i % 2 == 0 { 0xFF } else { 0x7F }).map(|b| b as u8).collect()
            } else {
                vec![0u8; 320]
            };

            tokio_test::block_on(async {
                for _ in 0..frame_count {
                    let mut out = Vec::new();
                    session.on_inbound_audio(&frame, &mut out).await.unwrap();
                    prop_assert!(out.is_empty(), "idle state must never emit control/audio events from inbound frames");
                }
                Ok(())
            })?;
            prop_assert_eq!(session.state, SessionState::Idle);
        }
    }
}
