//! Per-connection ASP server task (spec.md §4.1 handshake state machine,
//! component C1 server side, wired into one [`Session`] per connection).
//!
//! One WebSocket transport carries exactly one session for its lifetime:
//! `protocol.capabilities` is sent on accept, `session.start` negotiates the
//! session, and `session.end`/peer-disconnect/idle/`T_session_max` end it
//! and close the transport. Binary audio frames are demultiplexed from text
//! control frames on the same stream (spec.md §6.1).

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use voice_asp_protocol::config::{NegotiatedConfig, ProtocolCapabilities};
use voice_asp_protocol::error::AspError;
use voice_asp_protocol::frame::{self, AudioFrame, Direction};
use voice_asp_protocol::handshake::HandshakeState;
use voice_asp_protocol::message::{self, AspMessage, SessionStatus};
use voice_asp_protocol::negotiator::{self, NegotiationOutcome, RequestedAudio, RequestedVad};

use crate::config::SessionServerConfig;
use crate::providers::ProviderBundle;
use crate::session::{OutboundEvent, Session};

/// T_legacy (spec.md §4.1 backwards-compat gate): how long the server
/// waits for the expected initial frame before assuming a pre-ASP client.
pub const T_LEGACY: Duration = Duration::from_secs(5);

enum FirstMessage {
    Json(AspMessage),
    Legacy(Message),
    None,
}

/// Drive one accepted ASP connection end to end. Returns when the session
/// (and transport) ends, for whatever reason.
pub async fn handle_connection(
    stream: WebSocketStream<TcpStream>,
    config: std::sync::Arc<SessionServerConfig>,
    providers: ProviderBundle,
) {
    let (mut sink, mut stream) = stream.split();
    let caps = ProtocolCapabilities::default();
    let mut handshake = HandshakeState::new();
    let _ = handshake.advance(voice_asp_protocol::handshake::HandshakeEvent::TransportOpened);

    if send_json(&mut sink, &AspMessage::ProtocolCapabilities {
        timestamp: message::now_iso8601(),
        version: caps.version.clone(),
        supported_sample_rates: caps.supported_sample_rates.clone(),
        supported_encodings: caps.supported_encodings.clone(),
        supported_frame_durations_ms: caps.supported_frame_durations_ms.clone(),
        vad_configurable: caps.vad_configurable,
        tunable_vad_fields: caps.tunable_vad_fields.clone(),
        features: caps.features.clone(),
    })
    .await
    .is_err()
    {
        return;
    }
    let _ = handshake.advance(voice_asp_protocol::handshake::HandshakeEvent::CapabilitiesSent);

    let first = match tokio::time::timeout(T_LEGACY, stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => match message::parse(&text) {
            Ok(msg) => FirstMessage::Json(msg),
            Err(e) => {
                warn!(error = %e, "malformed first text frame");
                FirstMessage::None
            }
        },
        Ok(Some(Ok(msg @ Message::Binary(_)))) => FirstMessage::Legacy(msg),
        Ok(Some(Ok(_))) => FirstMessage::None,
        Ok(Some(Err(_))) | Ok(None) => return,
        Err(_) => FirstMessage::None,
    };

    let (mut session, legacy) = match first {
        FirstMessage::Legacy(first_frame) => {
            info!("no ASP handshake within T_legacy; falling back to legacy pre-ASP mode");
            let negotiated = NegotiatedConfig {
                audio: config.default_audio.clone(),
                vad: config.default_vad.clone(),
                adjustments: Vec::new(),
            };
            let mut session = new_session(Uuid::new_v4(), negotiated, &config, &providers);
            let mut out = Vec::new();
            session.greet(false, &mut out).await;
            flush(&mut sink, &out, session.session_id).await;
            if let Message::Binary(bytes) = first_frame {
                handle_binary(&mut session, &bytes, &mut sink).await;
            }
            (session, true)
        }
        FirstMessage::Json(AspMessage::SessionStart { session_id, audio, vad, metadata, .. }) => {
            match negotiate_session_start(&caps, &audio, &vad, &config) {
                NegotiationOutcome::Accepted(negotiated) => {
                    let status = negotiator::status_for(&negotiated.adjustments);
                    let _ = handshake.advance(voice_asp_protocol::handshake::HandshakeEvent::SessionStartReceived);
                    let _ = handshake.advance(voice_asp_protocol::handshake::HandshakeEvent::NegotiationAccepted);
                    let wire_status = match status {
                        negotiator::NegotiationStatus::Accepted => SessionStatus::Accepted,
                        negotiator::NegotiationStatus::AcceptedWithChanges => SessionStatus::AcceptedWithChanges,
                        negotiator::NegotiationStatus::Rejected => unreachable!("Accepted outcome never maps to Rejected"),
                    };
                    if send_json(&mut sink, &AspMessage::SessionStarted {
                        timestamp: message::now_iso8601(),
                        session_id,
                        status: wire_status,
                        negotiated: Some(negotiated.clone()),
                        errors: None,
                    })
                    .await
                    .is_err()
                    {
                        return;
                    }
                    let transfer_retry = metadata
                        .as_ref()
                        .and_then(|m| m.get("transfer_retry"))
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    let mut session = new_session(session_id, negotiated, &config, &providers);
                    let mut out = Vec::new();
                    session.greet(transfer_retry, &mut out).await;
                    flush(&mut sink, &out, session.session_id).await;
                    (session, false)
                }
                NegotiationOutcome::Rejected(err) => {
                    reject_and_maybe_close(&mut sink, session_id, &err).await;
                    return;
                }
            }
        }
        FirstMessage::Json(_) => {
            warn!("first message on a new connection was not session.start; closing");
            return;
        }
        FirstMessage::None => {
            let _ = send_json(
                &mut sink,
                &message::protocol_error(None, &AspError::HandshakeTimeout),
            )
            .await;
            return;
        }
    };
    debug!(session_id = %session.session_id, legacy, "session active, entering message loop");

    let idle_deadline_base = Instant::now();
    let session_max_deadline = idle_deadline_base + config.t_session_max;
    let mut last_activity = Instant::now();

    loop {
        let idle_sleep = tokio::time::sleep_until(last_activity + config.t_idle);
        let max_sleep = tokio::time::sleep_until(session_max_deadline);

        tokio::select! {
            _ = idle_sleep => {
                end_session(&mut sink, session.session_id, "idle_timeout").await;
                return;
            }
            _ = max_sleep => {
                end_session(&mut sink, session.session_id, "session_max_duration").await;
                return;
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        match message::parse(&text) {
                            Ok(AspMessage::SessionUpdate { session_id, vad, .. }) if session_id == session.session_id => {
                                handle_session_update(&mut session, vad, &mut sink).await;
                            }
                            Ok(AspMessage::SessionEnd { .. }) => {
                                end_session(&mut sink, session.session_id, "client_requested").await;
                                return;
                            }
                            Ok(other) => debug!(type_tag = other.type_tag(), "ignoring message not valid in ACTIVE state"),
                            Err(e) => debug!(error = %e, "dropping malformed text frame"),
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        last_activity = Instant::now();
                        handle_binary(&mut session, &bytes, &mut sink).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(session_id = %session.session_id, "transport closed by peer");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id = %session.session_id, error = %e, "transport error, ending session");
                        return;
                    }
                }
            }
        }
    }
}

fn new_session(
    session_id: Uuid,
    negotiated: NegotiatedConfig,
    config: &std::sync::Arc<SessionServerConfig>,
    providers: &ProviderBundle,
) -> Session {
    Session::new(
        session_id,
        negotiated,
        config.clone(),
        providers.stt.clone(),
        providers.llm.clone(),
        providers.tts.clone(),
        providers.stt_native_sample_rate,
    )
}

fn negotiate_session_start(
    caps: &ProtocolCapabilities,
    audio: &Option<voice_asp_protocol::message::AudioConfigRequest>,
    vad: &Option<voice_asp_protocol::message::VadConfigRequest>,
    config: &SessionServerConfig,
) -> NegotiationOutcome {
    let requested_audio: RequestedAudio = audio.as_ref().map(Into::into).unwrap_or_default();
    let requested_vad: RequestedVad = vad.as_ref().map(Into::into).unwrap_or_default();
    let client_major = major_version_of(caps);
    negotiator::negotiate_with_defaults(
        caps,
        &client_major,
        &requested_audio,
        &requested_vad,
        &config.default_audio,
        &config.default_vad,
    )
}

/// Clients are expected to report their own protocol major version; since
/// `session.start` carries no explicit version field on the wire (§6.1),
/// this crate treats the connection as speaking the server's own major
/// version unless a future protocol revision adds one.
fn major_version_of(caps: &ProtocolCapabilities) -> String {
    caps.version.split('.').next().unwrap_or("1").to_string()
}

async fn handle_session_update(
    session: &mut Session,
    vad: voice_asp_protocol::message::VadConfigRequest,
    sink: &mut (impl futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
) {
    let requested: RequestedVad = (&vad).into();
    let (new_vad, adjustments) = negotiator::renegotiate_vad(&requested, &session.negotiated.vad);
    session.negotiated.vad = new_vad;
    let status = negotiator::status_for(&adjustments);
    let wire_status = match status {
        negotiator::NegotiationStatus::Accepted => SessionStatus::Accepted,
        negotiator::NegotiationStatus::AcceptedWithChanges => SessionStatus::AcceptedWithChanges,
        negotiator::NegotiationStatus::Rejected => SessionStatus::Rejected,
    };
    let _ = send_json(sink, &AspMessage::SessionUpdated {
        timestamp: message::now_iso8601(),
        session_id: session.session_id,
        status: wire_status,
        negotiated: Some(session.negotiated.clone()),
        errors: None,
    })
    .await;
}

async fn handle_binary(
    session: &mut Session,
    bytes: &[u8],
    sink: &mut (impl futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
) {
    let decoded = match frame::decode(bytes) {
        Ok(f) => f,
        Err(e) => {
            debug!(error = %e, "dropping undecodable binary frame");
            return;
        }
    };
    if decoded.direction != Direction::Inbound {
        return;
    }
    let expected_hash = frame::session_hash(&session.session_id);
    if decoded.session_hash != expected_hash {
        debug!("binary frame session-hash mismatch, dropping (lossy by design)");
        return;
    }

    let mut out = Vec::new();
    if session.on_inbound_audio(&decoded.payload, &mut out).await.is_ok() {
        flush(sink, &out, session.session_id).await;
    }
}

async fn flush(
    sink: &mut (impl futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    events: &[OutboundEvent],
    session_id: Uuid,
) {
    let hash = frame::session_hash(&session_id);
    for event in events {
        match event {
            OutboundEvent::Control(msg) => {
                let _ = send_json(sink, msg).await;
            }
            OutboundEvent::AudioChunk(pcm) => {
                let frame = AudioFrame { direction: Direction::Outbound, session_hash: hash, payload: pcm.clone() };
                let _ = sink.send(Message::Binary(frame::encode(&frame))).await;
            }
        }
    }
}

async fn send_json(
    sink: &mut (impl futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    msg: &AspMessage,
) -> Result<(), ()> {
    let json = message::encode(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

async fn reject_and_maybe_close(
    sink: &mut (impl futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    session_id: Uuid,
    err: &AspError,
) {
    let wire_error = voice_asp_protocol::message::WireError::from(err);
    let _ = send_json(sink, &AspMessage::SessionStarted {
        timestamp: message::now_iso8601(),
        session_id,
        status: SessionStatus::Rejected,
        negotiated: None,
        errors: Some(vec![wire_error]),
    })
    .await;
    if !err.is_recoverable() {
        let _ = send_json(sink, &message::protocol_error(Some(session_id), err)).await;
    }
}

async fn end_session(
    sink: &mut (impl futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    session_id: Uuid,
    reason: &str,
) {
    let _ = send_json(
        sink,
        &AspMessage::SessionEnded { timestamp: message::now_iso8601(), session_id, reason: reason.to_string() },
    )
    .await;
    let _ = sink.close().await;
    info!(session_id = %session_id, reason, "session ended");
}
