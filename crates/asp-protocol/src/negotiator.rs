//! The negotiator: turns a client's requested audio/VAD configuration plus
//! the server's declared capabilities into a [`NegotiatedConfig`] or a
//! rejection, per spec.md §4.1.

use crate::config::{
    AudioConfig, NegotiatedConfig, ProtocolCapabilities, VadConfig, VAD_FIELD_RANGES,
};
use crate::error::{AspError, AspResult};

/// A client's requested audio parameters, as parsed from `session.start`.
/// Any field left `None` falls back to [`AudioConfig::default`].
#[derive(Debug, Clone, Default)]
pub struct RequestedAudio {
    pub sample_rate: Option<u32>,
    pub encoding: Option<String>,
    pub frame_duration_ms: Option<u32>,
}

/// A client's requested VAD parameters. Missing fields fall back to
/// [`VadConfig::default`].
#[derive(Debug, Clone, Default)]
pub struct RequestedVad {
    pub enabled: Option<bool>,
    pub silence_threshold_ms: Option<u32>,
    pub min_speech_ms: Option<u32>,
    pub threshold: Option<f32>,
    pub ring_buffer_frames: Option<u32>,
    pub speech_ratio: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
}

/// Status reported in `session.started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStatus {
    Accepted,
    AcceptedWithChanges,
    Rejected,
}

/// Full negotiation outcome: either an accepted/adjusted config or a
/// rejection carrying the `AspError` that explains why.
pub enum NegotiationOutcome {
    Accepted(NegotiatedConfig),
    Rejected(AspError),
}

/// Run the negotiator for one `session.start`.
///
/// Order of checks mirrors spec.md §4.1:
/// 1. Sample rate / encoding membership (reject, `2001`/`2002`).
/// 2. VAD field clamping (never rejects; each field independently snapped
///    to its own range and recorded as an [`Adjustment`](crate::config::Adjustment)).
/// 3. Protocol major-version match (reject, `1004`, non-recoverable).
///
/// The adjustment policy is deterministic and order-independent: running
/// this function twice on its own output is a no-op (property P1), and
/// every out-of-range field produces exactly one adjustment, never more,
/// never for an in-range field (property P2).
pub fn negotiate(
    caps: &ProtocolCapabilities,
    client_major_version: &str,
    requested_audio: &RequestedAudio,
    requested_vad: &RequestedVad,
) -> NegotiationOutcome {
    negotiate_with_defaults(
        caps,
        client_major_version,
        requested_audio,
        requested_vad,
        &AudioConfig::default(),
        &VadConfig::default(),
    )
}

/// Same as [`negotiate`] but with the process-configured defaults (spec.md
/// §6.6 `SAMPLE_RATE`/`FRAME_DURATION_MS`/`ENCODING`/`VAD_*`) substituted for
/// any field the client's `session.start` left unset, instead of the wire
/// type's hardcoded `Default` impl.
pub fn negotiate_with_defaults(
    caps: &ProtocolCapabilities,
    client_major_version: &str,
    requested_audio: &RequestedAudio,
    requested_vad: &RequestedVad,
    default_audio: &AudioConfig,
    default_vad: &VadConfig,
) -> NegotiationOutcome {
    if major_version(client_major_version) != major_version(&caps.version) {
        return NegotiationOutcome::Rejected(AspError::VersionMismatch {
            server: caps.version.clone(),
            client: client_major_version.to_string(),
        });
    }

    let sample_rate = requested_audio.sample_rate.unwrap_or(default_audio.sample_rate);
    if !caps.supported_sample_rates.contains(&sample_rate) {
        return NegotiationOutcome::Rejected(AspError::UnsupportedSampleRate { requested: sample_rate });
    }

    let encoding_str = requested_audio
        .encoding
        .clone()
        .unwrap_or_else(|| default_audio.encoding.as_str().to_string());
    if !caps.supported_encodings.contains(&encoding_str) {
        return NegotiationOutcome::Rejected(AspError::UnsupportedEncoding { requested: encoding_str });
    }
    let encoding = crate::config::Encoding::parse(&encoding_str)
        .expect("validated against caps.supported_encodings above");

    let frame_duration_ms = requested_audio
        .frame_duration_ms
        .unwrap_or(default_audio.frame_duration_ms);

    let audio = AudioConfig {
        sample_rate,
        encoding,
        channels: 1,
        frame_duration_ms,
    };

    let (vad, adjustments) = clamp_vad(requested_vad, default_vad);

    let negotiated = NegotiatedConfig { audio, vad, adjustments };
    NegotiationOutcome::Accepted(negotiated)
}

/// Clamp every requested VAD field against its own closed range,
/// independent of the others (property P1/P2). Fields the caller left
/// unset fall back to `default`, not [`VadConfig::default`], so a
/// process-wide configured default (spec.md §6.6) is honored.
fn clamp_vad(requested: &RequestedVad, default: &VadConfig) -> (VadConfig, Vec<crate::config::Adjustment>) {
    let mut adjustments = Vec::new();

    macro_rules! clamp_field {
        ($range_name:expr, $requested:expr, $default:expr) => {{
            match $requested {
                Some(value) => {
                    let range = VAD_FIELD_RANGES
                        .iter()
                        .find(|r| r.name == $range_name)
                        .expect("range table covers all seven VAD fields");
                    let value_f64 = value as f64;
                    if value_f64 < range.min || value_f64 > range.max {
                        let applied = value_f64.clamp(range.min, range.max);
                        adjustments.push(crate::config::Adjustment {
                            field: $range_name.to_string(),
                            requested: value_f64,
                            applied,
                            reason: format!(
                                "{} out of range [{}, {}], snapped to nearest bound",
                                $range_name, range.min, range.max
                            ),
                        });
                        applied
                    } else {
                        value_f64
                    }
                }
                None => $default as f64,
            }
        }};
    }

    let silence_threshold_ms =
        clamp_field!("vad.silence_threshold_ms", requested.silence_threshold_ms, default.silence_threshold_ms) as u32;
    let min_speech_ms =
        clamp_field!("vad.min_speech_ms", requested.min_speech_ms, default.min_speech_ms) as u32;
    let threshold = clamp_field!("vad.threshold", requested.threshold, default.threshold) as f32;
    let ring_buffer_frames =
        clamp_field!("vad.ring_buffer_frames", requested.ring_buffer_frames, default.ring_buffer_frames) as u32;
    let speech_ratio = clamp_field!("vad.speech_ratio", requested.speech_ratio, default.speech_ratio) as f32;
    let prefix_padding_ms =
        clamp_field!("vad.prefix_padding_ms", requested.prefix_padding_ms, default.prefix_padding_ms) as u32;

    let vad = VadConfig {
        enabled: requested.enabled.unwrap_or(default.enabled),
        silence_threshold_ms,
        min_speech_ms,
        threshold,
        ring_buffer_frames,
        speech_ratio,
        prefix_padding_ms,
    };

    (vad, adjustments)
}

/// Validate a `session.update` that may only touch VAD fields. Returns the
/// replacement [`VadConfig`] plus any adjustments, or `AspError::AudioImmutable`
/// if the caller also tried to change audio (checked by the caller before
/// invoking this, since `session.update`'s wire shape has no audio field at
/// all per spec.md §6.1 — this function only re-runs the VAD clamp).
pub fn renegotiate_vad(
    requested_vad: &RequestedVad,
    current: &VadConfig,
) -> (VadConfig, Vec<crate::config::Adjustment>) {
    clamp_vad(requested_vad, current)
}

/// Derive [`NegotiationStatus`] from an accepted outcome's adjustment list.
pub fn status_for(adjustments: &[crate::config::Adjustment]) -> NegotiationStatus {
    if adjustments.is_empty() {
        NegotiationStatus::Accepted
    } else {
        NegotiationStatus::AcceptedWithChanges
    }
}

fn major_version(semver: &str) -> &str {
    semver.split('.').next().unwrap_or(semver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn caps() -> ProtocolCapabilities {
        ProtocolCapabilities::default()
    }

    #[test]
    fn accepts_defaults_with_no_adjustments() {
        let outcome = negotiate(&caps(), "1", &RequestedAudio::default(), &RequestedVad::default());
        match outcome {
            NegotiationOutcome::Accepted(cfg) => assert!(cfg.adjustments.is_empty()),
            NegotiationOutcome::Rejected(e) => panic!("unexpected rejection: {e}"),
        }
    }

    #[test]
    fn rejects_unsupported_sample_rate() {
        let req = RequestedAudio { sample_rate: Some(44100), ..Default::default() };
        let outcome = negotiate(&caps(), "1", &req, &RequestedVad::default());
        assert!(matches!(
            outcome,
            NegotiationOutcome::Rejected(AspError::UnsupportedSampleRate { requested: 44100 })
        ));
    }

    #[test]
    fn rejects_version_mismatch_non_recoverable() {
        let outcome = negotiate(&caps(), "2", &RequestedAudio::default(), &RequestedVad::default());
        match outcome {
            NegotiationOutcome::Rejected(e) => assert!(!e.is_recoverable()),
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn snaps_out_of_range_vad_threshold_and_records_adjustment() {
        let req = RequestedVad { threshold: Some(1.5), silence_threshold_ms: Some(50), ..Default::default() };
        let outcome = negotiate(&caps(), "1", &RequestedAudio::default(), &req);
        match outcome {
            NegotiationOutcome::Accepted(cfg) => {
                assert_eq!(status_for(&cfg.adjustments), NegotiationStatus::AcceptedWithChanges);
                assert_eq!(cfg.vad.threshold, 1.0);
                assert_eq!(cfg.vad.silence_threshold_ms, 100);
                assert_eq!(cfg.adjustments.len(), 2);
                assert!(cfg.adjustments.iter().all(|a| !a.reason.is_empty()));
            }
            NegotiationOutcome::Rejected(e) => panic!("unexpected rejection: {e}"),
        }
    }

    #[test]
    fn idempotent_on_already_applied_config() {
        let req = RequestedVad { threshold: Some(1.5), ..Default::default() };
        let first = match negotiate(&caps(), "1", &RequestedAudio::default(), &req) {
            NegotiationOutcome::Accepted(cfg) => cfg,
            NegotiationOutcome::Rejected(e) => panic!("unexpected rejection: {e}"),
        };
        let reapplied = RequestedVad {
            threshold: Some(first.vad.threshold),
            silence_threshold_ms: Some(first.vad.silence_threshold_ms),
            min_speech_ms: Some(first.vad.min_speech_ms),
            ring_buffer_frames: Some(first.vad.ring_buffer_frames),
            speech_ratio: Some(first.vad.speech_ratio),
            prefix_padding_ms: Some(first.vad.prefix_padding_ms),
            enabled: Some(first.vad.enabled),
        };
        let second = match negotiate(&caps(), "1", &RequestedAudio::default(), &reapplied) {
            NegotiationOutcome::Accepted(cfg) => cfg,
            NegotiationOutcome::Rejected(e) => panic!("unexpected rejection: {e}"),
        };
        assert!(second.adjustments.is_empty());
        assert_eq!(first.vad.threshold, second.vad.threshold);
    }

    proptest! {
        /// P2: every VAD field is clamped independently to its own range —
        /// in-range requests get no adjustment, out-of-range ones get
        /// exactly one, snapped inside `[min, max]`.
        #[test]
        fn property_p2_vad_fields_clamp_independently(
            silence_threshold_ms in 0u32..5000,
            min_speech_ms in 0u32..3000,
            threshold in 0.0f32..2.0,
            ring_buffer_frames in 0u32..20,
            speech_ratio in 0.0f32..1.5,
            prefix_padding_ms in 0u32..1000,
        ) {
            let req = RequestedVad {
                enabled: Some(true),
                silence_threshold_ms: Some(silence_threshold_ms),
                min_speech_ms: Some(min_speech_ms),
                threshold: Some(threshold),
                ring_buffer_frames: Some(ring_buffer_frames),
                speech_ratio: Some(speech_ratio),
                prefix_padding_ms: Some(prefix_padding_ms),
            };
            let outcome = negotiate(&caps(), "1", &RequestedAudio::default(), &req);
            let cfg = match outcome {
                NegotiationOutcome::Accepted(cfg) => cfg,
                NegotiationOutcome::Rejected(e) => panic!("VAD-only request should never reject: {e}"),
            };

            let requested_values: [(&str, f64); 6] = [
                ("vad.silence_threshold_ms", silence_threshold_ms as f64),
                ("vad.min_speech_ms", min_speech_ms as f64),
                ("vad.threshold", threshold as f64),
                ("vad.ring_buffer_frames", ring_buffer_frames as f64),
                ("vad.speech_ratio", speech_ratio as f64),
                ("vad.prefix_padding_ms", prefix_padding_ms as f64),
            ];
            for (name, value) in requested_values {
                let range = VAD_FIELD_RANGES.iter().find(|r| r.name == name).unwrap();
                let in_range = value >= range.min && value <= range.max;
                let adjustment = cfg.adjustments.iter().find(|a| a.field == name);
                if in_range {
                    prop_assert!(adjustment.is_none(), "{} was in range but got an adjustment", name);
                } else {
                    let adj = adjustment.unwrap_or_else(|| panic!("{name} was out of range but got no adjustment"));
                    prop_assert!(adj.applied >= range.min && adj.applied <= range.max);
                }
            }
        }

        /// P1: re-negotiating an already-accepted config is a no-op —
        /// feeding `negotiate`'s own output back in produces zero further
        /// adjustments and an identical `VadConfig`.
        #[test]
        fn property_p1_negotiation_is_idempotent(
            threshold in 0.0f32..2.0,
            silence_threshold_ms in 0u32..5000,
            ring_buffer_frames in 0u32..20,
        ) {
            let req = RequestedVad {
                threshold: Some(threshold),
                silence_threshold_ms: Some(silence_threshold_ms),
                ring_buffer_frames: Some(ring_buffer_frames),
                ..Default::default()
            };
            let first = match negotiate(&caps(), "1", &RequestedAudio::default(), &req) {
                NegotiationOutcome::Accepted(cfg) => cfg,
                NegotiationOutcome::Rejected(e) => panic!("unexpected rejection: {e}"),
            };
            let reapplied = RequestedVad {
                enabled: Some(first.vad.enabled),
                silence_threshold_ms: Some(first.vad.silence_threshold_ms),
                min_speech_ms: Some(first.vad.min_speech_ms),
                threshold: Some(first.vad.threshold),
                ring_buffer_frames: Some(first.vad.ring_buffer_frames),
                speech_ratio: Some(first.vad.speech_ratio),
                prefix_padding_ms: Some(first.vad.prefix_padding_ms),
            };
            let second = match negotiate(&caps(), "1", &RequestedAudio::default(), &reapplied) {
                NegotiationOutcome::Accepted(cfg) => cfg,
                NegotiationOutcome::Rejected(e) => panic!("unexpected rejection: {e}"),
            };
            prop_assert!(second.adjustments.is_empty());
            prop_assert_eq!(first.vad, second.vad);
        }
    }
}
