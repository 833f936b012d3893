//! Session server configuration, assembled from environment (spec.md §6.6).

use std::collections::HashMap;
use std::time::Duration;

use voice_asp_protocol::config::{AudioConfig, VadConfig};

#[derive(Debug, Clone)]
pub struct SessionServerConfig {
    pub max_buffer_seconds: u64,
    pub barge_in_enabled: bool,

    pub t_llm: Duration,
    pub t_idle: Duration,
    pub t_session_max: Duration,
    pub t_handshake: Duration,

    pub llm_max_tokens: u32,

    /// `N_unresolved` — consecutive tool-call-free turns before escalation.
    pub max_unresolved_interactions: u32,
    pub default_transfer_target: String,
    /// Name -> extension map a `transfer_call(target="sales")` resolves through.
    pub department_extensions: HashMap<String, String>,

    /// Audio params substituted for whatever `session.start` leaves unset,
    /// and assumed outright for legacy (non-ASP) connections.
    pub default_audio: AudioConfig,
    /// Same, for VAD.
    pub default_vad: VadConfig,
}

impl Default for SessionServerConfig {
    fn default() -> Self {
        Self {
            max_buffer_seconds: 60,
            barge_in_enabled: true,
            t_llm: Duration::from_secs(15),
            t_idle: Duration::from_secs(300),
            t_session_max: Duration::from_secs(3600),
            t_handshake: Duration::from_secs(30),
            llm_max_tokens: 512,
            max_unresolved_interactions: 3,
            default_transfer_target: "0".to_string(),
            department_extensions: HashMap::new(),
            default_audio: AudioConfig::default(),
            default_vad: VadConfig::default(),
        }
    }
}

impl SessionServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_u64("MAX_BUFFER_SECONDS") {
            config.max_buffer_seconds = v;
        }
        if let Ok(v) = std::env::var("BARGE_IN_ENABLED") {
            config.barge_in_enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = env_u64("T_HANDSHAKE_S") {
            config.t_handshake = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("T_IDLE_S") {
            config.t_idle = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("T_SESSION_MAX_S") {
            config.t_session_max = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("LLM_TIMEOUT_S") {
            config.t_llm = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("LLM_MAX_TOKENS") {
            config.llm_max_tokens = v as u32;
        }
        if let Some(v) = env_u64("MAX_UNRESOLVED_INTERACTIONS") {
            config.max_unresolved_interactions = v as u32;
        }
        if let Ok(v) = std::env::var("DEFAULT_TRANSFER_TARGET") {
            config.default_transfer_target = v;
        }
        if let Ok(raw) = std::env::var("DEPARTMENT_EXTENSIONS") {
            // "sales=1001,support=1002"
            for entry in raw.split(',') {
                if let Some((name, ext)) = entry.split_once('=') {
                    config.department_extensions.insert(name.trim().to_string(), ext.trim().to_string());
                }
            }
        }

        if let Some(v) = env_u64("SAMPLE_RATE") {
            config.default_audio.sample_rate = v as u32;
        }
        if let Some(v) = env_u64("FRAME_DURATION_MS") {
            config.default_audio.frame_duration_ms = v as u32;
        }
        if let Ok(v) = std::env::var("ENCODING") {
            if let Some(encoding) = voice_asp_protocol::config::Encoding::parse(&v) {
                config.default_audio.encoding = encoding;
            }
        }
        if let Ok(v) = std::env::var("VAD_ENABLED") {
            config.default_vad.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = env_u64("VAD_SILENCE_THRESHOLD_MS") {
            config.default_vad.silence_threshold_ms = v as u32;
        }
        if let Some(v) = env_u64("VAD_MIN_SPEECH_MS") {
            config.default_vad.min_speech_ms = v as u32;
        }
        if let Some(v) = env_f32("VAD_THRESHOLD") {
            config.default_vad.threshold = v;
        }
        if let Some(v) = env_u64("VAD_RING_BUFFER_FRAMES") {
            config.default_vad.ring_buffer_frames = v as u32;
        }
        if let Some(v) = env_f32("VAD_SPEECH_RATIO") {
            config.default_vad.speech_ratio = v;
        }
        if let Some(v) = env_u64("VAD_PREFIX_PADDING_MS") {
            config.default_vad.prefix_padding_ms = v as u32;
        }

        config
    }

    /// Resolve a `transfer_call` target: digits/`*`/`#` pass through
    /// directly, anything else is looked up in the department map
    /// (spec.md §4.4 tools).
    pub fn resolve_transfer_target(&self, requested: &str) -> Option<String> {
        if requested.chars().all(|c| c.is_ascii_digit() || c == '*' || c == '#') && !requested.is_empty() {
            Some(requested.to_string())
        } else {
            self.department_extensions.get(requested).cloned()
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_f32(key: &str) -> Option<f32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
