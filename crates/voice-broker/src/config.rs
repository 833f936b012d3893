//! Top-level broker configuration: the bind address for the ASP listener
//! plus C2's ring-buffer sizing, assembled from environment alongside the
//! per-crate configs (`OrchestratorConfig`, `SessionServerConfig`).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address the AI session server's WebSocket listener binds.
    pub asp_bind_addr: String,

    /// `RING_BUFFER_MS` — depth of each call's fork-manager ring buffer.
    pub ring_buffer_ms: u64,
    /// Frame duration assumed when sizing the ring buffer in frames.
    pub frame_duration_ms: u64,
    /// `T_DEGRADE_MS` — how long a consumer may be unavailable before the
    /// fork manager engages fallback mode.
    pub t_degrade: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            asp_bind_addr: "0.0.0.0:9090".to_string(),
            ring_buffer_ms: 2000,
            frame_duration_ms: 20,
            t_degrade: Duration::from_secs(60),
        }
    }
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("ASP_BIND_ADDR") {
            config.asp_bind_addr = v;
        }
        if let Some(v) = env_u64("RING_BUFFER_MS") {
            config.ring_buffer_ms = v;
        }
        if let Some(v) = env_u64("FRAME_DURATION_MS") {
            config.frame_duration_ms = v;
        }
        if let Some(v) = env_u64("T_DEGRADE_MS") {
            config.t_degrade = Duration::from_millis(v);
        }
        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bind_addr_is_set() {
        assert_eq!(BrokerConfig::default().asp_bind_addr, "0.0.0.0:9090");
    }
}
