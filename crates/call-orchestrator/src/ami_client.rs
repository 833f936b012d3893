//! PBX control channel client (spec.md §6.3): a line-oriented,
//! authenticated TCP protocol carrying `Login` / `Redirect` / `Logoff`
//! action packets, with asynchronous responses correlated by `ActionID`.
//!
//! Outbound commands are serialized through a mutex: one request in
//! flight at a time, pipelining forbidden (spec.md §5 shared-resource
//! policy).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Retry shape for the control-channel reconnect loop, generalized from
/// the backoff used for SIP registration retries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jittered = if self.use_jitter {
            let jitter: f64 = rand::thread_rng().gen_range(0.8..1.2);
            capped * jitter
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// A single `Redirect` (or `Login`/`Logoff`) action packet, keyed fields
/// in the order the PBX control protocol expects.
#[derive(Debug, Clone)]
pub struct ActionPacket {
    pub action: String,
    pub fields: Vec<(String, String)>,
}

impl ActionPacket {
    fn render(&self, action_id: &str) -> String {
        let mut out = format!("Action: {}\r\n", self.action);
        for (key, value) in &self.fields {
            out.push_str(&format!("{key}: {value}\r\n"));
        }
        out.push_str(&format!("ActionID: {action_id}\r\n\r\n"));
        out
    }
}

struct PendingResponse {
    reply_tx: oneshot::Sender<OrchestratorResult<HashMap<String, String>>>,
}

/// Connected (or reconnecting) handle to the PBX control channel.
pub struct AmiClient {
    config: OrchestratorConfig,
    retry: RetryConfig,
    writer: Mutex<Option<tokio::io::WriteHalf<TcpStream>>>,
    pending: Mutex<HashMap<String, PendingResponse>>,
    next_action_id: AtomicU64,
    connected: std::sync::atomic::AtomicBool,
}

impl AmiClient {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            retry: RetryConfig::default(),
            writer: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_action_id: AtomicU64::new(1),
            connected: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn fresh_action_id(&self) -> String {
        format!("voice-broker-{}", self.next_action_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Connect, `Login`, and spawn the reader task. Call this once at
    /// startup; reconnection after a dropped connection is driven by
    /// [`AmiClient::run_reconnect_loop`].
    pub async fn connect(self: &std::sync::Arc<Self>) -> OrchestratorResult<()> {
        let stream = TcpStream::connect((self.config.ami_host.as_str(), self.config.ami_port))
            .await
            .map_err(|e| OrchestratorError::ControlChannelAuthFailed { reason: e.to_string() })?;
        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);

        let this = self.clone();
        tokio::spawn(async move {
            this.read_loop(read_half).await;
        });

        let login = ActionPacket {
            action: "Login".to_string(),
            fields: vec![
                ("Username".to_string(), self.config.ami_username.clone()),
                ("Secret".to_string(), self.config.ami_secret.clone()),
            ],
        };
        let response = self.send(login).await?;
        if response.get("Response").map(String::as_str) != Some("Success") {
            return Err(OrchestratorError::ControlChannelAuthFailed {
                reason: response.get("Message").cloned().unwrap_or_else(|| "login rejected".to_string()),
            });
        }
        self.connected.store(true, Ordering::Release);
        info!(host = %self.config.ami_host, "control channel authenticated");
        Ok(())
    }

    async fn read_loop(self: std::sync::Arc<Self>, read_half: tokio::io::ReadHalf<TcpStream>) {
        let mut lines = BufReader::new(read_half).lines();
        let mut current: HashMap<String, String> = HashMap::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        if let Some(action_id) = current.get("ActionID").cloned() {
                            self.dispatch_response(&action_id, std::mem::take(&mut current)).await;
                        }
                        continue;
                    }
                    if let Some((key, value)) = line.split_once(':') {
                        current.insert(key.trim().to_string(), value.trim().to_string());
                    }
                }
                Ok(None) => {
                    warn!("control channel closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "control channel read error");
                    break;
                }
            }
        }
        self.connected.store(false, Ordering::Release);
        self.fail_all_pending(OrchestratorError::ControlChannelDisconnected).await;
    }

    async fn dispatch_response(&self, action_id: &str, fields: HashMap<String, String>) {
        if let Some(pending) = self.pending.lock().await.remove(action_id) {
            let _ = pending.reply_tx.send(Ok(fields));
        } else {
            debug!(action_id, "response for unknown or already-timed-out action");
        }
    }

    async fn fail_all_pending(&self, err: OrchestratorError) {
        let mut pending = self.pending.lock().await;
        for (_, entry) in pending.drain() {
            let _ = entry.reply_tx.send(Err(err.clone()));
        }
    }

    /// Send one action and await its correlated response, serialized so
    /// only one request is ever in flight.
    async fn send(&self, packet: ActionPacket) -> OrchestratorResult<HashMap<String, String>> {
        let action_id = self.fresh_action_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(action_id.clone(), PendingResponse { reply_tx });

        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(OrchestratorError::ControlChannelDisconnected)?;
        writer
            .write_all(packet.render(&action_id).as_bytes())
            .await
            .map_err(|_| OrchestratorError::ControlChannelDisconnected)?;
        drop(writer_guard);

        reply_rx.await.unwrap_or(Err(OrchestratorError::ControlChannelDisconnected))
    }

    /// Issue `Redirect(Channel, Context, Extension, ActionID)` with a
    /// `T_ctl` deadline (spec.md §4.3 step 4).
    pub async fn redirect(&self, channel: &str, extension: &str) -> OrchestratorResult<()> {
        if !self.is_connected() {
            return Err(OrchestratorError::ControlChannelDisconnected);
        }
        let packet = ActionPacket {
            action: "Redirect".to_string(),
            fields: vec![
                ("Channel".to_string(), channel.to_string()),
                ("Context".to_string(), self.config.transfer_context.clone()),
                ("Exten".to_string(), extension.to_string()),
                ("Priority".to_string(), "1".to_string()),
            ],
        };
        let action_id_hint = channel.to_string();
        let outcome = tokio::time::timeout(self.config.control_action_timeout, self.send(packet)).await;
        match outcome {
            Err(_) => Err(OrchestratorError::RedirectTimedOut { action_id: action_id_hint }),
            Ok(Err(e)) => Err(e),
            Ok(Ok(response)) => {
                if response.get("Response").map(String::as_str) == Some("Success") {
                    Ok(())
                } else {
                    Err(OrchestratorError::RedirectRefused {
                        action_id: action_id_hint,
                        reason: response.get("Message").cloned().unwrap_or_default(),
                    })
                }
            }
        }
    }

    pub async fn logoff(&self) {
        let _ = self.send(ActionPacket { action: "Logoff".to_string(), fields: Vec::new() }).await;
        self.connected.store(false, Ordering::Release);
    }

    /// Background task: while disconnected, retry `connect` with
    /// exponential backoff indefinitely. The agent runs in a degraded
    /// (no-transfer) mode while this loop has not yet succeeded.
    pub async fn run_reconnect_loop(self: std::sync::Arc<Self>) {
        let mut attempt = 0u32;
        loop {
            if self.is_connected() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                attempt = 0;
                continue;
            }
            match self.connect().await {
                Ok(()) => {
                    attempt = 0;
                }
                Err(e) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "control channel reconnect failed, backing off");
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_backs_off_and_caps() {
        let retry = RetryConfig { use_jitter: false, ..RetryConfig::default() };
        let d0 = retry.delay_for_attempt(0);
        let d3 = retry.delay_for_attempt(3);
        let d_large = retry.delay_for_attempt(100);
        assert!(d3 > d0);
        assert!(d_large <= retry.max_delay);
    }

    #[test]
    fn action_packet_renders_with_action_id() {
        let packet = ActionPacket {
            action: "Redirect".to_string(),
            fields: vec![("Channel".to_string(), "SIP/1001-1".to_string())],
        };
        let rendered = packet.render("voice-broker-1");
        assert!(rendered.starts_with("Action: Redirect\r\n"));
        assert!(rendered.contains("Channel: SIP/1001-1\r\n"));
        assert!(rendered.ends_with("ActionID: voice-broker-1\r\n\r\n"));
    }
}
