//! TCP/WebSocket accept loop for the AI session server (spec.md §4.4,
//! component C4). Each accepted connection is handed to
//! [`crate::connection::handle_connection`] on its own task.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::SessionServerConfig;
use crate::connection::handle_connection;
use crate::providers::ProviderBundle;

pub struct AiSessionServer {
    config: Arc<SessionServerConfig>,
    providers: ProviderBundle,
}

impl AiSessionServer {
    pub fn new(config: SessionServerConfig, providers: ProviderBundle) -> Self {
        Self { config: Arc::new(config), providers }
    }

    /// Bind and accept ASP connections until the listener errs or the
    /// process is asked to shut down (caller wraps this in `tokio::select!`
    /// against a shutdown signal).
    pub async fn run(&self, bind_addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        info!(bind_addr, "AI session server listening for ASP connections");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed, continuing");
                    continue;
                }
            };

            let config = self.config.clone();
            let providers = self.providers.clone();
            tokio::spawn(async move {
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => {
                        info!(%peer, "accepted ASP connection");
                        handle_connection(ws, config, providers).await;
                    }
                    Err(e) => {
                        error!(%peer, error = %e, "WebSocket handshake failed");
                    }
                }
            });
        }
    }
}
