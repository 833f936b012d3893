//! Entry point: wires the PBX control channel, the SIP-driven call
//! orchestrator, and the AI session server together into one running
//! agent (spec.md §1 system overview, component wiring for C1-C4).
//!
//! SIP/RTP signaling itself is out of scope here: a pjsua2-style SIP
//! stack is assumed to run alongside this process and translate its
//! callbacks into [`voice_call_orchestrator::call::SipEvent`]s fed to the
//! orchestrator; this binary owns only the control channel, the call
//! state machine, and the conversational pipeline.

mod config;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use voice_ai_session_server::prelude::{AiSessionServer, ProviderBundle, SessionServerConfig};
use voice_call_orchestrator::prelude::{AmiClient, CallOrchestrator, OrchestratorConfig};

use crate::config::BrokerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let broker_config = BrokerConfig::from_env();
    let orchestrator_config = OrchestratorConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let session_config = SessionServerConfig::from_env();

    info!(
        asp_bind_addr = %broker_config.asp_bind_addr,
        ami_host = %orchestrator_config.ami_host,
        "voice-broker starting"
    );

    let ami = Arc::new(AmiClient::new(orchestrator_config));
    if let Err(e) = ami.connect().await {
        warn!(error = %e, "initial control-channel connect failed, retrying in background");
    }
    let reconnect_handle = tokio::spawn(ami.clone().run_reconnect_loop());

    // Constructed and ready to receive SipEvents from the external SIP
    // stack's callback bridge; that bridge (and the ASP client carrying
    // C4's call.action messages to it) is outside this workspace.
    let _orchestrator = Arc::new(CallOrchestrator::new(ami.clone()));

    // No remote STT/LLM/TTS endpoint is configured by default; the local
    // stub keeps the pipeline runnable end to end without external
    // services. Wiring a `RemoteSttClient`/`RemoteLlmClient`/`RemoteTtsClient`
    // in here is the integration point for a real deployment.
    let providers = ProviderBundle::local_stub();
    let session_server = AiSessionServer::new(session_config, providers);

    tokio::select! {
        result = session_server.run(&broker_config.asp_bind_addr) => {
            if let Err(e) = result {
                error!(error = %e, "AI session server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    reconnect_handle.abort();
    ami.logoff().await;
    info!("voice-broker stopped");
    Ok(())
}
