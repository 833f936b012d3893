//! Orchestrator configuration, assembled from environment variables
//! (`AMI_*`, `T_CTL_MS`, `N_REG_RETRIES`, `TRANSFER_CONTEXT`).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub ami_host: String,
    pub ami_port: u16,
    pub ami_username: String,
    pub ami_secret: String,

    /// Dialplan context a `Redirect` moves the caller channel into
    /// (spec.md §8 scenario 3: `"transfer-assistida"`).
    pub transfer_context: String,

    /// `T_ctl` — deadline for a Redirect's asynchronous response.
    pub control_action_timeout: Duration,

    /// Bound on SIP registration retry attempts before giving up.
    pub n_reg_retries: u32,

    pub reg_retry_base_delay: Duration,
    pub reg_retry_max_delay: Duration,
}

impl OrchestratorConfig {
    /// Build from environment. `AMI_HOST`/`AMI_PORT`/`AMI_USERNAME`/
    /// `AMI_SECRET` are required (spec.md §6.6); everything else defaults.
    pub fn from_env() -> Result<Self, String> {
        let ami_host = std::env::var("AMI_HOST").map_err(|_| "AMI_HOST is required".to_string())?;
        let ami_port = std::env::var("AMI_PORT")
            .map_err(|_| "AMI_PORT is required".to_string())?
            .parse()
            .map_err(|_| "AMI_PORT must be a u16".to_string())?;
        let ami_username =
            std::env::var("AMI_USERNAME").map_err(|_| "AMI_USERNAME is required".to_string())?;
        let ami_secret = std::env::var("AMI_SECRET").map_err(|_| "AMI_SECRET is required".to_string())?;

        let mut config = Self {
            ami_host,
            ami_port,
            ami_username,
            ami_secret,
            transfer_context: std::env::var("TRANSFER_CONTEXT")
                .unwrap_or_else(|_| "transfer-assistida".to_string()),
            control_action_timeout: Duration::from_secs(
                env_u64("T_CTL_MS").map(|ms| ms / 1000).unwrap_or(10),
            ),
            n_reg_retries: env_u64("N_REG_RETRIES").unwrap_or(5) as u32,
            reg_retry_base_delay: Duration::from_millis(200),
            reg_retry_max_delay: Duration::from_secs(30),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&mut self) -> Result<(), String> {
        if self.ami_host.is_empty() {
            return Err("AMI_HOST must not be empty".to_string());
        }
        if self.transfer_context.is_empty() {
            return Err("TRANSFER_CONTEXT must not be empty".to_string());
        }
        Ok(())
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_host() {
        let mut config = OrchestratorConfig {
            ami_host: String::new(),
            ami_port: 5038,
            ami_username: "agent".into(),
            ami_secret: "secret".into(),
            transfer_context: "transfer-assistida".into(),
            control_action_timeout: Duration::from_secs(10),
            n_reg_retries: 5,
            reg_retry_base_delay: Duration::from_millis(200),
            reg_retry_max_delay: Duration::from_secs(30),
        };
        assert!(config.validate().is_err());
    }
}
