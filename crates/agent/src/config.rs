//! Agent settings: TOML file with environment-variable overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ponder_core::config::BrokerSettings;

use crate::error::AgentError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identity of this gateway. Immutable for the life of the process.
    pub gateway_id: String,

    #[serde(default)]
    pub broker: BrokerSettings,

    /// Path of the TLS client certificate whose presence gates the
    /// "online" status report.
    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,

    /// Seconds between heartbeats.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Milliseconds to wait after subscribing before the first
    /// configuration request, so the subscriptions can settle.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_cert_path() -> PathBuf {
    PathBuf::from("certs/client.crt")
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_settle_delay_ms() -> u64 {
    500
}

impl AgentConfig {
    pub fn new(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            broker: BrokerSettings::default(),
            cert_path: default_cert_path(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }

    /// Load settings from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: AgentConfig = toml::from_str(&contents)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Build settings from the environment alone. `PONDER_GATEWAY_ID` is
    /// required.
    pub fn from_env() -> Result<Self, AgentError> {
        let _ = dotenvy::dotenv();
        let gateway_id = std::env::var("PONDER_GATEWAY_ID")
            .map_err(|_| AgentError::Config("PONDER_GATEWAY_ID is not set".to_string()))?;
        let mut config = Self::new(gateway_id);
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), AgentError> {
        if let Ok(host) = std::env::var("PONDER_BROKER_HOST") {
            self.broker.host = host;
        }
        if let Ok(port) = std::env::var("PONDER_BROKER_FRONTEND_PORT") {
            self.broker.frontend_port = port
                .parse()
                .map_err(|_| AgentError::Config(format!("invalid frontend port: {port}")))?;
        }
        if let Ok(port) = std::env::var("PONDER_BROKER_BACKEND_PORT") {
            self.broker.backend_port = port
                .parse()
                .map_err(|_| AgentError::Config(format!("invalid backend port: {port}")))?;
        }
        if let Ok(path) = std::env::var("PONDER_CERT_PATH") {
            self.cert_path = PathBuf::from(path);
        }
        if let Ok(secs) = std::env::var("PONDER_HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval_secs = secs
                .parse()
                .map_err(|_| AgentError::Config(format!("invalid heartbeat interval: {secs}")))?;
        }
        Ok(())
    }
}
