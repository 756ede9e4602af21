//! Shared worker settings.
//!
//! Every worker needs to find the broker; the timeout monitor additionally
//! needs its polling cadence. Settings come from a TOML file when one is
//! given, with environment variables (loaded via `dotenvy`) overriding
//! individual fields. Binaries expose the same knobs as clap flags.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Where to reach the broker's frontend (publish) and backend (subscribe)
/// sockets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Broker host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Frontend port — publishers connect here.
    #[serde(default = "default_frontend_port")]
    pub frontend_port: u16,
    /// Backend port — subscribers connect here.
    #[serde(default = "default_backend_port")]
    pub backend_port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_frontend_port() -> u16 {
    5555
}

fn default_backend_port() -> u16 {
    5556
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            frontend_port: default_frontend_port(),
            backend_port: default_backend_port(),
        }
    }
}

impl BrokerSettings {
    /// Build settings from `PONDER_BROKER_HOST` / `PONDER_BROKER_FRONTEND_PORT`
    /// / `PONDER_BROKER_BACKEND_PORT`, falling back to defaults.
    pub fn from_env() -> Result<Self, CoreError> {
        // Best-effort .env loading; absence is not an error.
        let _ = dotenvy::dotenv();

        let mut settings = Self::default();
        if let Ok(host) = std::env::var("PONDER_BROKER_HOST") {
            settings.host = host;
        }
        if let Ok(port) = std::env::var("PONDER_BROKER_FRONTEND_PORT") {
            settings.frontend_port = port
                .parse()
                .map_err(|_| CoreError::Config(format!("invalid frontend port: {port}")))?;
        }
        if let Ok(port) = std::env::var("PONDER_BROKER_BACKEND_PORT") {
            settings.backend_port = port
                .parse()
                .map_err(|_| CoreError::Config(format!("invalid backend port: {port}")))?;
        }
        Ok(settings)
    }
}

/// Cadence and threshold for the timeout monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutSettings {
    /// Seconds between read-model scans.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Seconds of heartbeat silence before a gateway is declared gone.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    120
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

/// A worker's file-based settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub timeout: TimeoutSettings,
}

impl WorkerSettings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}
