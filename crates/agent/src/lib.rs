//! Edge-side gateway agent.
//!
//! The agent runs on (or simulates) a gateway device: it watches for a
//! TLS client certificate, connects to the broker with automatic backoff,
//! sends periodic heartbeats, pulls its YAML configuration through the
//! request/update/delivered exchange, and drives a fleet of simulated
//! measurement devices that converges to whatever the active
//! configuration declares.

pub mod agent;
pub mod certificate;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway_config;
pub mod manager;

pub use agent::GatewayAgent;
pub use certificate::CertificateMonitor;
pub use config::AgentConfig;
pub use device::SimulatedDevice;
pub use error::AgentError;
pub use gateway_config::GatewayConfig;
pub use manager::{ConvergenceReport, DeviceManager};
