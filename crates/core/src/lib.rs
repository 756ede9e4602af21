//! Shared vocabulary for the ponder gateway fleet.
//!
//! This crate holds the pieces every worker needs: topic constants and
//! parsers for the broker namespace, shared settings, and the common
//! error type. Domain logic lives in the `fleet`, `rules`, and `agent`
//! crates.

pub mod config;
pub mod error;
pub mod topics;

pub use config::{BrokerSettings, TimeoutSettings};
pub use error::CoreError;
