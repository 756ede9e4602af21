//! Topic-pattern rules engine and configuration distribution.
//!
//! The engine subscribes to the broker, matches every inbound message
//! against a static set of MQTT-style topic patterns, and fans each match
//! out to its rule's action list: HTTP forwarding to the backend API,
//! re-publication under a rewritten topic, simulated lambda invocation,
//! and the named configuration-protocol handlers.
//!
//! Rules are loaded once at startup from a YAML file; they are not
//! mutated at runtime.

pub mod config_store;
pub mod engine;
pub mod error;
pub mod loader;
pub mod matcher;
pub mod protocol;
pub mod schema;

pub use config_store::{ConfigDeliveryStatus, ConfigStore, MemoryConfigStore};
pub use engine::RulesEngine;
pub use error::RulesError;
pub use loader::load_rules;
pub use matcher::{subscription_prefixes, topic_matches};
pub use protocol::ConfigProtocol;
pub use schema::{Action, Rule, RulesFile};
