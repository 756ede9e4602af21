//! Rule document schema with serde deserialization.
//!
//! A rules file is a single YAML document with a top-level `rules` list.
//! Each rule carries one topic pattern and an ordered action list; actions
//! are a closed tagged union dispatched on the `type` field.
//!
//! ```yaml
//! rules:
//!   - name: forward-heartbeats
//!     description: push gateway heartbeats into the backend API
//!     topic_pattern: gateway/+/heartbeat
//!     enabled: true
//!     actions:
//!       - type: http
//!         url: http://localhost:8080/api/gateways/events
//!       - type: republish
//!         topic: audit/{original_topic}
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level rules document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesFile {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// One topic-pattern rule with its ordered action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// MQTT-style pattern: `+` matches one segment, a trailing `/#`
    /// matches the remaining segments, bare `#` matches everything.
    pub topic_pattern: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub actions: Vec<Action>,
}

fn default_enabled() -> bool {
    true
}

/// Side-effecting action dispatched for every rule match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Forward the message to an HTTP endpoint.
    Http {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },

    /// Re-publish the payload under a rewritten topic. The target may
    /// contain the `{original_topic}` substitution token.
    Republish {
        topic: String,
        #[serde(default)]
        qos: u8,
        #[serde(default)]
        retain: bool,
    },

    /// Simulated remote-function invocation (logged, never executed).
    Lambda { function_name: String },

    /// Named in-process handler, e.g. the configuration protocol.
    Function { name: String },
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Action {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Http { .. } => "http",
            Action::Republish { .. } => "republish",
            Action::Lambda { .. } => "lambda",
            Action::Function { .. } => "function",
        }
    }
}
