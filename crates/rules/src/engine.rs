//! Match-and-dispatch loop.
//!
//! Every inbound broker message is checked against all enabled rules (no
//! first-match short-circuit) and each matching rule's full action list is
//! dispatched as independently scheduled tasks, so a slow HTTP action
//! never blocks subscription delivery. A join gate drains in-flight
//! actions before shutdown completes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use ponder_core::topics;
use ponder_messaging::{EventPublisher, EventSubscriber, Message};

use crate::error::RulesError;
use crate::matcher::{subscription_prefixes, topic_matches};
use crate::protocol::ConfigProtocol;
use crate::schema::{Action, Rule};

/// Shared handles every dispatched action needs.
#[derive(Clone)]
struct ActionContext {
    http: reqwest::Client,
    /// Dedicated publishing connection, kept separate from the
    /// subscribing connection.
    republisher: Arc<dyn EventPublisher>,
    protocol: Arc<ConfigProtocol>,
}

pub struct RulesEngine {
    rules: Vec<Rule>,
    subscriber: Arc<dyn EventSubscriber>,
    ctx: ActionContext,
}

impl RulesEngine {
    pub fn new(
        rules: Vec<Rule>,
        subscriber: Arc<dyn EventSubscriber>,
        republisher: Arc<dyn EventPublisher>,
        protocol: Arc<ConfigProtocol>,
    ) -> Self {
        Self {
            rules,
            subscriber,
            ctx: ActionContext {
                http: reqwest::Client::new(),
                republisher,
                protocol,
            },
        }
    }

    /// Subscribe to the union of all enabled rules' patterns and process
    /// messages until `shutdown` is notified. In-flight actions are
    /// drained before returning.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<(), RulesError> {
        let prefixes = subscription_prefixes(&self.rules);
        if prefixes.is_empty() {
            warn!("no enabled rules, engine will receive nothing");
        }
        for prefix in &prefixes {
            self.subscriber.subscribe(prefix).await?;
        }
        info!(
            rules = self.rules.len(),
            subscriptions = prefixes.len(),
            "rules engine started"
        );

        let mut in_flight: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                received = self.subscriber.recv() => {
                    match received {
                        Ok(message) => self.dispatch_message(message, &mut in_flight),
                        Err(e) => {
                            warn!(error = %e, "failed to receive message");
                        }
                    }
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = shutdown.notified() => {
                    break;
                }
            }
        }

        let pending = in_flight.len();
        if pending > 0 {
            info!(pending, "draining in-flight actions");
        }
        while in_flight.join_next().await.is_some() {}
        info!("rules engine stopped");
        Ok(())
    }

    /// Evaluate all rules against one message and spawn every matching
    /// action.
    fn dispatch_message(&self, message: Message, in_flight: &mut JoinSet<()>) {
        let topic = message.topic.clone();
        let payload = decode_payload(&message.payload);
        debug!(topic = %topic, "evaluating rules");

        for rule in self.rules.iter().filter(|r| r.enabled) {
            if !topic_matches(&rule.topic_pattern, &topic) {
                continue;
            }
            debug!(rule = %rule.name, topic = %topic, "rule matched");

            for action in &rule.actions {
                let ctx = self.ctx.clone();
                let action = action.clone();
                let rule_name = rule.name.clone();
                let topic = topic.clone();
                let payload = payload.clone();
                let raw = message.payload.clone();
                in_flight.spawn(async move {
                    run_action(ctx, &rule_name, action, &topic, payload, raw).await;
                });
            }
        }
    }
}

/// JSON-decode a payload, else wrap the bytes as `{"raw": <text>}`.
/// Malformed payloads are never fatal.
pub(crate) fn decode_payload(bytes: &[u8]) -> Value {
    match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(_) => json!({ "raw": String::from_utf8_lossy(bytes) }),
    }
}

/// Execute one action. All failures are logged and dropped; there is no
/// retry queue and nothing is fed back into the broker.
async fn run_action(
    ctx: ActionContext,
    rule_name: &str,
    action: Action,
    topic: &str,
    payload: Value,
    raw_payload: Vec<u8>,
) {
    match action {
        Action::Http {
            url,
            method,
            headers,
            timeout_secs,
        } => {
            let method = method
                .parse::<reqwest::Method>()
                .unwrap_or(reqwest::Method::POST);
            let body = build_http_body(topic, payload);

            let mut request = ctx
                .http
                .request(method, &url)
                .timeout(Duration::from_secs(timeout_secs))
                .json(&body);
            for (key, value) in &headers {
                request = request.header(key, value);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(rule = %rule_name, url = %url, status = %response.status(), "http action delivered");
                }
                Ok(response) => {
                    warn!(
                        rule = %rule_name,
                        url = %url,
                        status = %response.status(),
                        topic = %topic,
                        "http action rejected, dropping"
                    );
                }
                Err(e) => {
                    warn!(rule = %rule_name, url = %url, topic = %topic, error = %e, "http action failed, dropping");
                }
            }
        }

        Action::Republish { topic: target, qos, retain } => {
            let resolved = resolve_republish_topic(&target, topic);
            debug!(rule = %rule_name, from = %topic, to = %resolved, qos, retain, "republishing");
            let message = Message::raw(resolved, raw_payload);
            if let Err(e) = ctx.republisher.publish(message).await {
                warn!(rule = %rule_name, topic = %topic, error = %e, "republish failed, dropping");
            }
        }

        Action::Lambda { function_name } => {
            // Simulation only.
            info!(
                rule = %rule_name,
                function = %function_name,
                topic = %topic,
                "lambda invocation (simulated)"
            );
        }

        Action::Function { name } => {
            if let Err(e) = ctx.protocol.dispatch(&name, topic, &payload).await {
                warn!(rule = %rule_name, function = %name, topic = %topic, error = %e, "function action failed, dropping");
            }
        }
    }
}

/// Outbound HTTP body: `{topic, payload, timestamp}` plus
/// `gateway_id`/`event_type` parsed out of a `gateway/<id>/<event>` topic
/// when the shape fits.
pub(crate) fn build_http_body(topic: &str, payload: Value) -> Value {
    let mut body = json!({
        "topic": topic,
        "payload": payload,
        "timestamp": Utc::now().to_rfc3339(),
    });
    if let Some((gateway_id, event_type)) = topics::parse_gateway_topic(topic) {
        body["gateway_id"] = json!(gateway_id);
        body["event_type"] = json!(event_type);
    }
    body
}

/// Substitute the `{original_topic}` token in a republish target.
pub(crate) fn resolve_republish_topic(target: &str, original: &str) -> String {
    target.replace("{original_topic}", original)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::MemoryConfigStore;
    use async_trait::async_trait;
    use ponder_messaging::MessagingError;
    use tokio::sync::Mutex;

    struct MockPublisher {
        messages: Mutex<Vec<Message>>,
    }

    impl MockPublisher {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventPublisher for MockPublisher {
        async fn publish(&self, message: Message) -> Result<(), MessagingError> {
            self.messages.lock().await.push(message);
            Ok(())
        }
    }

    fn context(publisher: Arc<MockPublisher>) -> ActionContext {
        ActionContext {
            http: reqwest::Client::new(),
            republisher: publisher.clone(),
            protocol: Arc::new(ConfigProtocol::new(
                Arc::new(MemoryConfigStore::new()),
                publisher,
            )),
        }
    }

    #[test]
    fn malformed_payload_is_wrapped_not_fatal() {
        let decoded = decode_payload(b"not json at all");
        assert_eq!(decoded["raw"], "not json at all");

        let decoded = decode_payload(br#"{"uptime": 3}"#);
        assert_eq!(decoded["uptime"], 3);
    }

    #[test]
    fn http_body_carries_positional_topic_fields() {
        let body = build_http_body("gateway/g1/heartbeat", json!({"uptime": 3}));
        assert_eq!(body["topic"], "gateway/g1/heartbeat");
        assert_eq!(body["gateway_id"], "g1");
        assert_eq!(body["event_type"], "heartbeat");
        assert_eq!(body["payload"]["uptime"], 3);
        assert!(body["timestamp"].is_string());

        let body = build_http_body("control/g1", json!({}));
        assert!(body.get("gateway_id").is_none());
    }

    #[test]
    fn republish_token_substitution() {
        assert_eq!(
            resolve_republish_topic("audit/{original_topic}", "gateway/g1/heartbeat"),
            "audit/gateway/g1/heartbeat"
        );
        assert_eq!(resolve_republish_topic("fixed/topic", "whatever"), "fixed/topic");
    }

    #[tokio::test]
    async fn republish_action_uses_dedicated_publisher() {
        let publisher = Arc::new(MockPublisher::new());
        let ctx = context(publisher.clone());

        run_action(
            ctx,
            "audit",
            Action::Republish {
                topic: "audit/{original_topic}".to_string(),
                qos: 0,
                retain: false,
            },
            "gateway/g1/heartbeat",
            json!({"uptime": 3}),
            br#"{"uptime": 3}"#.to_vec(),
        )
        .await;

        let messages = publisher.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "audit/gateway/g1/heartbeat");
        assert_eq!(messages[0].payload, br#"{"uptime": 3}"#.to_vec());
    }

    #[tokio::test]
    async fn function_action_reaches_the_protocol() {
        let publisher = Arc::new(MockPublisher::new());
        let ctx = context(publisher.clone());
        ctx.protocol
            .handle_new_config(&json!({ "gateway_id": "g1", "yaml_config": "a: 1\n" }))
            .unwrap();

        run_action(
            ctx,
            "config-requests",
            Action::Function {
                name: "handle_config_request".to_string(),
            },
            "gateway/g1/request_config",
            json!({}),
            Vec::new(),
        )
        .await;

        let messages = publisher.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "gateway/g1/config/update");
    }

    #[tokio::test]
    async fn every_matching_rule_fires_no_short_circuit() {
        let publisher = Arc::new(MockPublisher::new());
        let protocol = Arc::new(ConfigProtocol::new(
            Arc::new(MemoryConfigStore::new()),
            publisher.clone(),
        ));

        let rules = vec![
            Rule {
                name: "first".to_string(),
                description: String::new(),
                topic_pattern: "gateway/+/heartbeat".to_string(),
                enabled: true,
                actions: vec![Action::Republish {
                    topic: "audit/{original_topic}".to_string(),
                    qos: 0,
                    retain: false,
                }],
            },
            Rule {
                name: "second".to_string(),
                description: String::new(),
                topic_pattern: "gateway/g1/#".to_string(),
                enabled: true,
                actions: vec![Action::Republish {
                    topic: "mirror/{original_topic}".to_string(),
                    qos: 0,
                    retain: false,
                }],
            },
            Rule {
                name: "disabled".to_string(),
                description: String::new(),
                topic_pattern: "#".to_string(),
                enabled: false,
                actions: vec![Action::Republish {
                    topic: "never".to_string(),
                    qos: 0,
                    retain: false,
                }],
            },
        ];

        struct NullSubscriber;
        #[async_trait]
        impl EventSubscriber for NullSubscriber {
            async fn subscribe(&self, _prefix: &str) -> Result<(), MessagingError> {
                Ok(())
            }
            async fn recv(&self) -> Result<Message, MessagingError> {
                std::future::pending().await
            }
        }

        let engine = RulesEngine::new(
            rules,
            Arc::new(NullSubscriber),
            publisher.clone(),
            protocol,
        );

        let mut in_flight = JoinSet::new();
        engine.dispatch_message(
            Message::json("gateway/g1/heartbeat", &json!({"uptime": 1})).unwrap(),
            &mut in_flight,
        );
        while in_flight.join_next().await.is_some() {}

        let messages = publisher.messages.lock().await;
        let mut topics: Vec<&str> = messages.iter().map(|m| m.topic.as_str()).collect();
        topics.sort();
        assert_eq!(
            topics,
            vec!["audit/gateway/g1/heartbeat", "mirror/gateway/g1/heartbeat"]
        );
    }
}
