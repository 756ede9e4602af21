//! End-to-end configuration distribution: store, request, verbatim
//! republish, acknowledgment.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;

use ponder_messaging::{EventPublisher, EventSubscriber, Message, MessagingError};
use ponder_rules::{
    Action, ConfigDeliveryStatus, ConfigProtocol, MemoryConfigStore, Rule, RulesEngine,
};

struct CapturingPublisher {
    messages: Mutex<Vec<Message>>,
}

impl CapturingPublisher {
    fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    async fn published(&self) -> Vec<Message> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for CapturingPublisher {
    async fn publish(&self, message: Message) -> Result<(), MessagingError> {
        self.messages.lock().await.push(message);
        Ok(())
    }
}

/// Feeds a fixed message sequence, then blocks forever.
struct ScriptedSubscriber {
    queue: Mutex<Vec<Message>>,
    drained: Arc<Notify>,
}

impl ScriptedSubscriber {
    fn new(messages: Vec<Message>) -> Self {
        let mut queue = messages;
        queue.reverse();
        Self {
            queue: Mutex::new(queue),
            drained: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl EventSubscriber for ScriptedSubscriber {
    async fn subscribe(&self, _prefix: &str) -> Result<(), MessagingError> {
        Ok(())
    }

    async fn recv(&self) -> Result<Message, MessagingError> {
        let next = self.queue.lock().await.pop();
        match next {
            Some(message) => Ok(message),
            None => {
                // notify_one stores a permit, so the test cannot miss the
                // drain signal even if it has not started waiting yet.
                self.drained.notify_one();
                std::future::pending().await
            }
        }
    }
}

fn protocol_with_publisher() -> (Arc<ConfigProtocol>, Arc<CapturingPublisher>) {
    let publisher = Arc::new(CapturingPublisher::new());
    let protocol = Arc::new(ConfigProtocol::new(
        Arc::new(MemoryConfigStore::new()),
        publisher.clone(),
    ));
    (protocol, publisher)
}

#[tokio::test]
async fn stored_yaml_is_republished_byte_identical() {
    let (protocol, publisher) = protocol_with_publisher();
    let yaml = "devices:\n  count: 3\n";

    protocol
        .handle_new_config(&json!({ "gateway_id": "g1", "yaml_config": yaml }))
        .unwrap();
    protocol
        .handle_config_request("gateway/g1/request_config")
        .await
        .unwrap();

    let published = publisher.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "gateway/g1/config/update");
    assert_eq!(published[0].payload, yaml.as_bytes());
}

#[tokio::test]
async fn unknown_gateway_request_produces_no_publish() {
    let (protocol, publisher) = protocol_with_publisher();
    protocol
        .handle_config_request("gateway/ghost/request_config")
        .await
        .unwrap();
    assert!(publisher.published().await.is_empty());
}

#[tokio::test]
async fn full_exchange_through_the_engine() {
    // Agent traffic arrives through the rules engine: a request_config
    // message triggers the function action, then the delivered ack
    // completes the status lifecycle.
    let publisher = Arc::new(CapturingPublisher::new());
    let protocol = Arc::new(ConfigProtocol::new(
        Arc::new(MemoryConfigStore::new()),
        publisher.clone(),
    ));
    protocol
        .handle_new_config(&json!({ "gateway_id": "g1", "yaml_config": "devices:\n  count: 3\n" }))
        .unwrap();

    let rules = vec![
        Rule {
            name: "config-requests".to_string(),
            description: String::new(),
            topic_pattern: "gateway/+/request_config".to_string(),
            enabled: true,
            actions: vec![Action::Function {
                name: "handle_config_request".to_string(),
            }],
        },
        Rule {
            name: "config-delivered".to_string(),
            description: String::new(),
            topic_pattern: "gateway/+/config/delivered".to_string(),
            enabled: true,
            actions: vec![Action::Function {
                name: "handle_config_delivered".to_string(),
            }],
        },
    ];

    let subscriber = Arc::new(ScriptedSubscriber::new(vec![
        Message::json("gateway/g1/request_config", &json!({ "timestamp": 1 })).unwrap(),
        Message::json(
            "gateway/g1/config/delivered",
            &json!({ "status": "success", "timestamp": 2 }),
        )
        .unwrap(),
    ]));
    let drained = subscriber.drained.clone();

    let engine = Arc::new(RulesEngine::new(
        rules,
        subscriber,
        publisher.clone(),
        protocol.clone(),
    ));

    let shutdown = Arc::new(Notify::new());
    let mut tasks = JoinSet::new();
    {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move { engine.run(shutdown).await });
    }

    // Wait until the scripted messages are consumed, then give the spawned
    // actions a moment to land before shutting down.
    tokio::time::timeout(std::time::Duration::from_secs(5), drained.notified())
        .await
        .expect("subscriber should drain");
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    shutdown.notify_waiters();
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let published = publisher.published().await;
    assert_eq!(published.len(), 1, "exactly one config update published");
    assert_eq!(published[0].topic, "gateway/g1/config/update");
    assert_eq!(published[0].payload, b"devices:\n  count: 3\n".to_vec());
    assert_eq!(
        protocol.store().status("g1"),
        ConfigDeliveryStatus::Completed
    );
}
