use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MessagingError;
use crate::message::Message;

/// Publishes messages to one or more subscribers via PUB/SUB.
///
/// The rules engine holds two of these: one for the subscription side's
/// outbound traffic and a dedicated one for republish actions, so a
/// republish burst can never couple back into message consumption.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a message. Subscribers filter by the message's topic.
    async fn publish(&self, message: Message) -> Result<(), MessagingError>;
}

/// Blanket implementation so `Arc<dyn EventPublisher>` can be used directly.
#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, message: Message) -> Result<(), MessagingError> {
        (**self).publish(message).await
    }
}

/// Subscribes to messages matching topic prefixes via PUB/SUB.
///
/// Transport-level filtering is prefix-only; exact MQTT-wildcard matching
/// happens above this trait in the rules engine.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to messages with topics matching the given prefix.
    /// An empty string subscribes to all topics.
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), MessagingError>;

    /// Receive the next message. Blocks until a message is available.
    async fn recv(&self) -> Result<Message, MessagingError>;
}
