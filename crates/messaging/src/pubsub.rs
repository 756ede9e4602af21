use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use crate::error::MessagingError;
use crate::message::Message;
use crate::traits::{EventPublisher, EventSubscriber};
use crate::transport::Transport;

/// ZeroMQ PUB socket publisher that connects to the broker's frontend.
///
/// Messages are sent as two-frame ZMQ messages:
/// 1. Topic string (used by SUB sockets for prefix filtering)
/// 2. MessagePack-encoded [`Message`] envelope
pub struct ZmqPublisher {
    socket: Mutex<PubSocket>,
}

impl ZmqPublisher {
    /// Connect a publisher to the broker's frontend endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, MessagingError> {
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting PUB socket to broker frontend");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Bind a publisher to the given endpoint.
    ///
    /// Use this for direct PUB/SUB without a broker (publisher binds,
    /// subscribers connect) — handy in tests.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, MessagingError> {
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding PUB socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl EventPublisher for ZmqPublisher {
    /// Publish a message as a two-frame ZMQ message: [topic, envelope].
    async fn publish(&self, message: Message) -> Result<(), MessagingError> {
        let topic = message.topic.clone();
        let envelope_bytes = message.to_bytes()?;

        let mut zmq_msg = ZmqMessage::from(topic.as_str());
        zmq_msg.push_back(envelope_bytes.into());

        let mut socket = self.socket.lock().await;
        socket.send(zmq_msg).await?;

        debug!(topic = %topic, "published message");
        Ok(())
    }
}

/// ZeroMQ SUB socket subscriber that connects to the broker's backend.
///
/// Receives the two-frame [topic, envelope] messages produced by
/// [`ZmqPublisher`].
pub struct ZmqSubscriber {
    socket: Mutex<SubSocket>,
}

impl ZmqSubscriber {
    /// Connect a subscriber to the broker's backend endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, MessagingError> {
        let mut socket = SubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting SUB socket to broker backend");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl EventSubscriber for ZmqSubscriber {
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), MessagingError> {
        let mut socket = self.socket.lock().await;
        socket.subscribe(topic_prefix).await?;
        info!(topic_prefix = %topic_prefix, "subscribed to topic prefix");
        Ok(())
    }

    /// Receive the next message. Expects [topic, envelope] frames; falls
    /// back to treating a lone frame as the envelope.
    async fn recv(&self) -> Result<Message, MessagingError> {
        let mut socket = self.socket.lock().await;
        let zmq_msg = socket.recv().await?;

        let frames: Vec<_> = zmq_msg.iter().collect();

        if frames.len() >= 2 {
            let message = Message::from_bytes(frames[1].as_ref())?;
            debug!(topic = %message.topic, "received message");
            Ok(message)
        } else if !frames.is_empty() {
            let message = Message::from_bytes(frames[0].as_ref())?;
            debug!(topic = %message.topic, "received single-frame message");
            Ok(message)
        } else {
            Err(MessagingError::Transport("empty ZMQ message".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zmq_message_two_frame_construction() {
        let topic = "gateway/g1/heartbeat";
        let payload_bytes = b"test-payload";

        let mut msg = ZmqMessage::from(topic);
        msg.push_back(payload_bytes.to_vec().into());

        let frames: Vec<_> = msg.iter().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), topic.as_bytes());
        assert_eq!(frames[1].as_ref(), payload_bytes);
    }

    #[tokio::test]
    async fn direct_pub_sub_roundtrip() {
        // Direct PUB/SUB without broker: publisher binds, subscriber connects.
        let transport = Transport::tcp("127.0.0.1", 16700);

        let publisher = ZmqPublisher::bind(&transport).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let subscriber = ZmqSubscriber::connect(&transport).await.unwrap();
        subscriber.subscribe("gateway/").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let msg = Message::json("gateway/g1/heartbeat", &serde_json::json!({"uptime": 1})).unwrap();
        let correlation_id = msg.correlation_id;
        publisher.publish(msg).await.unwrap();

        let received =
            tokio::time::timeout(std::time::Duration::from_secs(2), subscriber.recv())
                .await
                .expect("timed out waiting for message")
                .unwrap();

        assert_eq!(received.topic, "gateway/g1/heartbeat");
        assert_eq!(received.correlation_id, correlation_id);
    }

    #[tokio::test]
    async fn prefix_filtering_works() {
        // Subscriber should only receive messages matching its prefix.
        let transport = Transport::tcp("127.0.0.1", 16701);

        let publisher = ZmqPublisher::bind(&transport).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let subscriber = ZmqSubscriber::connect(&transport).await.unwrap();
        subscriber.subscribe("gateway/g1/").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let wanted = Message::raw("gateway/g1/heartbeat", b"{}".to_vec());
        let wanted_id = wanted.correlation_id;
        publisher.publish(wanted).await.unwrap();

        let filtered = Message::raw("gateway/g2/heartbeat", b"{}".to_vec());
        publisher.publish(filtered).await.unwrap();

        let received =
            tokio::time::timeout(std::time::Duration::from_secs(2), subscriber.recv())
                .await
                .expect("timed out")
                .unwrap();

        assert_eq!(received.topic, "gateway/g1/heartbeat");
        assert_eq!(received.correlation_id, wanted_id);

        let timeout_result =
            tokio::time::timeout(std::time::Duration::from_millis(300), subscriber.recv()).await;
        assert!(timeout_result.is_err(), "should not receive filtered message");
    }
}
