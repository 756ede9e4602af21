//! PUB/SUB transport layer for the ponder fleet.
//!
//! Gateways, the rules engine, and the timeout monitor all talk through a
//! central broker. This crate provides the wire envelope, the ZeroMQ
//! publisher/subscriber pair, the in-repo broker proxy, reconnect-with-
//! backoff, and the worker lifecycle harness shared by the long-running
//! binaries.

pub mod broker;
pub mod error;
pub mod message;
pub mod pubsub;
pub mod reconnect;
pub mod traits;
pub mod transport;
pub mod worker;

pub use broker::{BrokerConfig, EventBroker};
pub use error::MessagingError;
pub use message::Message;
pub use pubsub::{ZmqPublisher, ZmqSubscriber};
pub use reconnect::{with_backoff, BackoffPolicy};
pub use traits::{EventPublisher, EventSubscriber};
pub use transport::Transport;
pub use worker::{Worker, WorkerBuilder, WorkerRunner, WorkerRunnerConfig};
