//! Event-sourced gateway lifecycle management.
//!
//! A gateway's status is never stored as mutable truth: it is derived by
//! folding the gateway's append-only event log, in version order, from an
//! empty initial state. This crate provides:
//! - the event log contract ([`store::EventStore`]) with in-memory and
//!   PostgreSQL implementations
//! - the pure [`aggregate::GatewayAggregate`] fold
//! - the queryable read-model projection kept in sync after every applied
//!   event
//! - the timeout monitor that synthesizes disconnect events for gateways
//!   that stopped heartbeating

pub mod aggregate;
pub mod error;
pub mod event;
pub mod monitor;
pub mod projector;
pub mod read_model;
pub mod store;

pub use aggregate::{CertificateInfo, CertificateStatus, GatewayAggregate, GatewayState};
pub use error::FleetError;
pub use event::{EventRecord, EventType, NewEvent};
pub use monitor::TimeoutMonitor;
pub use projector::Projector;
pub use read_model::{GatewayRecord, HealthLabel, MemoryReadModel, ReadModel};
pub use store::{EventStore, MemoryEventStore};
