//! Message bus for propagating order lifecycle events to decoupled consumers.
//!
//! This crate provides:
//! - [`Broker`], [`Connection`] and [`Channel`] traits modelling an AMQP-style
//!   broker, plus [`InMemoryBroker`] which implements them in-process
//! - [`ConnectionManager`] owning the single broker connection
//! - [`EventBus`] for topology management, publishing and the
//!   at-least-once consume loop
//! - Bounded retry and dead-lettering into [`FailedMessage`] records,
//!   stored in memory or in PostgreSQL
//! - A processed-message guard that makes redelivered duplicates harmless

pub mod broker;
pub mod bus;
pub mod config;
pub mod connection;
mod consumer;
pub mod dedupe;
pub mod error;
pub mod failed;
pub mod handler;
pub mod postgres;
pub mod retry;

pub use broker::{
    BasicProperties, Broker, Channel, Connection, Consumer, Delivery, DeliveryMode,
    ExchangeKind, ExchangeOptions, InMemoryBroker, PublishedMessage, QueueOptions, topic_matches,
};
pub use bus::EventBus;
pub use config::{BusConfig, ReconnectPolicy};
pub use connection::ConnectionManager;
pub use consumer::Disposition;
pub use dedupe::{InMemoryProcessedMessageStore, ProcessedMessageStore};
pub use error::{MessagingError, Result};
pub use failed::{FailedMessage, FailedMessageStore, InMemoryFailedMessageStore};
pub use handler::{EventHandler, HandlerOutcome};
pub use postgres::PostgresFailedMessageStore;
pub use retry::RetryPolicy;

/// Content type set on every published message.
pub const CONTENT_TYPE_JSON: &str = "application/json";
