//! Broker abstraction modelled on AMQP 0-9-1.
//!
//! A [`Broker`] hands out [`Connection`]s, a connection hands out
//! [`Channel`]s, and all topology, publishing and consuming happens on a
//! channel. Deliveries must be settled with [`Delivery::ack`] or
//! [`Delivery::nack`]; an unsettled delivery is returned to its queue when
//! the channel closes.

mod memory;
mod topic;

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;

use crate::Result;

pub use memory::{InMemoryBroker, PublishedMessage};
pub use topic::topic_matches;

/// Routing behaviour of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Routes on exact routing-key equality.
    Direct,
    /// Routes to every bound queue.
    Fanout,
    /// Routes on dotted-word patterns with `*` and `#` wildcards.
    Topic,
}

/// Exchange declaration flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub durable: bool,
    pub auto_delete: bool,
}

impl ExchangeOptions {
    /// A durable exchange that survives broker restarts.
    pub fn durable() -> Self {
        Self {
            durable: true,
            auto_delete: false,
        }
    }
}

/// Queue declaration flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueOptions {
    /// A durable, shared, long-lived queue.
    pub fn durable() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// Whether the broker must write the message to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    Transient,
    Persistent,
}

/// Message properties travelling alongside the body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicProperties {
    pub content_type: Option<String>,
    pub delivery_mode: DeliveryMode,
    pub message_id: Option<String>,
    pub message_type: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub headers: BTreeMap<String, String>,
}

impl BasicProperties {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn persistent(mut self) -> Self {
        self.delivery_mode = DeliveryMode::Persistent;
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Returns a header value, if present.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Settles deliveries on behalf of the channel that received them.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
}

/// A message handed to a consumer.
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub body: Vec<u8>,
    pub properties: BasicProperties,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        redelivered: bool,
        body: Vec<u8>,
        properties: BasicProperties,
        acker: Arc<dyn Acker>,
    ) -> Self {
        Self {
            delivery_tag,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered,
            body,
            properties,
            acker,
        }
    }

    /// Positively acknowledges the delivery; the broker forgets the message.
    pub async fn ack(&self) -> Result<()> {
        self.acker.ack(self.delivery_tag).await
    }

    /// Negatively acknowledges the delivery.
    ///
    /// With `requeue` the broker redelivers the message, otherwise it is
    /// discarded.
    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(self.delivery_tag, requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .field("properties", &self.properties)
            .finish()
    }
}

/// Stream of deliveries for one consumer. Ends when the channel closes.
pub type Consumer = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Entry point to a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Opens a new connection.
    async fn connect(&self) -> Result<Arc<dyn Connection>>;
}

/// An open connection to the broker.
#[async_trait]
pub trait Connection: Send + Sync {
    fn is_open(&self) -> bool;

    /// Opens a new channel multiplexed over this connection.
    async fn create_channel(&self) -> Result<Arc<dyn Channel>>;

    /// Closes the connection and every channel opened on it.
    async fn close(&self) -> Result<()>;
}

/// A lightweight session on a connection.
///
/// Channels are not safe for interleaved use from several tasks; callers
/// sharing one must serialise access.
#[async_trait]
pub trait Channel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<()>;

    async fn queue_declare(&self, queue: &str, options: QueueOptions) -> Result<()>;

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Publishes a message. The empty exchange name addresses the default
    /// exchange, which routes directly to the queue named by `routing_key`.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: BasicProperties,
    ) -> Result<()>;

    async fn basic_consume(&self, queue: &str, consumer_tag: &str) -> Result<Consumer>;

    /// Closes the channel, returning its unacknowledged deliveries to their queues.
    async fn close(&self) -> Result<()>;
}
