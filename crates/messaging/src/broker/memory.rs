//! In-process broker with AMQP delivery semantics.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    Acker, BasicProperties, Broker, Channel, Connection, Consumer, Delivery, ExchangeKind,
    ExchangeOptions, QueueOptions, topic_matches,
};
use crate::{MessagingError, Result};

/// A message accepted by the broker, as recorded for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: BasicProperties,
}

#[derive(Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    properties: BasicProperties,
    redelivered: bool,
}

impl StoredMessage {
    fn to_published(&self) -> PublishedMessage {
        PublishedMessage {
            exchange: self.exchange.clone(),
            routing_key: self.routing_key.clone(),
            body: self.body.clone(),
            properties: self.properties.clone(),
        }
    }
}

struct ConsumerSlot {
    channel_id: u64,
    sender: mpsc::UnboundedSender<Delivery>,
}

struct Unacked {
    message: StoredMessage,
    channel_id: u64,
}

struct QueueState {
    options: QueueOptions,
    ready: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
    unacked: HashMap<u64, Unacked>,
}

impl QueueState {
    fn new(options: QueueOptions) -> Self {
        Self {
            options,
            ready: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
            unacked: HashMap::new(),
        }
    }
}

struct Binding {
    exchange: String,
    queue: String,
    routing_key: String,
}

struct ChannelRecord {
    connection_id: u64,
    open: Arc<AtomicBool>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, (ExchangeKind, ExchangeOptions)>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    published: Vec<PublishedMessage>,
    publish_log: bool,
    connections: HashMap<u64, Arc<AtomicBool>>,
    channels: HashMap<u64, ChannelRecord>,
    next_delivery_tag: u64,
    next_id: u64,
    connect_count: usize,
    unavailable: bool,
    fail_on_publish: bool,
}

type Shared = Arc<Mutex<BrokerState>>;

fn lock(shared: &Shared) -> MutexGuard<'_, BrokerState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hands ready messages of `queue_name` to its consumers, round-robin.
fn dispatch(shared: &Shared, state: &mut BrokerState, queue_name: &str) {
    let Some(queue) = state.queues.get_mut(queue_name) else {
        return;
    };

    while !queue.consumers.is_empty() {
        let Some(message) = queue.ready.pop_front() else {
            break;
        };
        let index = queue.next_consumer % queue.consumers.len();
        let channel_id = queue.consumers[index].channel_id;
        let open = match state.channels.get(&channel_id) {
            Some(record) => Arc::clone(&record.open),
            None => {
                queue.consumers.remove(index);
                queue.ready.push_front(message);
                continue;
            }
        };

        state.next_delivery_tag += 1;
        let tag = state.next_delivery_tag;
        let acker = Arc::new(MemoryAcker {
            shared: Arc::clone(shared),
            queue: queue_name.to_string(),
            open,
        });
        let delivery = Delivery::new(
            tag,
            message.exchange.clone(),
            message.routing_key.clone(),
            message.redelivered,
            message.body.clone(),
            message.properties.clone(),
            acker,
        );

        if queue.consumers[index].sender.send(delivery).is_err() {
            queue.consumers.remove(index);
            queue.ready.push_front(message);
            continue;
        }

        queue.unacked.insert(
            tag,
            Unacked {
                message,
                channel_id,
            },
        );
        queue.next_consumer = index + 1;
    }
}

/// Closes a channel: drops its consumers and requeues its unacked deliveries.
fn close_channel(shared: &Shared, state: &mut BrokerState, channel_id: u64) {
    let Some(record) = state.channels.remove(&channel_id) else {
        return;
    };
    record.open.store(false, Ordering::SeqCst);

    let mut touched = Vec::new();
    for (name, queue) in state.queues.iter_mut() {
        queue.consumers.retain(|c| c.channel_id != channel_id);

        let mut returned: Vec<(u64, StoredMessage)> = queue
            .unacked
            .iter()
            .filter(|(_, u)| u.channel_id == channel_id)
            .map(|(tag, u)| (*tag, u.message.clone()))
            .collect();
        if returned.is_empty() {
            continue;
        }
        // Oldest delivery goes back to the head of the queue.
        returned.sort_by_key(|(tag, _)| *tag);
        for (tag, mut message) in returned.into_iter().rev() {
            queue.unacked.remove(&tag);
            message.redelivered = true;
            queue.ready.push_front(message);
        }
        touched.push(name.clone());
    }

    for name in touched {
        dispatch(shared, state, &name);
    }
}

fn close_connection(shared: &Shared, state: &mut BrokerState, connection_id: u64) {
    if let Some(open) = state.connections.remove(&connection_id) {
        open.store(false, Ordering::SeqCst);
    }
    let channel_ids: Vec<u64> = state
        .channels
        .iter()
        .filter(|(_, record)| record.connection_id == connection_id)
        .map(|(id, _)| *id)
        .collect();
    for id in channel_ids {
        close_channel(shared, state, id);
    }
}

/// In-memory broker for tests and single-process deployments.
///
/// Implements topic, direct and fanout exchanges, the default exchange,
/// durable queue declarations, round-robin consumers and ack/nack with
/// requeue. Accepted publishes are recorded for inspection only when built
/// with [`with_publish_log`](Self::with_publish_log).
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Shared,
}

impl InMemoryBroker {
    /// Creates a new broker with no topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a broker that keeps every accepted publish for
    /// [`published`](Self::published). The log is never trimmed.
    pub fn with_publish_log() -> Self {
        let broker = Self::default();
        lock(&broker.shared).publish_log = true;
        broker
    }

    /// Simulates a broker outage: while unavailable every connect fails.
    pub fn set_available(&self, available: bool) {
        lock(&self.shared).unavailable = !available;
    }

    /// Configures the broker to reject publishes.
    pub fn set_fail_on_publish(&self, fail: bool) {
        lock(&self.shared).fail_on_publish = fail;
    }

    /// Closes every open connection, as a broker restart would.
    pub fn drop_connections(&self) {
        let mut state = lock(&self.shared);
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        for id in ids {
            close_connection(&self.shared, &mut state, id);
        }
    }

    /// Returns the number of successful connects.
    pub fn connect_count(&self) -> usize {
        lock(&self.shared).connect_count
    }

    /// Returns every accepted publish, in order. Empty unless the broker was
    /// built with [`with_publish_log`](Self::with_publish_log).
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.shared).published.clone()
    }

    /// Returns accepted publishes addressed to `exchange`.
    pub fn published_to(&self, exchange: &str) -> Vec<PublishedMessage> {
        lock(&self.shared)
            .published
            .iter()
            .filter(|m| m.exchange == exchange)
            .cloned()
            .collect()
    }

    /// Returns the messages waiting in `queue` without consuming them.
    pub fn ready_messages(&self, queue: &str) -> Vec<PublishedMessage> {
        lock(&self.shared)
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(StoredMessage::to_published).collect())
            .unwrap_or_default()
    }

    /// Returns the number of messages waiting in `queue`.
    pub fn queue_depth(&self, queue: &str) -> usize {
        lock(&self.shared)
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Returns the number of delivered but unsettled messages in `queue`.
    pub fn unacked_count(&self, queue: &str) -> usize {
        lock(&self.shared)
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        lock(&self.shared)
            .queues
            .get(queue)
            .map_or(0, |q| q.consumers.len())
    }

    pub fn queue_options(&self, queue: &str) -> Option<QueueOptions> {
        lock(&self.shared).queues.get(queue).map(|q| q.options)
    }

    pub fn exchange(&self, exchange: &str) -> Option<(ExchangeKind, ExchangeOptions)> {
        lock(&self.shared).exchanges.get(exchange).copied()
    }

    pub fn has_binding(&self, queue: &str, exchange: &str, routing_key: &str) -> bool {
        lock(&self.shared)
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.routing_key == routing_key)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        let mut state = lock(&self.shared);
        if state.unavailable {
            return Err(MessagingError::ConnectionFailed(
                "broker unreachable".to_string(),
            ));
        }

        state.next_id += 1;
        let id = state.next_id;
        let open = Arc::new(AtomicBool::new(true));
        state.connections.insert(id, Arc::clone(&open));
        state.connect_count += 1;

        Ok(Arc::new(MemoryConnection {
            id,
            shared: Arc::clone(&self.shared),
            open,
        }))
    }
}

struct MemoryConnection {
    id: u64,
    shared: Shared,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn create_channel(&self) -> Result<Arc<dyn Channel>> {
        if !self.is_open() {
            return Err(MessagingError::NotConnected);
        }

        let mut state = lock(&self.shared);
        state.next_id += 1;
        let id = state.next_id;
        let open = Arc::new(AtomicBool::new(true));
        state.channels.insert(
            id,
            ChannelRecord {
                connection_id: self.id,
                open: Arc::clone(&open),
            },
        );

        Ok(Arc::new(MemoryChannel {
            id,
            shared: Arc::clone(&self.shared),
            open,
        }))
    }

    async fn close(&self) -> Result<()> {
        let mut state = lock(&self.shared);
        close_connection(&self.shared, &mut state, self.id);
        Ok(())
    }
}

struct MemoryChannel {
    id: u64,
    shared: Shared,
    open: Arc<AtomicBool>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MessagingError::ChannelClosed)
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.shared);
        match state.exchanges.get(exchange) {
            Some(existing) if *existing != (kind, options) => {
                Err(MessagingError::PreconditionFailed(format!(
                    "exchange '{exchange}' already declared with different settings"
                )))
            }
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.to_string(), (kind, options));
                Ok(())
            }
        }
    }

    async fn queue_declare(&self, queue: &str, options: QueueOptions) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.shared);
        match state.queues.get(queue) {
            Some(existing) if existing.options != options => {
                Err(MessagingError::PreconditionFailed(format!(
                    "queue '{queue}' already declared with different settings"
                )))
            }
            Some(_) => Ok(()),
            None => {
                state
                    .queues
                    .insert(queue.to_string(), QueueState::new(options));
                Ok(())
            }
        }
    }

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.shared);
        if !state.queues.contains_key(queue) {
            return Err(MessagingError::QueueNotFound(queue.to_string()));
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(MessagingError::ExchangeNotFound(exchange.to_string()));
        }
        let exists = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.routing_key == routing_key);
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: BasicProperties,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.shared);
        if state.fail_on_publish {
            return Err(MessagingError::PublishFailed(
                "broker rejected the message".to_string(),
            ));
        }

        let targets: Vec<String> = if exchange.is_empty() {
            state
                .queues
                .contains_key(routing_key)
                .then(|| vec![routing_key.to_string()])
                .unwrap_or_default()
        } else {
            let (kind, _) = *state
                .exchanges
                .get(exchange)
                .ok_or_else(|| MessagingError::ExchangeNotFound(exchange.to_string()))?;
            let mut targets: Vec<String> = Vec::new();
            for binding in state.bindings.iter().filter(|b| b.exchange == exchange) {
                let matched = match kind {
                    ExchangeKind::Direct => binding.routing_key == routing_key,
                    ExchangeKind::Fanout => true,
                    ExchangeKind::Topic => topic_matches(&binding.routing_key, routing_key),
                };
                if matched && !targets.contains(&binding.queue) {
                    targets.push(binding.queue.clone());
                }
            }
            targets
        };

        let message = StoredMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
            properties,
            redelivered: false,
        };
        if state.publish_log {
            state.published.push(message.to_published());
        }

        for target in targets {
            if let Some(queue) = state.queues.get_mut(&target) {
                queue.ready.push_back(message.clone());
            }
            dispatch(&self.shared, &mut state, &target);
        }
        Ok(())
    }

    async fn basic_consume(&self, queue: &str, consumer_tag: &str) -> Result<Consumer> {
        self.ensure_open()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut state = lock(&self.shared);
            let queue_state = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| MessagingError::QueueNotFound(queue.to_string()))?;
            queue_state.consumers.push(ConsumerSlot {
                channel_id: self.id,
                sender,
            });
            dispatch(&self.shared, &mut state, queue);
        }
        tracing::debug!(queue, consumer_tag, "consumer registered");

        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|delivery| (delivery, receiver))
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<()> {
        let mut state = lock(&self.shared);
        close_channel(&self.shared, &mut state, self.id);
        Ok(())
    }
}

struct MemoryAcker {
    shared: Shared,
    queue: String,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(MessagingError::ChannelClosed);
        }
        let mut state = lock(&self.shared);
        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| MessagingError::QueueNotFound(self.queue.clone()))?;
        queue
            .unacked
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or(MessagingError::UnknownDeliveryTag(delivery_tag))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(MessagingError::ChannelClosed);
        }
        let mut state = lock(&self.shared);
        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| MessagingError::QueueNotFound(self.queue.clone()))?;
        let Unacked { mut message, .. } = queue
            .unacked
            .remove(&delivery_tag)
            .ok_or(MessagingError::UnknownDeliveryTag(delivery_tag))?;

        if requeue {
            message.redelivered = true;
            queue.ready.push_front(message);
            dispatch(&self.shared, &mut state, &self.queue);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn channel(broker: &InMemoryBroker) -> Arc<dyn Channel> {
        let connection = broker.connect().await.unwrap();
        connection.create_channel().await.unwrap()
    }

    async fn declare_bound_queue(channel: &Arc<dyn Channel>, queue: &str, key: &str) {
        channel
            .exchange_declare("events", ExchangeKind::Topic, ExchangeOptions::durable())
            .await
            .unwrap();
        channel
            .queue_declare(queue, QueueOptions::durable())
            .await
            .unwrap();
        channel.queue_bind(queue, "events", key).await.unwrap();
    }

    #[tokio::test]
    async fn test_topic_routing_to_matching_queues_only() {
        let broker = InMemoryBroker::with_publish_log();
        let channel = channel(&broker).await;
        declare_bound_queue(&channel, "placed", "orderplacedevent").await;
        declare_bound_queue(&channel, "cancelled", "ordercancelledevent").await;

        channel
            .basic_publish("events", "orderplacedevent", b"{}".to_vec(), BasicProperties::default())
            .await
            .unwrap();

        assert_eq!(broker.queue_depth("placed"), 1);
        assert_eq!(broker.queue_depth("cancelled"), 0);
        assert_eq!(broker.published_to("events").len(), 1);
    }

    #[tokio::test]
    async fn test_default_exchange_routes_by_queue_name() {
        let broker = InMemoryBroker::new();
        let channel = channel(&broker).await;
        channel
            .queue_declare("direct-q", QueueOptions::durable())
            .await
            .unwrap();

        channel
            .basic_publish("", "direct-q", b"x".to_vec(), BasicProperties::default())
            .await
            .unwrap();

        assert_eq!(broker.queue_depth("direct-q"), 1);
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_exchange_fails() {
        let broker = InMemoryBroker::with_publish_log();
        let channel = channel(&broker).await;
        let result = channel
            .basic_publish("missing", "key", vec![], BasicProperties::default())
            .await;
        assert!(matches!(result, Err(MessagingError::ExchangeNotFound(_))));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_redeclare_with_different_options_fails() {
        let broker = InMemoryBroker::new();
        let channel = channel(&broker).await;
        channel
            .queue_declare("q", QueueOptions::durable())
            .await
            .unwrap();
        let transient = QueueOptions {
            durable: false,
            ..QueueOptions::durable()
        };
        assert!(matches!(
            channel.queue_declare("q", transient).await,
            Err(MessagingError::PreconditionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_ack_removes_and_nack_requeues() {
        let broker = InMemoryBroker::new();
        let channel = channel(&broker).await;
        declare_bound_queue(&channel, "q", "k").await;
        let mut consumer = channel.basic_consume("q", "c1").await.unwrap();

        channel
            .basic_publish("events", "k", b"1".to_vec(), BasicProperties::default())
            .await
            .unwrap();

        let first = consumer.next().await.unwrap();
        assert!(!first.redelivered);
        assert_eq!(broker.unacked_count("q"), 1);

        first.nack(true).await.unwrap();
        let second = consumer.next().await.unwrap();
        assert!(second.redelivered);
        assert_eq!(second.body, b"1".to_vec());

        second.ack().await.unwrap();
        assert_eq!(broker.unacked_count("q"), 0);
        assert_eq!(broker.queue_depth("q"), 0);
        assert!(matches!(
            second.ack().await,
            Err(MessagingError::UnknownDeliveryTag(_))
        ));
    }

    #[tokio::test]
    async fn test_closing_channel_requeues_unacked() {
        let broker = InMemoryBroker::new();
        let publisher = channel(&broker).await;
        declare_bound_queue(&publisher, "q", "k").await;

        let consuming = channel(&broker).await;
        let mut consumer = consuming.basic_consume("q", "c1").await.unwrap();
        publisher
            .basic_publish("events", "k", b"1".to_vec(), BasicProperties::default())
            .await
            .unwrap();
        let _delivery = consumer.next().await.unwrap();

        consuming.close().await.unwrap();

        assert_eq!(broker.unacked_count("q"), 0);
        assert_eq!(broker.queue_depth("q"), 1);
        assert!(consumer.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_broker_refuses_connections() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        assert!(matches!(
            broker.connect().await,
            Err(MessagingError::ConnectionFailed(_))
        ));

        broker.set_available(true);
        let connection = broker.connect().await.unwrap();
        broker.drop_connections();
        assert!(!connection.is_open());
        assert_eq!(broker.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_publishes_are_not_retained_by_default() {
        let broker = InMemoryBroker::new();
        let channel = channel(&broker).await;
        declare_bound_queue(&channel, "q", "k").await;

        for _ in 0..3 {
            channel
                .basic_publish("events", "k", b"1".to_vec(), BasicProperties::default())
                .await
                .unwrap();
        }

        assert_eq!(broker.queue_depth("q"), 3);
        assert!(broker.published().is_empty());
    }
}
