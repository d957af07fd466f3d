//! Topology management, publishing and subscriptions.

use std::marker::PhantomData;
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;

use chrono::Utc;
use domain::DomainEvent;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::consumer::ConsumerWorker;
use crate::{
    BasicProperties, BusConfig, CONTENT_TYPE_JSON, Channel, ConnectionManager, EventHandler,
    ExchangeKind, ExchangeOptions, FailedMessageStore, MessagingError, ProcessedMessageStore,
    QueueOptions, Result,
};

/// Publishes events to one topic exchange and runs subscriptions against it.
///
/// Publishes share a single channel guarded by an async lock. Each
/// subscription gets its own channel and consume task. Subscriptions are
/// remembered so [`recover`](Self::recover) can restart them after the
/// broker drops the connection.
pub struct EventBus {
    connection: Arc<ConnectionManager>,
    config: BusConfig,
    publish_channel: Mutex<Option<Arc<dyn Channel>>>,
    failed_store: Arc<dyn FailedMessageStore>,
    processed_store: Arc<dyn ProcessedMessageStore>,
    shutdown: CancellationToken,
    subscriptions: std::sync::Mutex<Vec<SubscriptionSlot>>,
    consumer_stopped: Arc<Notify>,
    supervisor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// A subscription that can be (re)attached to a fresh channel.
#[async_trait]
trait Attach: Send + Sync {
    async fn attach(&self, bus: &EventBus) -> Result<JoinHandle<()>>;
}

struct Subscription<T, H> {
    queue: String,
    routing_key: String,
    handler: Arc<H>,
    _message: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, H> Attach for Subscription<T, H>
where
    T: DeserializeOwned + Send + Sync + 'static,
    H: EventHandler<T> + 'static,
{
    async fn attach(&self, bus: &EventBus) -> Result<JoinHandle<()>> {
        bus.start_consumer::<T, H>(&self.queue, &self.routing_key, Arc::clone(&self.handler))
            .await
    }
}

struct SubscriptionSlot {
    subscription: Arc<dyn Attach>,
    consumer: Option<JoinHandle<()>>,
}

impl EventBus {
    pub fn new(
        connection: Arc<ConnectionManager>,
        config: BusConfig,
        failed_store: Arc<dyn FailedMessageStore>,
        processed_store: Arc<dyn ProcessedMessageStore>,
    ) -> Self {
        Self {
            connection,
            config,
            publish_channel: Mutex::new(None),
            failed_store,
            processed_store,
            shutdown: CancellationToken::new(),
            subscriptions: std::sync::Mutex::new(Vec::new()),
            consumer_stopped: Arc::new(Notify::new()),
            supervisor: std::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Connects if needed, opens the publish channel and declares the
    /// exchanges. Calling it again replaces the publish channel.
    #[tracing::instrument(skip(self, cancel), fields(exchange = %self.config.exchange))]
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        if !self.connection.is_connected() && !self.connection.try_connect(cancel).await {
            return Err(MessagingError::NotConnected);
        }

        let channel = self.connection.create_channel().await?;
        self.declare_exchanges(&channel).await?;

        let previous = self.publish_channel.lock().await.replace(channel);
        if let Some(previous) = previous
            && let Err(error) = previous.close().await
        {
            tracing::debug!(%error, "error closing previous publish channel");
        }

        tracing::info!("event bus initialized");
        Ok(())
    }

    /// True when a publish channel is open.
    pub async fn is_initialized(&self) -> bool {
        self.publish_channel
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.is_open())
    }

    async fn declare_exchanges(&self, channel: &Arc<dyn Channel>) -> Result<()> {
        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeOptions::durable(),
            )
            .await?;
        channel
            .exchange_declare(
                &self.config.dead_letter_exchange,
                ExchangeKind::Topic,
                ExchangeOptions::durable(),
            )
            .await
    }

    /// Publishes `message` as persistent JSON with the given routing key.
    pub async fn publish<T>(&self, routing_key: &str, message: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let type_name = std::any::type_name::<T>();
        let short_name = type_name.rsplit("::").next().unwrap_or(type_name);
        self.publish_typed(routing_key, short_name, message).await
    }

    /// Publishes a domain event under its own routing key.
    pub async fn publish_event<E: DomainEvent>(&self, event: &E) -> Result<()> {
        self.publish_typed(&E::routing_key(), E::EVENT_TYPE, event)
            .await
    }

    #[tracing::instrument(skip(self, message), fields(message_id))]
    async fn publish_typed<T>(&self, routing_key: &str, message_type: &str, message: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(message)?;
        let message_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("message_id", message_id.as_str());

        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE_JSON)
            .persistent()
            .with_message_id(message_id)
            .with_message_type(message_type)
            .with_timestamp(Utc::now());

        let guard = self.publish_channel.lock().await;
        let channel = guard.as_ref().ok_or(MessagingError::NotInitialized)?;
        if let Err(error) = channel
            .basic_publish(&self.config.exchange, routing_key, body, properties)
            .await
        {
            tracing::error!(%error, "publish failed");
            return Err(error);
        }
        drop(guard);

        metrics::counter!("messages_published_total", "routing_key" => routing_key.to_string())
            .increment(1);
        tracing::debug!("message published");
        Ok(())
    }

    /// Declares `queue`, binds it on `routing_key`, and starts consuming it
    /// with `handler` on a dedicated task.
    ///
    /// Also declares `<queue>.dead-letter` on the dead-letter exchange.
    #[tracing::instrument(skip(self, handler))]
    pub async fn subscribe<T, H>(&self, queue: &str, routing_key: &str, handler: Arc<H>) -> Result<()>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        H: EventHandler<T> + 'static,
    {
        let subscription = Arc::new(Subscription::<T, H> {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
            handler,
            _message: PhantomData,
        });
        let consumer = subscription.attach(self).await?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SubscriptionSlot {
                subscription,
                consumer: Some(consumer),
            });

        tracing::info!("subscription started");
        Ok(())
    }

    async fn start_consumer<T, H>(
        &self,
        queue: &str,
        routing_key: &str,
        handler: Arc<H>,
    ) -> Result<JoinHandle<()>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        H: EventHandler<T> + 'static,
    {
        let channel = self.connection.create_channel().await?;
        self.declare_exchanges(&channel).await?;

        channel.queue_declare(queue, QueueOptions::durable()).await?;
        channel
            .queue_bind(queue, &self.config.exchange, routing_key)
            .await?;

        let dead_letter_queue = BusConfig::dead_letter_queue(queue);
        channel
            .queue_declare(&dead_letter_queue, QueueOptions::durable())
            .await?;
        channel
            .queue_bind(&dead_letter_queue, &self.config.dead_letter_exchange, queue)
            .await?;

        let consumer = channel
            .basic_consume(queue, &format!("{queue}-consumer"))
            .await?;
        let worker = ConsumerWorker::<T, H>::new(
            queue,
            channel,
            handler,
            self.config.clone(),
            Arc::clone(&self.failed_store),
            Arc::clone(&self.processed_store),
        );
        let shutdown = self.shutdown.child_token();
        let stopped = Arc::clone(&self.consumer_stopped);
        Ok(tokio::spawn(async move {
            worker.run(consumer, shutdown).await;
            stopped.notify_one();
        }))
    }

    /// Reconnects and reopens the publish channel if either is gone, then
    /// restarts every subscription whose consume task has ended.
    ///
    /// Returns how many subscriptions were restarted. Does nothing after
    /// [`shutdown`](Self::shutdown).
    #[tracing::instrument(skip(self, cancel))]
    pub async fn recover(&self, cancel: &CancellationToken) -> Result<usize> {
        if self.shutdown.is_cancelled() {
            return Ok(0);
        }
        if !self.connection.is_connected() || !self.is_initialized().await {
            tracing::info!("reinitializing event bus");
            self.initialize(cancel).await?;
        }

        let stopped: Vec<(usize, Arc<dyn Attach>, Option<JoinHandle<()>>)> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| slot.consumer.as_ref().is_none_or(JoinHandle::is_finished))
            .map(|(index, slot)| (index, Arc::clone(&slot.subscription), slot.consumer.take()))
            .collect();

        let mut restarted = 0;
        for (index, subscription, finished) in stopped {
            if let Some(finished) = finished
                && let Err(error) = finished.await
            {
                tracing::error!(%error, "consumer task ended abnormally");
            }
            let consumer = subscription.attach(self).await?;
            if let Some(slot) = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_mut(index)
            {
                slot.consumer = Some(consumer);
            }
            restarted += 1;
        }

        if restarted > 0 {
            metrics::counter!("consumers_restarted_total").increment(restarted as u64);
            tracing::info!(restarted, "subscriptions restarted");
        }
        Ok(restarted)
    }

    /// Starts a task that calls [`recover`](Self::recover) on every tick of
    /// the reconnect policy and whenever a consumer stops. Failed attempts
    /// back off up to `max_delay`. The task ends on shutdown.
    pub fn spawn_supervisor(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.child_token();
        let consumer_stopped = Arc::clone(&self.consumer_stopped);
        let policy = self.config.reconnect;

        let handle = tokio::spawn(async move {
            let mut delay = policy.initial_delay;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                    _ = consumer_stopped.notified() => {}
                }
                let Some(bus) = weak.upgrade() else {
                    break;
                };
                match bus.recover(&shutdown).await {
                    Ok(_) => delay = policy.initial_delay,
                    Err(error) => {
                        delay = policy.next_delay(delay);
                        tracing::warn!(
                            %error,
                            retry_in_ms = delay.as_millis() as u64,
                            "event bus recovery failed"
                        );
                    }
                }
            }
            tracing::debug!("event bus supervisor stopped");
        });

        let previous = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stops every consumer, waits for in-flight deliveries, and releases
    /// the connection.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(supervisor) = supervisor
            && let Err(error) = supervisor.await
        {
            tracing::error!(%error, "event bus supervisor ended abnormally");
        }

        let handles: Vec<JoinHandle<()>> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
            .filter_map(|slot| slot.consumer.take())
            .collect();
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::error!(%error, "consumer task ended abnormally");
            }
        }

        if let Some(channel) = self.publish_channel.lock().await.take()
            && let Err(error) = channel.close().await
        {
            tracing::debug!(%error, "error closing publish channel");
        }
        self.connection.dispose().await;
        tracing::info!("event bus stopped");
    }
}
