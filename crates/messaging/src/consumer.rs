//! The at-least-once consume loop for one subscription.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::{Channel, Consumer, Delivery};
use crate::retry::{
    DEATH_REASON_HEADER, ORIGINAL_EXCHANGE_HEADER, ORIGINAL_ROUTING_KEY_HEADER,
    RETRY_COUNT_HEADER, retry_count,
};
use crate::{
    BusConfig, EventHandler, FailedMessage, FailedMessageStore, HandlerOutcome,
    ProcessedMessageStore,
};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled and acknowledged.
    Acked,
    /// Already handled earlier; acknowledged without invoking the handler.
    Duplicate,
    /// Republished for another attempt, original acknowledged.
    Retried,
    /// Returned to the queue by the broker.
    Requeued,
    /// Recorded as failed and moved to the dead-letter exchange.
    DeadLettered,
}

pub(crate) struct ConsumerWorker<T, H> {
    queue: String,
    channel: Arc<dyn Channel>,
    handler: Arc<H>,
    config: BusConfig,
    failed_store: Arc<dyn FailedMessageStore>,
    processed_store: Arc<dyn ProcessedMessageStore>,
    _message: PhantomData<fn() -> T>,
}

impl<T, H> ConsumerWorker<T, H>
where
    T: DeserializeOwned + Send + Sync + 'static,
    H: EventHandler<T> + 'static,
{
    pub(crate) fn new(
        queue: impl Into<String>,
        channel: Arc<dyn Channel>,
        handler: Arc<H>,
        config: BusConfig,
        failed_store: Arc<dyn FailedMessageStore>,
        processed_store: Arc<dyn ProcessedMessageStore>,
    ) -> Self {
        Self {
            queue: queue.into(),
            channel,
            handler,
            config,
            failed_store,
            processed_store,
            _message: PhantomData,
        }
    }

    /// Handles deliveries until shutdown or until the broker ends the stream.
    pub(crate) async fn run(self, mut consumer: Consumer, shutdown: CancellationToken) {
        tracing::info!(queue = %self.queue, "consumer started");

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = consumer.next() => next,
            };
            match delivery {
                Some(delivery) => {
                    self.handle_delivery(delivery).await;
                }
                None => {
                    tracing::warn!(queue = %self.queue, "broker closed the consumer stream");
                    break;
                }
            }
        }

        if let Err(error) = self.channel.close().await {
            tracing::debug!(queue = %self.queue, %error, "error closing consumer channel");
        }
        tracing::info!(queue = %self.queue, "consumer stopped");
    }

    #[tracing::instrument(
        skip(self, delivery),
        fields(queue = %self.queue, delivery_tag = delivery.delivery_tag, message_id)
    )]
    pub(crate) async fn handle_delivery(&self, delivery: Delivery) -> Disposition {
        metrics::counter!("messages_consumed_total", "queue" => self.queue.clone()).increment(1);

        let message_id = delivery.properties.message_id.clone();
        if let Some(id) = &message_id {
            tracing::Span::current().record("message_id", id.as_str());
            match self.processed_store.is_processed(&self.queue, id).await {
                Ok(true) => {
                    tracing::info!("duplicate delivery skipped");
                    return self.ack(&delivery, Disposition::Duplicate).await;
                }
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(%error, "could not check processed messages, handling anyway")
                }
            }
        }

        let message: T = match serde_json::from_slice(&delivery.body) {
            Ok(message) => message,
            Err(error) => {
                return self
                    .dead_letter(&delivery, &format!("undecodable payload: {error}"))
                    .await;
            }
        };

        let outcome = match AssertUnwindSafe(self.handler.handle(message))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                HandlerOutcome::Retryable(format!("handler panicked: {}", panic_message(&*panic)))
            }
        };

        match outcome {
            HandlerOutcome::Completed => {
                if let Some(id) = &message_id
                    && let Err(error) = self.processed_store.mark_processed(&self.queue, id).await
                {
                    tracing::warn!(%error, "could not record processed message");
                }
                self.ack(&delivery, Disposition::Acked).await
            }
            HandlerOutcome::Retryable(reason) => {
                let attempts = retry_count(&delivery.properties);
                if self.config.retry.should_retry(attempts) {
                    self.retry(&delivery, attempts, &reason).await
                } else {
                    self.dead_letter(
                        &delivery,
                        &format!("retries exhausted after {attempts} attempts: {reason}"),
                    )
                    .await
                }
            }
            HandlerOutcome::Fatal(reason) => self.dead_letter(&delivery, &reason).await,
        }
    }

    async fn retry(&self, delivery: &Delivery, attempts: u32, reason: &str) -> Disposition {
        let mut properties = delivery
            .properties
            .clone()
            .with_header(RETRY_COUNT_HEADER, (attempts + 1).to_string());
        properties
            .headers
            .entry(ORIGINAL_EXCHANGE_HEADER.to_string())
            .or_insert_with(|| delivery.exchange.clone());
        properties
            .headers
            .entry(ORIGINAL_ROUTING_KEY_HEADER.to_string())
            .or_insert_with(|| delivery.routing_key.clone());

        match self
            .channel
            .basic_publish("", &self.queue, delivery.body.clone(), properties)
            .await
        {
            Ok(()) => {
                tracing::warn!(attempt = attempts + 1, reason, "handler failed, message retried");
                metrics::counter!("messages_retried_total", "queue" => self.queue.clone())
                    .increment(1);
                self.ack(delivery, Disposition::Retried).await
            }
            Err(error) => {
                tracing::warn!(%error, reason, "could not republish for retry, requeueing");
                self.requeue(delivery).await
            }
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Disposition {
        let exchange = delivery
            .properties
            .header(ORIGINAL_EXCHANGE_HEADER)
            .unwrap_or(&delivery.exchange)
            .to_string();
        let routing_key = delivery
            .properties
            .header(ORIGINAL_ROUTING_KEY_HEADER)
            .unwrap_or(&delivery.routing_key)
            .to_string();
        let message_id = delivery
            .properties
            .message_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let event_type = delivery
            .properties
            .message_type
            .clone()
            .unwrap_or_else(|| routing_key.clone());

        let record = FailedMessage::new(
            message_id,
            event_type,
            exchange.clone(),
            routing_key.clone(),
            &delivery.body,
            reason,
        );
        if let Err(error) = self.failed_store.record(record).await {
            tracing::error!(%error, reason, "could not persist failed message, requeueing");
            return self.requeue(delivery).await;
        }

        let mut properties = delivery
            .properties
            .clone()
            .with_header(DEATH_REASON_HEADER, reason);
        properties
            .headers
            .insert(ORIGINAL_EXCHANGE_HEADER.to_string(), exchange);
        properties
            .headers
            .insert(ORIGINAL_ROUTING_KEY_HEADER.to_string(), routing_key);

        if let Err(error) = self
            .channel
            .basic_publish(
                &self.config.dead_letter_exchange,
                &self.queue,
                delivery.body.clone(),
                properties,
            )
            .await
        {
            tracing::warn!(%error, "failed message recorded but not forwarded to dead-letter exchange");
        }

        tracing::error!(reason, "message dead-lettered");
        metrics::counter!("messages_dead_lettered_total", "queue" => self.queue.clone())
            .increment(1);
        self.ack(delivery, Disposition::DeadLettered).await
    }

    async fn ack(&self, delivery: &Delivery, disposition: Disposition) -> Disposition {
        if let Err(error) = delivery.ack().await {
            tracing::warn!(%error, "ack failed, broker will redeliver");
            return Disposition::Requeued;
        }
        disposition
    }

    async fn requeue(&self, delivery: &Delivery) -> Disposition {
        if let Err(error) = delivery.nack(true).await {
            tracing::warn!(%error, "nack failed, broker will redeliver on channel close");
        }
        Disposition::Requeued
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
