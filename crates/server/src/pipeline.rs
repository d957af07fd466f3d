//! Builds and runs the fulfillment pipeline from configuration.

use std::sync::Arc;

use cache::{CacheInvalidationService, CacheService, CacheStatistics, InMemoryCacheStore};
use domain::{OrderCancelledEvent, OrderPlacedEvent, OrderStatusChangedEvent};
use fulfillment::{
    HandlerRegistry, InMemoryInventoryService, InMemoryNotificationService,
    InMemoryOrderRepository, InMemoryPaymentService, InMemoryShippingService,
    ORDER_CANCELLED_QUEUE, ORDER_PLACED_QUEUE, ORDER_STATUS_CHANGED_QUEUE,
    OrderCancelledEventHandler, OrderCommandService, OrderPlacedEventHandler,
    OrderStatusChangedEventHandler, PostOrderServices,
};
use jobs::{FilterRegistry, InMemoryFailedJobStore, JobErrorHandler, JobScheduler};
use messaging::{
    ConnectionManager, EventBus, FailedMessageStore, InMemoryBroker,
    InMemoryProcessedMessageStore,
};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Every long-lived component of the running service.
pub struct Pipeline {
    pub bus: Arc<EventBus>,
    pub scheduler: Arc<JobScheduler>,
    pub cache: CacheService,
    pub cache_statistics: Arc<CacheStatistics>,
    pub failed_messages: Arc<dyn FailedMessageStore>,
    /// Write path for placing, changing and cancelling orders. The binary
    /// serves no order routes; this is the entry point for callers that
    /// embed the pipeline as a library.
    pub commands: Arc<OrderCommandService>,
    handlers: HandlerRegistry,
}

impl Pipeline {
    /// Wires the pipeline. Nothing connects or runs until [`start`](Self::start).
    pub fn build(config: &Config, failed_messages: Arc<dyn FailedMessageStore>) -> Self {
        if !config.broker_url.starts_with("memory://") {
            tracing::warn!(
                broker_url = %config.broker_url,
                "Only the in-process broker is built in; using it"
            );
        }
        let broker = InMemoryBroker::new();
        let connection = Arc::new(
            ConnectionManager::new(Arc::new(broker))
                .with_connect_timeout(config.broker_connect_timeout),
        );
        let bus = Arc::new(EventBus::new(
            connection,
            config.bus.clone(),
            Arc::clone(&failed_messages),
            Arc::new(InMemoryProcessedMessageStore::default()),
        ));

        let failed_jobs = Arc::new(InMemoryFailedJobStore::new());
        let scheduler = Arc::new(JobScheduler::new(
            config.jobs.clone(),
            FilterRegistry::new().register(0, Arc::new(JobErrorHandler::new(failed_jobs))),
        ));

        let cache_statistics = Arc::new(CacheStatistics::new());
        let cache = CacheService::new(
            Arc::new(InMemoryCacheStore::new()),
            Arc::clone(&cache_statistics),
            &config.cache,
        );
        let invalidation = CacheInvalidationService::new(cache.clone());

        let orders = Arc::new(InMemoryOrderRepository::new());
        let inventory = Arc::new(InMemoryInventoryService::new());
        let notifications = Arc::new(InMemoryNotificationService::new());

        let handlers = HandlerRegistry::new()
            .register::<OrderPlacedEvent, _>(
                10,
                ORDER_PLACED_QUEUE,
                Arc::new(
                    OrderPlacedEventHandler::new(inventory.clone(), notifications.clone())
                        .with_cache_invalidation(invalidation.clone()),
                ),
            )
            .register::<OrderStatusChangedEvent, _>(
                20,
                ORDER_STATUS_CHANGED_QUEUE,
                Arc::new(OrderStatusChangedEventHandler::new(notifications.clone())),
            )
            .register::<OrderCancelledEvent, _>(
                30,
                ORDER_CANCELLED_QUEUE,
                Arc::new(
                    OrderCancelledEventHandler::new(
                        orders.clone(),
                        inventory,
                        notifications.clone(),
                    )
                    .with_cache_invalidation(invalidation.clone()),
                ),
            );

        let post_order = PostOrderServices {
            orders: orders.clone(),
            payments: Arc::new(InMemoryPaymentService::new()),
            shipping: Arc::new(InMemoryShippingService::new()),
            notifications,
        };
        let commands = Arc::new(OrderCommandService::new(
            orders,
            Arc::clone(&bus),
            scheduler.clone(),
            post_order,
            invalidation,
        ));

        Self {
            bus,
            scheduler,
            cache,
            cache_statistics,
            failed_messages,
            commands,
            handlers,
        }
    }

    /// Connects the bus, subscribes every handler, starts the bus supervisor
    /// and the job workers.
    pub async fn start(&self, cancel: &CancellationToken) -> messaging::Result<()> {
        self.bus.initialize(cancel).await?;
        self.handlers.start(&self.bus).await?;
        self.bus.spawn_supervisor();
        self.scheduler.start();
        tracing::info!(subscriptions = self.handlers.len(), "Pipeline started");
        Ok(())
    }

    /// Drains the job workers, then the consumers, then closes the connection.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.bus.shutdown().await;
        tracing::info!("Pipeline stopped");
    }
}
