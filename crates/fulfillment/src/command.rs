//! Order write path: persist, publish, schedule follow-up work, invalidate.

use std::sync::Arc;

use cache::CacheInvalidationService;
use common::{CustomerId, OrderId, UserId};
use domain::{DomainEvent, Order, OrderItem, OrderStatus};
use jobs::JobClient;
use messaging::EventBus;

use crate::error::{OrderServiceError, Result};
use crate::post_order::PostOrderServices;
use crate::repository::OrderRepository;

/// Applies order commands and triggers their side effects.
///
/// Each command runs four independent steps in order: persist, publish,
/// enqueue follow-up jobs, invalidate the cache. Nothing rolls back a
/// persisted change. A failed publish is reported as
/// [`OrderServiceError::Publish`] once the remaining steps have run; a failed
/// invalidation is only logged.
pub struct OrderCommandService {
    orders: Arc<dyn OrderRepository>,
    bus: Arc<EventBus>,
    jobs: Arc<dyn JobClient>,
    post_order: PostOrderServices,
    invalidation: CacheInvalidationService,
}

impl OrderCommandService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        bus: Arc<EventBus>,
        jobs: Arc<dyn JobClient>,
        post_order: PostOrderServices,
        invalidation: CacheInvalidationService,
    ) -> Self {
        Self {
            orders,
            bus,
            jobs,
            post_order,
            invalidation,
        }
    }

    /// Places a new order and chains its post-order jobs.
    #[tracing::instrument(skip(self, items), fields(order_id))]
    pub async fn place_order(&self, customer_id: CustomerId, items: Vec<OrderItem>) -> Result<Order> {
        let (order, event) = Order::place(customer_id, items)?;
        tracing::Span::current().record("order_id", tracing::field::display(order.id()));

        self.persist(&order).await?;
        let published = self.publish(order.id(), &event).await;
        self.post_order.enqueue_chain(self.jobs.as_ref(), &order)?;
        self.invalidate(&order).await;

        metrics::counter!("orders_placed_total").increment(1);
        tracing::info!(total = %order.total_amount(), "Order placed");
        published.map(|()| order)
    }

    /// Moves an order forward in its lifecycle.
    #[tracing::instrument(skip(self, notes))]
    pub async fn change_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        changed_by: Option<UserId>,
        notes: Option<String>,
    ) -> Result<Order> {
        let mut order = self.load(order_id).await?;
        let event = order.change_status(new_status, changed_by, notes)?;

        self.persist(&order).await?;
        let published = self.publish(order_id, &event).await;
        self.invalidate(&order).await;

        tracing::info!(%new_status, "Order status changed");
        published.map(|()| order)
    }

    /// Cancels an order. Orders that have shipped cannot be cancelled; the
    /// rejection leaves the stored order untouched and publishes nothing.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        reason: &str,
        cancelled_by: Option<UserId>,
    ) -> Result<Order> {
        let mut order = self.load(order_id).await?;
        let event = order.cancel(reason, cancelled_by)?;

        self.persist(&order).await?;
        let published = self.publish(order_id, &event).await;
        self.invalidate(&order).await;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!("Order cancelled");
        published.map(|()| order)
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .get(order_id)
            .await
            .map_err(OrderServiceError::Repository)?
            .ok_or(OrderServiceError::NotFound(order_id))
    }

    async fn persist(&self, order: &Order) -> Result<()> {
        self.orders
            .save(order)
            .await
            .map_err(OrderServiceError::Repository)
    }

    async fn publish<E: DomainEvent>(&self, order_id: OrderId, event: &E) -> Result<()> {
        self.bus.publish_event(event).await.map_err(|source| {
            tracing::error!(%order_id, event_type = E::EVENT_TYPE, error = %source, "Event publish failed after save");
            OrderServiceError::Publish { order_id, source }
        })
    }

    async fn invalidate(&self, order: &Order) {
        if let Err(error) = self
            .invalidation
            .invalidate_order(order.id(), order.customer_id())
            .await
        {
            tracing::warn!(order_id = %order.id(), %error, "Order cache invalidation failed");
        }
    }
}
