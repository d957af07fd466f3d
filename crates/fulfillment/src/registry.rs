//! Ordered list of event subscriptions started at boot.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use domain::DomainEvent;
use messaging::{EventBus, EventHandler};

/// Starts one subscription on the bus.
#[async_trait]
trait Subscription: Send + Sync {
    async fn start(&self, bus: &EventBus, queue: &str, routing_key: &str) -> messaging::Result<()>;
}

struct TypedSubscription<E, H> {
    handler: Arc<H>,
    _event: PhantomData<fn() -> E>,
}

#[async_trait]
impl<E, H> Subscription for TypedSubscription<E, H>
where
    E: DomainEvent,
    H: EventHandler<E> + 'static,
{
    async fn start(&self, bus: &EventBus, queue: &str, routing_key: &str) -> messaging::Result<()> {
        bus.subscribe::<E, H>(queue, routing_key, Arc::clone(&self.handler))
            .await
    }
}

struct Registration {
    order: i32,
    queue: String,
    routing_key: String,
    subscription: Box<dyn Subscription>,
}

/// Subscriptions keyed by an explicit start order.
///
/// Entries with equal `order` start in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: Vec<Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of type `E` on `queue`, bound on the
    /// event's routing key.
    pub fn register<E, H>(mut self, order: i32, queue: impl Into<String>, handler: Arc<H>) -> Self
    where
        E: DomainEvent,
        H: EventHandler<E> + 'static,
    {
        self.registrations.push(Registration {
            order,
            queue: queue.into(),
            routing_key: E::routing_key(),
            subscription: Box::new(TypedSubscription::<E, H> {
                handler,
                _event: PhantomData,
            }),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// `(queue, routing_key)` pairs in start order.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.sorted()
            .map(|r| (r.queue.clone(), r.routing_key.clone()))
            .collect()
    }

    fn sorted(&self) -> impl Iterator<Item = &Registration> {
        let mut sorted: Vec<&Registration> = self.registrations.iter().collect();
        sorted.sort_by_key(|r| r.order);
        sorted.into_iter()
    }

    /// Starts every subscription in order, stopping at the first failure.
    pub async fn start(&self, bus: &EventBus) -> messaging::Result<()> {
        for registration in self.sorted() {
            registration
                .subscription
                .start(bus, &registration.queue, &registration.routing_key)
                .await?;
            tracing::info!(
                order = registration.order,
                queue = %registration.queue,
                routing_key = %registration.routing_key,
                "Handler subscribed"
            );
        }
        Ok(())
    }
}
