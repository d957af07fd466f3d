//! Core domain event trait.

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events published to the message bus.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense. The occurrence
/// timestamp is fixed when the event is constructed.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// The event type name, e.g. `"OrderPlacedEvent"`.
    const EVENT_TYPE: &'static str;

    /// Returns when the event occurred.
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Returns the event type name.
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    /// Returns the routing key used on the topic exchange.
    ///
    /// This is the lowercased event type name.
    fn routing_key() -> String {
        Self::EVENT_TYPE.to_lowercase()
    }
}
