//! Records of messages that could not be handled.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessagingError, Result};

/// A dead-lettered message kept for operator triage and replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedMessage {
    pub message_id: String,
    pub event_type: String,
    pub exchange: String,
    pub routing_key: String,
    /// Raw message body, lossily decoded as UTF-8.
    pub message: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl FailedMessage {
    pub fn new(
        message_id: impl Into<String>,
        event_type: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: &[u8],
        error: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            event_type: event_type.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            message: String::from_utf8_lossy(body).into_owned(),
            error: error.into(),
            failed_at: Utc::now(),
            processed: false,
            processed_at: None,
        }
    }
}

/// Persistence for [`FailedMessage`] records. Records are never deleted.
#[async_trait]
pub trait FailedMessageStore: Send + Sync {
    /// Stores a record. A second record with the same message id replaces
    /// the first and resets its processed flag.
    async fn record(&self, message: FailedMessage) -> Result<()>;

    async fn get(&self, message_id: &str) -> Result<Option<FailedMessage>>;

    /// Returns records not yet replayed, oldest first.
    async fn list_unprocessed(&self) -> Result<Vec<FailedMessage>>;

    /// Marks a record as replayed. Returns false if no such record exists.
    async fn mark_processed(&self, message_id: &str) -> Result<bool>;
}

#[derive(Default)]
struct StoreState {
    messages: HashMap<String, FailedMessage>,
    fail_on_record: bool,
}

/// In-memory failed-message store for tests and development.
#[derive(Clone, Default)]
pub struct InMemoryFailedMessageStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryFailedMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail on the next `record` calls.
    pub fn set_fail_on_record(&self, fail: bool) {
        self.state.write().unwrap().fail_on_record = fail;
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FailedMessageStore for InMemoryFailedMessageStore {
    async fn record(&self, message: FailedMessage) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_record {
            return Err(MessagingError::Store(
                "failed-message store unavailable".to_string(),
            ));
        }
        state.messages.insert(message.message_id.clone(), message);
        Ok(())
    }

    async fn get(&self, message_id: &str) -> Result<Option<FailedMessage>> {
        Ok(self.state.read().unwrap().messages.get(message_id).cloned())
    }

    async fn list_unprocessed(&self) -> Result<Vec<FailedMessage>> {
        let state = self.state.read().unwrap();
        let mut messages: Vec<FailedMessage> = state
            .messages
            .values()
            .filter(|m| !m.processed)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.failed_at);
        Ok(messages)
    }

    async fn mark_processed(&self, message_id: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        match state.messages.get_mut(message_id) {
            Some(message) => {
                message.processed = true;
                message.processed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(id: &str) -> FailedMessage {
        FailedMessage::new(
            id,
            "OrderPlacedEvent",
            "order_events",
            "orderplacedevent",
            br#"{"bad":true}"#,
            "boom",
        )
    }

    #[tokio::test]
    async fn test_record_and_list_unprocessed() {
        let store = InMemoryFailedMessageStore::new();
        store.record(failed("m1")).await.unwrap();
        store.record(failed("m2")).await.unwrap();

        let pending = store.list_unprocessed().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].message, r#"{"bad":true}"#);
    }

    #[tokio::test]
    async fn test_mark_processed_keeps_record() {
        let store = InMemoryFailedMessageStore::new();
        store.record(failed("m1")).await.unwrap();

        assert!(store.mark_processed("m1").await.unwrap());
        assert!(!store.mark_processed("missing").await.unwrap());

        assert!(store.list_unprocessed().await.unwrap().is_empty());
        let record = store.get("m1").await.unwrap().unwrap();
        assert!(record.processed);
        assert!(record.processed_at.is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_record_failure_switch() {
        let store = InMemoryFailedMessageStore::new();
        store.set_fail_on_record(true);
        assert!(store.record(failed("m1")).await.is_err());
        assert!(store.is_empty());
    }
}
