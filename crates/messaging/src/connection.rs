//! Ownership of the single broker connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Channel, Connection};
use crate::{MessagingError, Result};

/// Default bound on connect and channel creation.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the broker connection shared by publishers and consumers.
///
/// Connecting never errors to the caller: failures are logged and reported
/// as `false`. Creating a channel requires a live connection.
pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    connect_lock: Mutex<()>,
    disposed: AtomicBool,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            connection: RwLock::new(None),
            connect_lock: Mutex::new(()),
            disposed: AtomicBool::new(false),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the bound applied to connect and channel creation.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// True when an open connection exists and the manager is not disposed.
    pub fn is_connected(&self) -> bool {
        if self.disposed.load(Ordering::SeqCst) {
            return false;
        }
        self.current().is_some_and(|c| c.is_open())
    }

    fn current(&self) -> Option<Arc<dyn Connection>> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Attempts to connect. Returns true if a live connection exists afterwards.
    ///
    /// Concurrent callers are serialised, so at most one connection is opened.
    /// A cancelled token aborts the attempt without storing anything.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn try_connect(&self, cancel: &CancellationToken) -> bool {
        if self.disposed.load(Ordering::SeqCst) {
            tracing::warn!("connect requested on a disposed connection manager");
            return false;
        }

        let _guard = tokio::select! {
            guard = self.connect_lock.lock() => guard,
            _ = cancel.cancelled() => return false,
        };

        if self.is_connected() {
            return true;
        }

        let attempt = tokio::time::timeout(self.connect_timeout, self.broker.connect());
        let outcome = tokio::select! {
            outcome = attempt => outcome,
            _ = cancel.cancelled() => {
                tracing::info!("broker connect cancelled");
                return false;
            }
        };

        match outcome {
            Ok(Ok(connection)) => {
                if self.disposed.load(Ordering::SeqCst) {
                    let _ = connection.close().await;
                    return false;
                }
                *self
                    .connection
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(connection);
                tracing::info!("connected to message broker");
                true
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "could not connect to message broker");
                false
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "timed out connecting to message broker"
                );
                false
            }
        }
    }

    /// Opens a channel on the current connection.
    pub async fn create_channel(&self) -> Result<Arc<dyn Channel>> {
        if !self.is_connected() {
            return Err(MessagingError::NotConnected);
        }
        let connection = self.current().ok_or(MessagingError::NotConnected)?;

        tokio::time::timeout(self.connect_timeout, connection.create_channel())
            .await
            .map_err(|_| MessagingError::Timeout {
                operation: "create channel",
            })?
    }

    /// Releases the connection. Safe to call more than once; close errors
    /// are logged and swallowed.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let connection = self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(connection) = connection
            && let Err(error) = connection.close().await
        {
            tracing::error!(%error, "error closing broker connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBroker;

    fn manager(broker: &InMemoryBroker) -> ConnectionManager {
        ConnectionManager::new(Arc::new(broker.clone()))
    }

    #[tokio::test]
    async fn test_try_connect_is_idempotent() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        let cancel = CancellationToken::new();

        assert!(manager.try_connect(&cancel).await);
        assert!(manager.try_connect(&cancel).await);
        assert!(manager.is_connected());
        assert_eq!(broker.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_try_connect_failure_returns_false() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let manager = manager(&broker);

        assert!(!manager.try_connect(&CancellationToken::new()).await);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_cancelled_token_stores_nothing() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(!manager.try_connect(&cancel).await);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_create_channel_requires_connection() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);

        let err = manager.create_channel().await.err().unwrap();
        assert!(matches!(err, MessagingError::NotConnected));
        assert_eq!(err.to_string(), "no connection available");

        manager.try_connect(&CancellationToken::new()).await;
        assert!(manager.create_channel().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_connection_reports_disconnected() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        manager.try_connect(&CancellationToken::new()).await;

        broker.drop_connections();

        assert!(!manager.is_connected());
        assert!(manager.try_connect(&CancellationToken::new()).await);
        assert_eq!(broker.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_final() {
        let broker = InMemoryBroker::new();
        let manager = manager(&broker);
        manager.try_connect(&CancellationToken::new()).await;

        manager.dispose().await;
        manager.dispose().await;

        assert!(!manager.is_connected());
        assert!(!manager.try_connect(&CancellationToken::new()).await);
    }
}
