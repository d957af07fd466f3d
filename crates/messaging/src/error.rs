//! Messaging error types.

use thiserror::Error;

/// Errors that can occur when talking to the broker or the failed-message store.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// No live broker connection exists.
    #[error("no connection available")]
    NotConnected,

    /// The bus has no open publish channel.
    #[error("event bus is not initialized")]
    NotInitialized,

    /// The broker refused or failed the connection attempt.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The channel was closed by the client or the broker.
    #[error("Channel is closed")]
    ChannelClosed,

    /// A publish or bind referenced an exchange that was never declared.
    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    /// A bind or consume referenced a queue that was never declared.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// A redeclaration conflicted with the existing entity.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// An ack or nack referenced a delivery the broker does not know.
    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    /// The broker rejected the publish.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// A store backing the bus rejected the operation.
    #[error("Store error: {0}")]
    Store(String),

    /// A broker operation did not finish in time.
    #[error("Timed out during {operation}")]
    Timeout { operation: &'static str },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
