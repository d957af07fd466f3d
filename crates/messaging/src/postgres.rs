use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{FailedMessage, FailedMessageStore, Result};

/// PostgreSQL-backed failed-message store.
#[derive(Clone)]
pub struct PostgresFailedMessageStore {
    pool: PgPool,
}

impl PostgresFailedMessageStore {
    /// Creates a new PostgreSQL failed-message store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_message(row: PgRow) -> Result<FailedMessage> {
        Ok(FailedMessage {
            message_id: row.try_get("message_id")?,
            event_type: row.try_get("event_type")?,
            exchange: row.try_get("exchange")?,
            routing_key: row.try_get("routing_key")?,
            message: row.try_get("message")?,
            error: row.try_get("error")?,
            failed_at: row.try_get("failed_at")?,
            processed: row.try_get("processed")?,
            processed_at: row.try_get("processed_at")?,
        })
    }
}

#[async_trait]
impl FailedMessageStore for PostgresFailedMessageStore {
    async fn record(&self, message: FailedMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO failed_messages
                (message_id, event_type, exchange, routing_key, message, error, failed_at, processed, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (message_id) DO UPDATE SET
                event_type = EXCLUDED.event_type,
                exchange = EXCLUDED.exchange,
                routing_key = EXCLUDED.routing_key,
                message = EXCLUDED.message,
                error = EXCLUDED.error,
                failed_at = EXCLUDED.failed_at,
                processed = FALSE,
                processed_at = NULL
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.event_type)
        .bind(&message.exchange)
        .bind(&message.routing_key)
        .bind(&message.message)
        .bind(&message.error)
        .bind(message.failed_at)
        .bind(message.processed)
        .bind(message.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, message_id: &str) -> Result<Option<FailedMessage>> {
        let row = sqlx::query(
            r#"
            SELECT message_id, event_type, exchange, routing_key, message, error, failed_at, processed, processed_at
            FROM failed_messages
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_message).transpose()
    }

    async fn list_unprocessed(&self) -> Result<Vec<FailedMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, event_type, exchange, routing_key, message, error, failed_at, processed, processed_at
            FROM failed_messages
            WHERE processed = FALSE
            ORDER BY failed_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn mark_processed(&self, message_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE failed_messages
            SET processed = TRUE, processed_at = $2
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
