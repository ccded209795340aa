//! Delivery Repository Implementation
//!
//! PostgreSQL implementation of the `DeliveryRepository` trait. All status
//! transitions are conditional updates so concurrent acknowledgments
//! linearize in the database; the unique (message_id, recipient_id) key
//! makes record creation idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::entities::{
    ContentType, DeliveryRecord, DeliveryRepository, DeliveryStatus, OutboundMessage,
};
use crate::shared::error::AppError;

/// Database row for a delivery record.
#[derive(Debug, sqlx::FromRow)]
struct DeliveryRow {
    message_id: i64,
    recipient_id: i64,
    status: String,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl DeliveryRow {
    fn into_record(self) -> DeliveryRecord {
        DeliveryRecord {
            message_id: self.message_id,
            recipient_id: self.recipient_id,
            status: DeliveryStatus::from_str(&self.status),
            delivered_at: self.delivered_at,
            read_at: self.read_at,
            created_at: self.created_at,
        }
    }
}

/// Database row for a pending message joined with its source message.
#[derive(Debug, sqlx::FromRow)]
struct PendingMessageRow {
    id: i64,
    chat_id: i64,
    sender_id: Option<i64>,
    content: String,
    content_type: String,
    created_at: DateTime<Utc>,
}

impl PendingMessageRow {
    fn into_message(self) -> OutboundMessage {
        OutboundMessage {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            content: self.content,
            content_type: ContentType::from_str(&self.content_type),
            created_at: self.created_at,
        }
    }
}

/// PostgreSQL delivery repository implementation.
#[derive(Clone)]
pub struct PgDeliveryRepository {
    pool: PgPool,
}

impl PgDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryRepository for PgDeliveryRepository {
    async fn create_pending(&self, message_id: i64, recipient_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_deliveries (message_id, recipient_id, status)
            VALUES ($1, $2, 'pending')
            ON CONFLICT (message_id, recipient_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_delivered(
        &self,
        message_id: i64,
        recipient_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError> {
        let chat_id: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE message_deliveries d
            SET status = 'delivered', delivered_at = $3
            FROM messages m
            WHERE d.message_id = $1
              AND d.recipient_id = $2
              AND d.status = 'pending'
              AND m.id = d.message_id
            RETURNING m.chat_id
            "#,
        )
        .bind(message_id)
        .bind(recipient_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(chat_id.map(|(id,)| id))
    }

    async fn mark_read(
        &self,
        message_id: i64,
        recipient_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError> {
        // read implies delivered; backfill delivered_at when the ack was
        // never separately received.
        let chat_id: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE message_deliveries d
            SET status = 'read',
                read_at = $3,
                delivered_at = COALESCE(d.delivered_at, $3)
            FROM messages m
            WHERE d.message_id = $1
              AND d.recipient_id = $2
              AND d.status IN ('pending', 'delivered')
              AND m.id = d.message_id
            RETURNING m.chat_id
            "#,
        )
        .bind(message_id)
        .bind(recipient_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(chat_id.map(|(id,)| id))
    }

    async fn pending_for_recipient(
        &self,
        recipient_id: i64,
        limit: i64,
    ) -> Result<Vec<OutboundMessage>, AppError> {
        let rows = sqlx::query_as::<_, PendingMessageRow>(
            r#"
            SELECT m.id, m.chat_id, m.sender_id, m.content, m.content_type, m.created_at
            FROM message_deliveries d
            JOIN messages m ON m.id = d.message_id
            WHERE d.recipient_id = $1 AND d.status = 'pending'
            ORDER BY m.id
            LIMIT $2
            "#,
        )
        .bind(recipient_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_message()).collect())
    }

    async fn record(
        &self,
        message_id: i64,
        recipient_id: i64,
    ) -> Result<Option<DeliveryRecord>, AppError> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT message_id, recipient_id, status, delivered_at, read_at, created_at
            FROM message_deliveries
            WHERE message_id = $1 AND recipient_id = $2
            "#,
        )
        .bind(message_id)
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_record()))
    }
}
