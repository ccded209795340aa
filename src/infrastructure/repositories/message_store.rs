//! Message Store Implementation
//!
//! PostgreSQL implementation of the `MessageStore` collaborator. Assigns
//! snowflake ids on append; the delivery queue only ever sees messages
//! that already exist in this table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::collaborators::MessageStore;
use crate::domain::entities::{ContentType, OutboundMessage};
use crate::shared::error::AppError;
use crate::shared::snowflake::SnowflakeGenerator;

/// PostgreSQL message store implementation.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
    snowflake: Arc<SnowflakeGenerator>,
}

impl PgMessageStore {
    pub fn new(pool: PgPool, snowflake: Arc<SnowflakeGenerator>) -> Self {
        Self { pool, snowflake }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(
        &self,
        chat_id: i64,
        sender_id: Option<i64>,
        content: String,
        content_type: ContentType,
    ) -> Result<OutboundMessage, AppError> {
        let id = self.snowflake.generate();

        let created_at: (DateTime<Utc>,) = sqlx::query_as(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, content, content_type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING created_at
            "#,
        )
        .bind(id)
        .bind(chat_id)
        .bind(sender_id)
        .bind(&content)
        .bind(content_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboundMessage {
            id,
            chat_id,
            sender_id,
            content,
            content_type,
            created_at: created_at.0,
        })
    }
}
