//! Conversation Directory Implementation
//!
//! PostgreSQL implementation of the `ConversationDirectory` collaborator,
//! backed by the `chat_participants` table.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::collaborators::ConversationDirectory;
use crate::shared::error::AppError;

/// PostgreSQL conversation directory implementation.
#[derive(Clone)]
pub struct PgConversationDirectory {
    pool: PgPool,
}

impl PgConversationDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationDirectory for PgConversationDirectory {
    async fn conversations_of(&self, user_id: i64) -> Result<Vec<i64>, AppError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT chat_id
            FROM chat_participants
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn participants_of(&self, chat_id: i64) -> Result<Vec<i64>, AppError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT user_id
            FROM chat_participants
            WHERE chat_id = $1
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
