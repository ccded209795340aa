//! External collaborator contracts.
//!
//! The delivery subsystem does not own credential issuance, conversation
//! membership, or message persistence; it consumes them through these
//! traits. Infrastructure provides the production implementations, tests
//! substitute in-memory ones.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entities::{ContentType, OutboundMessage};
use crate::shared::error::AppError;

#[cfg(test)]
use mockall::automock;

/// Identity resolved from a connection credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: i64,
    pub session_id: Uuid,
}

/// Authentication failures. The connection is rejected before any room join
/// occurs; no partial state is created.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,

    #[error("invalid credential")]
    Invalid,

    #[error("session expired or revoked")]
    SessionInactive,
}

/// Verifies a connection's bearer credential and resolves it to an identity.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

/// Conversation-membership collaborator.
///
/// Membership reads may be briefly stale relative to the underlying store;
/// room state self-heals through participant events and on reconnect.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    /// Conversations the user currently participates in.
    async fn conversations_of(&self, user_id: i64) -> Result<Vec<i64>, AppError>;

    /// Current participants of a conversation.
    async fn participants_of(&self, chat_id: i64) -> Result<Vec<i64>, AppError>;
}

/// Message-store collaborator. The caller persists a message here first and
/// only then hands it to the delivery queue; the queue never independently
/// decides whether a message exists.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(
        &self,
        chat_id: i64,
        sender_id: Option<i64>,
        content: String,
        content_type: ContentType,
    ) -> Result<OutboundMessage, AppError>;
}
