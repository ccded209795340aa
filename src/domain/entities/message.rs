//! Outbound message entity.
//!
//! Maps to the `messages` table in the database schema. A message is
//! persisted by the message-store collaborator before it is handed to the
//! delivery queue, and is immutable once enqueued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type discriminator, stored as a constrained varchar in the
/// `messages` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Plain text message
    #[default]
    Text,
    /// Image attachment reference
    Image,
    /// Generic file attachment reference
    File,
    /// Server-generated system message
    System,
}

impl ContentType {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "text" => Self::Text,
            "image" => Self::Image,
            "file" => Self::File,
            "system" => Self::System,
            _ => Self::Text,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An already-persisted message handed to the delivery queue.
///
/// Maps to the `messages` table:
/// - id: BIGINT PRIMARY KEY (Snowflake ID)
/// - chat_id: BIGINT NOT NULL REFERENCES chats(id)
/// - sender_id: BIGINT NULL REFERENCES users(id) -- NULL for system messages
/// - content: TEXT NOT NULL
/// - content_type: VARCHAR(16) NOT NULL DEFAULT 'text'
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Snowflake ID (primary key)
    pub id: i64,

    /// Conversation the message belongs to
    pub chat_id: i64,

    /// Author user ID; `None` marks a system message
    pub sender_id: Option<i64>,

    /// Message content
    pub content: String,

    /// Content type discriminator
    pub content_type: ContentType,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl OutboundMessage {
    /// Check whether this is a server-generated system message.
    pub fn is_system(&self) -> bool {
        self.sender_id.is_none()
    }
}
