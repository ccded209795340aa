//! Wire events exchanged on the connection channel.
//!
//! Both directions use a tagged `{event, data}` envelope serialized as JSON
//! text frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::{ContentType, OutboundMessage};

/// Presence status carried by `user:status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Events accepted from a client connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// First frame after the upgrade; carries the bearer credential.
    #[serde(rename = "auth")]
    Auth { token: String },

    #[serde(rename = "message:send")]
    MessageSend {
        chat_id: i64,
        content: String,
        #[serde(default)]
        content_type: Option<ContentType>,
    },

    #[serde(rename = "message:ack")]
    MessageAck { message_id: i64 },

    #[serde(rename = "message:read")]
    MessageRead { message_id: i64 },

    #[serde(rename = "typing:start")]
    TypingStart { chat_id: i64 },
}

/// Events emitted to a client connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connection:success")]
    ConnectionSuccess {
        user_id: i64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "message:new")]
    MessageNew { message: OutboundMessage },

    #[serde(rename = "message:delivered")]
    MessageDelivered {
        message_id: i64,
        recipient_user_id: i64,
    },

    #[serde(rename = "message:read")]
    MessageRead {
        message_id: i64,
        recipient_user_id: i64,
    },

    #[serde(rename = "user:status")]
    UserStatus {
        user_id: i64,
        status: UserStatus,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "typing:start")]
    TypingStart { chat_id: i64, user_id: i64 },

    #[serde(rename = "server:shutdown")]
    ServerShutdown {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Sender-local failure report; never broadcast.
    #[serde(rename = "error")]
    Error { message: String },
}
