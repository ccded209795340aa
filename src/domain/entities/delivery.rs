//! Delivery record entity and repository trait.
//!
//! One `DeliveryRecord` exists per (message, recipient) pair. Status moves
//! only forward: pending -> delivered -> read, or pending -> read directly
//! when the read receipt arrives before the delivery acknowledgment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::OutboundMessage;
use crate::shared::error::AppError;

/// Per-recipient delivery status, stored as a constrained varchar in the
/// `message_deliveries` table.
///
/// The derived `Ord` encodes the monotonic transition order; a record may
/// only move to a strictly greater status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Record created, recipient has not acknowledged receipt
    #[default]
    Pending,
    /// Recipient session acknowledged receipt
    Delivered,
    /// Recipient marked the message as read; terminal
    Read,
}

impl DeliveryStatus {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "delivered" => Self::Delivered,
            "read" => Self::Read,
            _ => Self::Pending,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Whether a transition to `next` is allowed.
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        next > self
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-recipient delivery bookkeeping for one message.
///
/// Maps to the `message_deliveries` table:
/// - message_id: BIGINT NOT NULL REFERENCES messages(id)
/// - recipient_id: BIGINT NOT NULL REFERENCES users(id)
/// - status: VARCHAR(16) NOT NULL DEFAULT 'pending'
/// - delivered_at: TIMESTAMPTZ NULL
/// - read_at: TIMESTAMPTZ NULL
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// - PRIMARY KEY (message_id, recipient_id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub message_id: i64,
    pub recipient_id: i64,
    pub status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Data access contract for delivery records.
///
/// Status transitions are conditional updates so concurrent acknowledgments
/// from multiple sessions of the same recipient linearize safely: a call
/// that finds the record already at (or past) the target status is a no-op.
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Create a `pending` record for (message, recipient) if none exists.
    ///
    /// Returns `true` when a new record was created, `false` when the pair
    /// already had one. Idempotent under duplicate enqueue calls.
    async fn create_pending(&self, message_id: i64, recipient_id: i64) -> Result<bool, AppError>;

    /// Conditionally transition `pending -> delivered`, recording `delivered_at`.
    ///
    /// Returns the chat id of the owning message when the transition was
    /// applied, `None` when the record was absent or already past `pending`.
    async fn mark_delivered(
        &self,
        message_id: i64,
        recipient_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError>;

    /// Conditionally transition `pending|delivered -> read`, recording
    /// `read_at` and backfilling `delivered_at` if the acknowledgment was
    /// never separately received.
    ///
    /// Returns the chat id of the owning message when the transition was
    /// applied, `None` when the record was absent or already `read`.
    async fn mark_read(
        &self,
        message_id: i64,
        recipient_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError>;

    /// Messages still `pending` for a recipient, oldest first, joined with
    /// their source messages so they can be re-emitted by the retry sweep.
    async fn pending_for_recipient(
        &self,
        recipient_id: i64,
        limit: i64,
    ) -> Result<Vec<OutboundMessage>, AppError>;

    /// Fetch a single delivery record.
    async fn record(
        &self,
        message_id: i64,
        recipient_id: i64,
    ) -> Result<Option<DeliveryRecord>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_order_is_monotonic() {
        assert!(DeliveryStatus::Pending < DeliveryStatus::Delivered);
        assert!(DeliveryStatus::Delivered < DeliveryStatus::Read);
    }

    #[test]
    fn transitions_only_move_forward() {
        use DeliveryStatus::*;
        assert!(Pending.can_advance_to(Delivered));
        assert!(Pending.can_advance_to(Read));
        assert!(Delivered.can_advance_to(Read));

        assert!(!Delivered.can_advance_to(Pending));
        assert!(!Read.can_advance_to(Delivered));
        assert!(!Read.can_advance_to(Pending));
        assert!(!Pending.can_advance_to(Pending));
    }

    #[test]
    fn status_round_trips_db_strings() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Delivered,
            DeliveryStatus::Read,
        ] {
            assert_eq!(DeliveryStatus::from_str(status.as_str()), status);
        }
    }
}
