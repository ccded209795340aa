//! Delivery Queue
//!
//! At-least-once message fan-out with per-recipient delivery bookkeeping.
//! Enqueue persists one `pending` record per recipient and broadcasts the
//! message to the conversation room; recipients acknowledge receipt and
//! reads through idempotent, monotonic status transitions. A background
//! retry sweep re-emits still-pending messages to recipients that have
//! reconnected, which also covers catch-up after a process restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::bridge::FanoutBridge;
use super::events::ServerEvent;
use super::registry::{RoomKey, RoomRegistry};
use crate::config::DeliverySettings;
use crate::domain::entities::{DeliveryRepository, OutboundMessage};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// Delay between local retries of a failed delivery-record write.
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Enqueue failures surfaced to the caller.
///
/// The message itself is never lost here; it was durably stored upstream
/// before enqueue. Only the per-recipient bookkeeping failed and needs a
/// repair path.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("failed to persist delivery records for {failed} of {total} recipients")]
    Persistence { failed: usize, total: usize },
}

pub struct DeliveryQueue {
    repo: Arc<dyn DeliveryRepository>,
    registry: Arc<RoomRegistry>,
    bridge: Arc<FanoutBridge>,
    settings: DeliverySettings,
    sweep_token: CancellationToken,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryQueue {
    pub fn new(
        repo: Arc<dyn DeliveryRepository>,
        registry: Arc<RoomRegistry>,
        bridge: Arc<FanoutBridge>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            repo,
            registry,
            bridge,
            settings,
            sweep_token: CancellationToken::new(),
            sweep_task: Mutex::new(None),
        }
    }

    /// Enqueue an already-persisted message for a set of recipients.
    ///
    /// Creates a `pending` record per recipient (idempotent under duplicate
    /// calls), then broadcasts `message:new` to the conversation room so
    /// every currently-connected recipient session receives it immediately.
    /// Recipients with no live session stay `pending` for the retry sweep.
    pub async fn enqueue(
        &self,
        message: &OutboundMessage,
        recipients: &[i64],
    ) -> Result<(), EnqueueError> {
        let mut failed = 0usize;
        for &recipient_id in recipients {
            if !self.create_record_with_retry(message.id, recipient_id).await {
                failed += 1;
            }
        }

        // Fan out even when some records failed: the message is durable
        // upstream and connected recipients should still see it.
        self.bridge
            .broadcast_room(
                &RoomKey::Chat(message.chat_id),
                ServerEvent::MessageNew {
                    message: message.clone(),
                },
            )
            .await;

        if failed > 0 {
            Err(EnqueueError::Persistence {
                failed,
                total: recipients.len(),
            })
        } else {
            Ok(())
        }
    }

    async fn create_record_with_retry(&self, message_id: i64, recipient_id: i64) -> bool {
        // One initial attempt plus `persist_retries` retries.
        let attempts = self.settings.persist_retries + 1;
        for attempt in 1..=attempts {
            match self.repo.create_pending(message_id, recipient_id).await {
                Ok(_created) => return true,
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        message_id,
                        recipient_id,
                        attempt,
                        error = %e,
                        "Delivery record write failed, retrying"
                    );
                    tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::error!(
                        message_id,
                        recipient_id,
                        error = %e,
                        "Delivery record write failed after {} attempts",
                        attempts
                    );
                }
            }
        }
        false
    }

    /// Transition `pending -> delivered` for one (message, recipient) pair.
    ///
    /// Idempotent: duplicate acknowledgments from multi-session clients are
    /// silent no-ops. On a real transition, broadcasts `message:delivered`
    /// to the conversation room so the sender observes the receipt.
    pub async fn acknowledge(&self, message_id: i64, recipient_id: i64) -> Result<(), AppError> {
        match self.repo.mark_delivered(message_id, recipient_id, Utc::now()).await? {
            Some(chat_id) => {
                metrics::DELIVERY_TRANSITIONS
                    .with_label_values(&["delivered"])
                    .inc();
                self.bridge
                    .broadcast_room(
                        &RoomKey::Chat(chat_id),
                        ServerEvent::MessageDelivered {
                            message_id,
                            recipient_user_id: recipient_id,
                        },
                    )
                    .await;
            }
            None => {
                tracing::trace!(message_id, recipient_id, "Duplicate delivery ack ignored");
            }
        }
        Ok(())
    }

    /// Transition to `read` for one (message, recipient) pair.
    ///
    /// Auto-promotes straight from `pending` when no separate delivery
    /// acknowledgment ever arrived. No-op when already `read`.
    pub async fn mark_read(&self, message_id: i64, recipient_id: i64) -> Result<(), AppError> {
        match self.repo.mark_read(message_id, recipient_id, Utc::now()).await? {
            Some(chat_id) => {
                metrics::DELIVERY_TRANSITIONS
                    .with_label_values(&["read"])
                    .inc();
                self.bridge
                    .broadcast_room(
                        &RoomKey::Chat(chat_id),
                        ServerEvent::MessageRead {
                            message_id,
                            recipient_user_id: recipient_id,
                        },
                    )
                    .await;
            }
            None => {
                tracing::trace!(message_id, recipient_id, "Duplicate read receipt ignored");
            }
        }
        Ok(())
    }

    /// Start the background retry sweep.
    ///
    /// Each tick re-emits pending messages to recipients that are connected
    /// to this process; records advance only when the client acknowledges,
    /// so delivery stays at-least-once. The task checks its cancellation
    /// token at iteration boundaries and is resumable on next start.
    pub fn start_sweep(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        let token = self.sweep_token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(queue.settings.sweep_interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the immediate first tick.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                queue.sweep_once(&token).await;
            }
            tracing::info!("Retry sweep stopped");
        });

        *self.sweep_task.lock() = Some(task);
        tracing::info!(
            interval_secs = self.settings.sweep_interval_secs,
            "Retry sweep started"
        );
    }

    /// One sweep iteration over all locally-connected users.
    ///
    /// Sweeping only local connections keeps the sweep duplicate-free
    /// across processes: each process retries exactly the recipients whose
    /// sockets it holds.
    async fn sweep_once(&self, token: &CancellationToken) {
        for user_id in self.registry.connected_users() {
            if token.is_cancelled() {
                return;
            }
            match self
                .repo
                .pending_for_recipient(user_id, self.settings.sweep_batch)
                .await
            {
                Ok(messages) if messages.is_empty() => {}
                Ok(messages) => {
                    tracing::debug!(
                        user_id,
                        count = messages.len(),
                        "Re-emitting pending backlog"
                    );
                    for message in messages {
                        metrics::DELIVERIES_RETRIED.inc();
                        self.registry
                            .send_to_user(user_id, &ServerEvent::MessageNew { message });
                    }
                }
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Pending backlog query failed");
                }
            }
        }
    }

    /// Halt the retry sweep without discarding persisted pending records.
    ///
    /// Idempotent; on next startup the sweep resumes from the store and
    /// catches up.
    pub async fn stop(&self) {
        self.sweep_token.cancel();
        let task = self.sweep_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
