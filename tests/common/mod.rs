//! Common Test Utilities
//!
//! Shared helpers and test infrastructure: an in-memory delivery record
//! store, a single-process realtime stack builder, and channel helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use chat_relay::config::DeliverySettings;
use chat_relay::domain::entities::{
    ContentType, DeliveryRecord, DeliveryRepository, DeliveryStatus, OutboundMessage,
};
use chat_relay::realtime::{
    Broker, ConnectionHandle, DeliveryQueue, FanoutBridge, InProcessBroker, RoomRegistry,
    ServerEvent,
};
use chat_relay::shared::error::AppError;

/// In-memory implementation of the delivery record store.
///
/// Honors the same conditional-transition semantics as the Postgres
/// implementation: duplicate creates are no-ops and status only moves
/// forward.
pub struct InMemoryDeliveryRepository {
    records: Mutex<HashMap<(i64, i64), DeliveryRecord>>,
    messages: Mutex<HashMap<i64, OutboundMessage>>,
    failing_creates: AtomicUsize,
}

impl InMemoryDeliveryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            failing_creates: AtomicUsize::new(0),
        })
    }

    /// Register a message so delivery records can resolve its chat.
    pub fn insert_message(&self, message: &OutboundMessage) {
        self.messages.lock().insert(message.id, message.clone());
    }

    /// Make the next `n` calls to `create_pending` fail.
    pub fn fail_next_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    pub fn status_of(&self, message_id: i64, recipient_id: i64) -> Option<DeliveryStatus> {
        self.records
            .lock()
            .get(&(message_id, recipient_id))
            .map(|r| r.status)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    fn chat_of(&self, message_id: i64) -> Result<i64, AppError> {
        self.messages
            .lock()
            .get(&message_id)
            .map(|m| m.chat_id)
            .ok_or_else(|| AppError::NotFound(format!("message {}", message_id)))
    }

    fn take_failure(&self) -> bool {
        self.failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryDeliveryRepository {
    async fn create_pending(&self, message_id: i64, recipient_id: i64) -> Result<bool, AppError> {
        if self.take_failure() {
            return Err(AppError::Internal("simulated write failure".into()));
        }
        let mut records = self.records.lock();
        if records.contains_key(&(message_id, recipient_id)) {
            return Ok(false);
        }
        records.insert(
            (message_id, recipient_id),
            DeliveryRecord {
                message_id,
                recipient_id,
                status: DeliveryStatus::Pending,
                delivered_at: None,
                read_at: None,
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn mark_delivered(
        &self,
        message_id: i64,
        recipient_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError> {
        let mut records = self.records.lock();
        match records.get_mut(&(message_id, recipient_id)) {
            Some(record) if record.status == DeliveryStatus::Pending => {
                record.status = DeliveryStatus::Delivered;
                record.delivered_at = Some(at);
                drop(records);
                Ok(Some(self.chat_of(message_id)?))
            }
            _ => Ok(None),
        }
    }

    async fn mark_read(
        &self,
        message_id: i64,
        recipient_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError> {
        let mut records = self.records.lock();
        match records.get_mut(&(message_id, recipient_id)) {
            Some(record) if record.status != DeliveryStatus::Read => {
                record.status = DeliveryStatus::Read;
                record.read_at = Some(at);
                record.delivered_at.get_or_insert(at);
                drop(records);
                Ok(Some(self.chat_of(message_id)?))
            }
            _ => Ok(None),
        }
    }

    async fn pending_for_recipient(
        &self,
        recipient_id: i64,
        limit: i64,
    ) -> Result<Vec<OutboundMessage>, AppError> {
        let records = self.records.lock();
        let messages = self.messages.lock();
        let mut pending: Vec<OutboundMessage> = records
            .values()
            .filter(|r| r.recipient_id == recipient_id && r.status == DeliveryStatus::Pending)
            .filter_map(|r| messages.get(&r.message_id).cloned())
            .collect();
        pending.sort_by_key(|m| m.id);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn record(
        &self,
        message_id: i64,
        recipient_id: i64,
    ) -> Result<Option<DeliveryRecord>, AppError> {
        Ok(self.records.lock().get(&(message_id, recipient_id)).cloned())
    }
}

/// A single-process realtime stack over the in-process broker.
pub struct TestStack {
    pub repo: Arc<InMemoryDeliveryRepository>,
    pub registry: Arc<RoomRegistry>,
    pub bridge: Arc<FanoutBridge>,
    pub queue: Arc<DeliveryQueue>,
}

pub fn delivery_settings() -> DeliverySettings {
    DeliverySettings {
        sweep_interval_secs: 5,
        sweep_batch: 100,
        persist_retries: 3,
    }
}

pub async fn build_stack() -> TestStack {
    let repo = InMemoryDeliveryRepository::new();
    let registry = Arc::new(RoomRegistry::new());
    let broker: Arc<dyn Broker> = Arc::new(InProcessBroker::new());
    let bridge = FanoutBridge::start(broker, registry.clone())
        .await
        .expect("bridge start");
    let queue = Arc::new(DeliveryQueue::new(
        repo.clone() as Arc<dyn DeliveryRepository>,
        registry.clone(),
        bridge.clone(),
        delivery_settings(),
    ));
    TestStack {
        repo,
        registry,
        bridge,
        queue,
    }
}

/// Register a connection for `user_id` joined to the given chat rooms.
pub fn connect(
    registry: &RoomRegistry,
    user_id: i64,
    chat_ids: &[i64],
) -> (Arc<ConnectionHandle>, mpsc::UnboundedReceiver<ServerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = registry.register(user_id, Uuid::new_v4(), tx);
    registry.join_chats(&handle, chat_ids);
    (handle, rx)
}

pub fn text_message(id: i64, chat_id: i64, sender_id: i64) -> OutboundMessage {
    OutboundMessage {
        id,
        chat_id,
        sender_id: Some(sender_id),
        content: format!("message {}", id),
        content_type: ContentType::Text,
        created_at: Utc::now(),
    }
}

pub async fn recv_within(
    rx: &mut mpsc::UnboundedReceiver<ServerEvent>,
    timeout: Duration,
) -> Option<ServerEvent> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

/// Drain everything currently queued on a connection channel.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
