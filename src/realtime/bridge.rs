//! Fan-out Bridge
//!
//! Makes room broadcasts correct when recipients' connections are spread
//! across multiple server processes. Every broadcast is emitted to local
//! sockets immediately and published to a shared broker; each subscribing
//! process replays it into its own registry, skipping envelopes it
//! originated itself and suppressing replayed envelope ids, so every event
//! is observed exactly once per process.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::ServerEvent;
use super::registry::{RoomKey, RoomRegistry};
use crate::config::RedisSettings;
use crate::infrastructure::metrics;

/// Prefix of every broker topic published by the bridge. Room topics are
/// `relay.user:<id>` / `relay.chat:<id>`; global and control traffic use
/// [`TOPIC_ALL`] and [`TOPIC_CONTROL`].
const TOPIC_PREFIX: &str = "relay.";
const TOPIC_PATTERN: &str = "relay.*";
const TOPIC_ALL: &str = "relay.all";
const TOPIC_CONTROL: &str = "relay.ctl";

/// Bound of the duplicate-suppression cache.
const SEEN_CAPACITY: usize = 4096;

/// A raw message delivered by the broker.
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Bridge and broker errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("broker unavailable: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("envelope encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker subscription closed")]
    SubscriptionClosed,
}

/// Pub/sub capability the bridge runs on. Backed by Redis in production and
/// by [`InProcessBroker`] in single-instance tests.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError>;

    /// Subscribe to every topic matching the pattern. Returns a channel fed
    /// by a background pump for the lifetime of the broker.
    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<InboundMessage>, BridgeError>;

    /// Liveness probe for readiness checks.
    async fn ping(&self) -> Result<(), BridgeError>;
}

/// Redis-backed broker using one `ConnectionManager` for publishing and a
/// dedicated pub/sub connection per subscription.
pub struct RedisBroker {
    client: redis::Client,
    publish_conn: redis::aio::ConnectionManager,
}

impl RedisBroker {
    /// Connect to Redis. Fails fast when the broker is unreachable; the
    /// system cannot guarantee cross-process delivery without it.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, BridgeError> {
        let client = redis::Client::open(settings.url.as_str())?;
        let publish_conn = redis::aio::ConnectionManager::new(client.clone()).await?;
        tracing::info!("Broker connection established");
        Ok(Self {
            client,
            publish_conn,
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        let mut conn = self.publish_conn.clone();
        let _: () = redis::AsyncCommands::publish(&mut conn, topic, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<InboundMessage>, BridgeError> {
        let (tx, rx) = mpsc::channel(1024);
        let client = self.client.clone();
        let pattern = pattern.to_string();

        // Initial subscription failure is fatal to the caller; later drops
        // are logged and retried with backoff (degraded single-process
        // fan-out until reconnection).
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(&pattern).await?;

        tokio::spawn(async move {
            let mut pubsub = Some(pubsub);
            loop {
                let mut active = match pubsub.take() {
                    Some(ps) => ps,
                    None => match client.get_async_pubsub().await {
                        Ok(mut ps) => match ps.psubscribe(&pattern).await {
                            Ok(()) => ps,
                            Err(e) => {
                                tracing::warn!(error = %e, "Broker resubscribe failed");
                                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                                continue;
                            }
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "Broker reconnect failed");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                            continue;
                        }
                    },
                };

                let mut stream = active.on_message();
                while let Some(msg) = stream.next().await {
                    let inbound = InboundMessage {
                        topic: msg.get_channel_name().to_string(),
                        payload: msg.get_payload_bytes().to_vec(),
                    };
                    if tx.send(inbound).await.is_err() {
                        // Receiver gone; the bridge stopped.
                        return;
                    }
                }

                tracing::warn!("Broker subscription dropped, reconnecting");
            }
        });

        Ok(rx)
    }

    async fn ping(&self) -> Result<(), BridgeError> {
        let mut conn = self.publish_conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-process broker over a `tokio::sync::broadcast` channel. Cloning it
/// and handing each clone to a separate bridge simulates multiple server
/// processes sharing one logical room namespace.
#[derive(Clone)]
pub struct InProcessBroker {
    sender: broadcast::Sender<(String, Vec<u8>)>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        // No subscribers is fine.
        let _ = self.sender.send((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<InboundMessage>, BridgeError> {
        let prefix = pattern.trim_end_matches('*').to_string();
        let mut source = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(1024);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok((topic, payload)) if topic.starts_with(&prefix) => {
                        if tx.send(InboundMessage { topic, payload }).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "In-process broker receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(rx)
    }

    async fn ping(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Cross-process fan-out payload.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: Uuid,
    origin: Uuid,
    kind: EnvelopeKind,
}

#[derive(Debug, Serialize, Deserialize)]
enum EnvelopeKind {
    Room {
        room: RoomKey,
        exclude_user: Option<i64>,
        event: ServerEvent,
    },
    Global {
        event: ServerEvent,
    },
    ParticipantAdded {
        user_id: i64,
        chat_id: i64,
    },
    ParticipantRemoved {
        user_id: i64,
        chat_id: i64,
    },
}

/// Bounded set of recently observed envelope ids.
struct SeenCache {
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
}

impl SeenCache {
    fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(SEEN_CAPACITY),
            ids: HashSet::with_capacity(SEEN_CAPACITY),
        }
    }

    /// Insert an id; returns `false` when it was already present.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }
}

/// Propagates room broadcasts across all server processes sharing the room
/// namespace. Local emit happens inline; remote processes replay the
/// envelope from the broker.
pub struct FanoutBridge {
    broker: Arc<dyn Broker>,
    registry: Arc<RoomRegistry>,
    origin: Uuid,
    seen: Mutex<SeenCache>,
    token: CancellationToken,
    inbound_task: Mutex<Option<JoinHandle<()>>>,
}

impl FanoutBridge {
    /// Subscribe to the room-topic namespace and start the inbound pump.
    ///
    /// Propagates the subscription error when the broker is unreachable at
    /// startup rather than degrading to single-process fan-out.
    pub async fn start(
        broker: Arc<dyn Broker>,
        registry: Arc<RoomRegistry>,
    ) -> Result<Arc<Self>, BridgeError> {
        let mut rx = broker.subscribe(TOPIC_PATTERN).await?;

        let bridge = Arc::new(Self {
            broker,
            registry,
            origin: Uuid::new_v4(),
            seen: Mutex::new(SeenCache::new()),
            token: CancellationToken::new(),
            inbound_task: Mutex::new(None),
        });

        let pump = Arc::clone(&bridge);
        let token = bridge.token.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    inbound = rx.recv() => match inbound {
                        Some(msg) => pump.handle_inbound(msg),
                        None => {
                            tracing::error!("Broker inbound channel closed");
                            break;
                        }
                    }
                }
            }
        });
        *bridge.inbound_task.lock() = Some(task);

        tracing::info!(origin = %bridge.origin, "Fan-out bridge started");
        Ok(bridge)
    }

    /// Broadcast an event to a room across all processes.
    pub async fn broadcast_room(&self, room: &RoomKey, event: ServerEvent) {
        self.broadcast_room_except(room, event, None).await;
    }

    /// Broadcast an event to a room, excluding every session of one user.
    pub async fn broadcast_room_except(
        &self,
        room: &RoomKey,
        event: ServerEvent,
        exclude_user: Option<i64>,
    ) {
        self.registry.send_to_room_except(room, &event, exclude_user);
        let topic = format!("{}{}", TOPIC_PREFIX, room);
        self.publish(
            &topic,
            EnvelopeKind::Room {
                room: *room,
                exclude_user,
                event,
            },
        )
        .await;
    }

    /// Broadcast an event to every connection on every process.
    pub async fn broadcast_all(&self, event: ServerEvent) {
        self.registry.broadcast_all(&event);
        self.publish(TOPIC_ALL, EnvelopeKind::Global { event }).await;
    }

    /// Apply a participant-added event locally and relay it to all
    /// processes so no registry diverges permanently.
    pub async fn participant_added(&self, user_id: i64, chat_id: i64) {
        self.registry.on_participant_added(user_id, chat_id);
        self.publish(TOPIC_CONTROL, EnvelopeKind::ParticipantAdded { user_id, chat_id })
            .await;
    }

    /// Apply a participant-removed event locally and relay it.
    pub async fn participant_removed(&self, user_id: i64, chat_id: i64) {
        self.registry.on_participant_removed(user_id, chat_id);
        self.publish(TOPIC_CONTROL, EnvelopeKind::ParticipantRemoved { user_id, chat_id })
            .await;
    }

    async fn publish(&self, topic: &str, kind: EnvelopeKind) {
        let envelope = Envelope {
            id: Uuid::new_v4(),
            origin: self.origin,
            kind,
        };
        // Remember our own id so a broker echo is also suppressed.
        self.seen.lock().insert(envelope.id);

        let payload = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode fan-out envelope");
                return;
            }
        };

        // Mid-run broker failures degrade to single-process fan-out; the
        // local emit already happened.
        if let Err(e) = self.broker.publish(topic, payload).await {
            tracing::warn!(topic, error = %e, "Broker publish failed");
        } else {
            metrics::FANOUT_PUBLISHED.inc();
        }
    }

    fn handle_inbound(&self, msg: InboundMessage) {
        let envelope: Envelope = match serde_json::from_slice(&msg.payload) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(topic = %msg.topic, error = %e, "Discarding malformed envelope");
                return;
            }
        };

        if envelope.origin == self.origin {
            return;
        }
        if !self.seen.lock().insert(envelope.id) {
            tracing::debug!(id = %envelope.id, "Suppressed duplicate envelope");
            return;
        }

        metrics::FANOUT_RECEIVED.inc();
        match envelope.kind {
            EnvelopeKind::Room {
                room,
                exclude_user,
                event,
            } => self.registry.send_to_room_except(&room, &event, exclude_user),
            EnvelopeKind::Global { event } => self.registry.broadcast_all(&event),
            EnvelopeKind::ParticipantAdded { user_id, chat_id } => {
                self.registry.on_participant_added(user_id, chat_id)
            }
            EnvelopeKind::ParticipantRemoved { user_id, chat_id } => {
                self.registry.on_participant_removed(user_id, chat_id)
            }
        }
    }

    /// Readiness probe against the underlying broker.
    pub async fn ping(&self) -> Result<(), BridgeError> {
        self.broker.ping().await
    }

    /// Stop the inbound pump. Pending local sends are unaffected.
    pub async fn stop(&self) {
        self.token.cancel();
        let task = self.inbound_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::info!("Fan-out bridge stopped");
    }
}
