//! Room Registry
//!
//! Tracks live connections and their membership in user-scoped and
//! conversation-scoped rooms. A connection's room set is owned by the
//! registry from connect to disconnect; participant add/remove events
//! mutate it while the connection is live.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::ServerEvent;
use crate::infrastructure::metrics;

/// Identifier of one live connection.
pub type ConnectionId = Uuid;

/// A logical broadcast group: all sessions of one user, or all current
/// participants of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomKey {
    User(i64),
    Chat(i64),
}

impl std::fmt::Display for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Chat(id) => write!(f, "chat:{}", id),
        }
    }
}

/// One live connection held by this process.
pub struct ConnectionHandle {
    pub conn_id: ConnectionId,
    pub user_id: i64,
    pub session_id: Uuid,
    sender: mpsc::UnboundedSender<ServerEvent>,
    rooms: RwLock<HashSet<RoomKey>>,
    kill: CancellationToken,
}

impl ConnectionHandle {
    /// Queue an event on this connection's outbound channel.
    ///
    /// Returns `false` when the connection is already gone; callers treat
    /// that as best-effort.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Token cancelled when the server force-disconnects this connection.
    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    pub fn rooms(&self) -> Vec<RoomKey> {
        self.rooms.read().iter().copied().collect()
    }
}

/// Registry of live connections and their room membership.
pub struct RoomRegistry {
    /// Active connections by id
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    /// Room membership (derived, rebuilt from the directory on connect)
    rooms: DashMap<RoomKey, HashSet<ConnectionId>>,
    /// User ID to connection ids (one user can have multiple sessions)
    user_connections: DashMap<i64, Vec<ConnectionId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            user_connections: DashMap::new(),
        }
    }

    /// Register a new connection and join it to its user room.
    ///
    /// Conversation rooms are joined separately via [`join_chats`] before
    /// the connection is marked ready, so no event can arrive in a room the
    /// connection has not joined yet.
    ///
    /// [`join_chats`]: RoomRegistry::join_chats
    pub fn register(
        &self,
        user_id: i64,
        session_id: Uuid,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Arc<ConnectionHandle> {
        let conn_id = Uuid::new_v4();
        let handle = Arc::new(ConnectionHandle {
            conn_id,
            user_id,
            session_id,
            sender,
            rooms: RwLock::new(HashSet::new()),
            kill: CancellationToken::new(),
        });

        self.connections.insert(conn_id, Arc::clone(&handle));
        self.user_connections
            .entry(user_id)
            .or_default()
            .push(conn_id);
        self.join(&handle, RoomKey::User(user_id));

        metrics::CONNECTED_SESSIONS.set(self.connections.len() as i64);
        tracing::info!(
            user_id = user_id,
            session_id = %session_id,
            conn_id = %conn_id,
            "Connection registered"
        );

        handle
    }

    /// Join the connection to every given conversation room.
    pub fn join_chats(&self, handle: &ConnectionHandle, chat_ids: &[i64]) {
        for &chat_id in chat_ids {
            self.join_by_id(handle.conn_id, RoomKey::Chat(chat_id));
        }
    }

    fn join(&self, handle: &ConnectionHandle, room: RoomKey) {
        handle.rooms.write().insert(room);
        self.rooms.entry(room).or_default().insert(handle.conn_id);
    }

    fn join_by_id(&self, conn_id: ConnectionId, room: RoomKey) {
        if let Some(handle) = self.connections.get(&conn_id) {
            self.join(&handle, room);
        }
    }

    fn leave_by_id(&self, conn_id: ConnectionId, room: RoomKey) {
        if let Some(handle) = self.connections.get(&conn_id) {
            handle.rooms.write().remove(&room);
        }
        if let Some(mut members) = self.rooms.get_mut(&room) {
            members.remove(&conn_id);
        }
    }

    /// Remove a connection from the registry and from every room it joined.
    pub fn deregister(&self, conn_id: ConnectionId) {
        if let Some((_, handle)) = self.connections.remove(&conn_id) {
            for room in handle.rooms() {
                if let Some(mut members) = self.rooms.get_mut(&room) {
                    members.remove(&conn_id);
                }
            }
            if let Some(mut conns) = self.user_connections.get_mut(&handle.user_id) {
                conns.retain(|c| *c != conn_id);
            }

            metrics::CONNECTED_SESSIONS.set(self.connections.len() as i64);
            tracing::info!(
                user_id = handle.user_id,
                conn_id = %conn_id,
                "Connection deregistered"
            );
        }
    }

    /// Join all live connections of a user to a conversation room.
    pub fn on_participant_added(&self, user_id: i64, chat_id: i64) {
        for conn_id in self.connections_of_user(user_id) {
            self.join_by_id(conn_id, RoomKey::Chat(chat_id));
        }
        tracing::debug!(user_id, chat_id, "Participant joined chat room");
    }

    /// Remove all live connections of a user from a conversation room.
    pub fn on_participant_removed(&self, user_id: i64, chat_id: i64) {
        for conn_id in self.connections_of_user(user_id) {
            self.leave_by_id(conn_id, RoomKey::Chat(chat_id));
        }
        tracing::debug!(user_id, chat_id, "Participant left chat room");
    }

    /// Connection ids currently in a room.
    pub fn members_of(&self, room: &RoomKey) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Users with at least one live connection in this process.
    pub fn connected_users(&self) -> Vec<i64> {
        self.user_connections
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect()
    }

    fn connections_of_user(&self, user_id: i64) -> Vec<ConnectionId> {
        self.user_connections
            .get(&user_id)
            .map(|conns| conns.clone())
            .unwrap_or_default()
    }

    /// Emit an event to every connection in a room.
    pub fn send_to_room(&self, room: &RoomKey, event: &ServerEvent) {
        self.send_to_room_except(room, event, None);
    }

    /// Emit an event to every connection in a room, skipping all sessions of
    /// the excluded user.
    pub fn send_to_room_except(
        &self,
        room: &RoomKey,
        event: &ServerEvent,
        exclude_user: Option<i64>,
    ) {
        for conn_id in self.members_of(room) {
            if let Some(handle) = self.connections.get(&conn_id) {
                if exclude_user == Some(handle.user_id) {
                    continue;
                }
                if !handle.send(event.clone()) {
                    tracing::debug!(conn_id = %conn_id, "Dropped event for closed connection");
                }
            }
        }
    }

    /// Emit an event to every live session of a user.
    pub fn send_to_user(&self, user_id: i64, event: &ServerEvent) {
        for conn_id in self.connections_of_user(user_id) {
            if let Some(handle) = self.connections.get(&conn_id) {
                let _ = handle.send(event.clone());
            }
        }
    }

    /// Emit an event to every connection in the process, regardless of room.
    pub fn broadcast_all(&self, event: &ServerEvent) {
        for entry in self.connections.iter() {
            if !entry.value().send(event.clone()) {
                tracing::debug!(conn_id = %entry.key(), "Dropped event for closed connection");
            }
        }
    }

    /// Forcibly disconnect all remaining connections.
    ///
    /// Cancels each connection's kill token so its socket handler exits,
    /// then clears the maps.
    pub fn disconnect_all(&self) {
        let count = self.connections.len();
        for entry in self.connections.iter() {
            entry.value().kill.cancel();
        }
        self.connections.clear();
        self.rooms.clear();
        self.user_connections.clear();

        metrics::CONNECTED_SESSIONS.set(0);
        tracing::info!(count, "Force-disconnected remaining connections");
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
