//! Typing Broadcaster
//!
//! Ephemeral signal relay. Nothing is persisted, nothing is retried, and
//! the server keeps no timeout state; clients clear the indicator
//! themselves after a few seconds without a refresh.

use std::sync::Arc;

use super::bridge::FanoutBridge;
use super::events::ServerEvent;
use super::registry::RoomKey;

pub struct TypingBroadcaster {
    bridge: Arc<FanoutBridge>,
}

impl TypingBroadcaster {
    pub fn new(bridge: Arc<FanoutBridge>) -> Self {
        Self { bridge }
    }

    /// Relay a typing signal to all other members of the conversation.
    ///
    /// All of the sender's own sessions are excluded. A room with no
    /// connected members is a silent no-op.
    pub async fn on_typing(&self, chat_id: i64, user_id: i64) {
        self.bridge
            .broadcast_room_except(
                &RoomKey::Chat(chat_id),
                ServerEvent::TypingStart { chat_id, user_id },
                Some(user_id),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::bridge::{Broker, FanoutBridge, InProcessBroker};
    use crate::realtime::registry::RoomRegistry;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    async fn broadcaster() -> (Arc<RoomRegistry>, TypingBroadcaster) {
        let registry = Arc::new(RoomRegistry::new());
        let broker: Arc<dyn Broker> = Arc::new(InProcessBroker::new());
        let bridge = FanoutBridge::start(broker, registry.clone()).await.unwrap();
        (registry, TypingBroadcaster::new(bridge))
    }

    #[tokio::test]
    async fn typing_excludes_every_session_of_the_typist() {
        let (registry, typing) = broadcaster().await;

        let (tx1, mut typist_rx) = mpsc::unbounded_channel();
        let typist = registry.register(1, Uuid::new_v4(), tx1);
        registry.join_chats(&typist, &[5]);

        let (tx2, mut other_rx) = mpsc::unbounded_channel();
        let other = registry.register(2, Uuid::new_v4(), tx2);
        registry.join_chats(&other, &[5]);

        typing.on_typing(5, 1).await;

        assert!(matches!(
            other_rx.try_recv(),
            Ok(ServerEvent::TypingStart { chat_id: 5, user_id: 1 })
        ));
        assert!(typist_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_into_an_empty_room_is_a_silent_noop() {
        let (_registry, typing) = broadcaster().await;
        typing.on_typing(99, 1).await;
    }
}
