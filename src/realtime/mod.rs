//! # Real-time Core
//!
//! Message delivery and presence across live connections:
//!
//! - **registry**: room membership per connection (`user:` / `chat:` rooms)
//! - **presence**: session-counted online/offline state per user
//! - **typing**: stateless typing-signal relay
//! - **queue**: at-least-once delivery with per-recipient status records
//!   and a cancellable retry sweep
//! - **bridge**: cross-process fan-out over a pub/sub broker
//! - **events**: wire protocol of the connection channel

pub mod bridge;
pub mod events;
pub mod presence;
pub mod queue;
pub mod registry;
pub mod typing;

pub use bridge::{Broker, BridgeError, FanoutBridge, InProcessBroker, RedisBroker};
pub use events::{ClientEvent, ServerEvent, UserStatus};
pub use presence::PresenceTracker;
pub use queue::{DeliveryQueue, EnqueueError};
pub use registry::{ConnectionHandle, ConnectionId, RoomKey, RoomRegistry};
pub use typing::TypingBroadcaster;
