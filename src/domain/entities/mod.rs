//! Domain entities.

pub mod delivery;
pub mod message;

pub use delivery::{DeliveryRecord, DeliveryRepository, DeliveryStatus};
pub use message::{ContentType, OutboundMessage};
