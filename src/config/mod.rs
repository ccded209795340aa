//! Configuration Management
//!
//! Settings loaded from config files and environment variables.

mod settings;

pub use settings::{
    DatabaseSettings, DeliverySettings, JwtSettings, RedisSettings, ServerSettings, Settings,
    ShutdownSettings, SnowflakeSettings, WebSocketSettings,
};
