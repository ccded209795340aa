//! # Chat Relay Library
//!
//! This crate provides the real-time delivery and presence backbone of a
//! chat platform:
//! - WebSocket gateway with first-frame authentication
//! - Room-scoped fan-out across processes via Redis pub/sub
//! - At-least-once message delivery with read receipts
//! - Presence tracking and typing indicators
//! - Coordinated graceful shutdown
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Core entities and repository traits
//! - **Realtime Layer**: Connection registry, presence, fan-out, and delivery
//! - **Infrastructure Layer**: Database, broker, and metrics implementations
//! - **Presentation Layer**: HTTP handlers and the WebSocket endpoint
//!
//! ## Module Structure
//!
//! ```text
//! chat_relay/
//! +-- config/         Configuration management
//! +-- domain/         Domain entities and collaborator traits
//! +-- realtime/       Registry, presence, typing, fan-out, delivery queue
//! +-- infrastructure/ Database, repositories, and metrics
//! +-- presentation/   HTTP routes and the WebSocket handler
//! +-- shared/         Common utilities (errors, snowflake IDs)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core entities and traits
pub mod domain;

// Realtime layer - Connection registry, presence, fan-out, delivery
pub mod realtime;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Graceful shutdown coordination
pub mod shutdown;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
