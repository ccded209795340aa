//! Application Error Types
//!
//! Centralized error type for the store-facing collaborators. Transport
//! and subsystem failures carry their own typed errors (`AuthError`,
//! `EnqueueError`, `BridgeError`, `ShutdownError`); this type covers what
//! the repositories and directories surface.

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
