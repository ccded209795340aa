//! Infrastructure Layer
//!
//! Implementations for external services:
//! - PostgreSQL repositories and collaborator implementations
//! - Redis pub/sub transport lives in `realtime::bridge`
//! - Prometheus metrics

pub mod database;
pub mod metrics;
pub mod repositories;
