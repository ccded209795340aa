//! Prometheus Metrics Module
//!
//! Application-wide metrics for the delivery subsystem.
//!
//! # Metrics Collected
//! - Active WebSocket connection and online-user gauges
//! - Fan-out publish/receive counters
//! - Delivery status transition and retry counters

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Live WebSocket connections held by this process
pub static CONNECTED_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("connected_sessions", "Number of live WebSocket connections")
            .namespace("chat_relay"),
    )
    .expect("Failed to create CONNECTED_SESSIONS metric")
});

/// Users with at least one active session on this process
pub static ONLINE_USERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("online_users", "Number of users with at least one active session")
            .namespace("chat_relay"),
    )
    .expect("Failed to create ONLINE_USERS metric")
});

/// Envelopes published to the fan-out broker
pub static FANOUT_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("fanout_published_total", "Envelopes published to the broker")
            .namespace("chat_relay"),
    )
    .expect("Failed to create FANOUT_PUBLISHED metric")
});

/// Envelopes received from remote processes and applied locally
pub static FANOUT_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("fanout_received_total", "Remote envelopes applied locally")
            .namespace("chat_relay"),
    )
    .expect("Failed to create FANOUT_RECEIVED metric")
});

/// Delivery status transitions by target status
pub static DELIVERY_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "delivery_transitions_total",
            "Delivery record status transitions",
        )
        .namespace("chat_relay"),
        &["status"],
    )
    .expect("Failed to create DELIVERY_TRANSITIONS metric")
});

/// Pending messages re-emitted by the retry sweep
pub static DELIVERIES_RETRIED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "deliveries_retried_total",
            "Pending messages re-emitted by the retry sweep",
        )
        .namespace("chat_relay"),
    )
    .expect("Failed to create DELIVERIES_RETRIED metric")
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(CONNECTED_SESSIONS.clone()))
        .expect("Failed to register CONNECTED_SESSIONS");
    registry
        .register(Box::new(ONLINE_USERS.clone()))
        .expect("Failed to register ONLINE_USERS");
    registry
        .register(Box::new(FANOUT_PUBLISHED.clone()))
        .expect("Failed to register FANOUT_PUBLISHED");
    registry
        .register(Box::new(FANOUT_RECEIVED.clone()))
        .expect("Failed to register FANOUT_RECEIVED");
    registry
        .register(Box::new(DELIVERY_TRANSITIONS.clone()))
        .expect("Failed to register DELIVERY_TRANSITIONS");
    registry
        .register(Box::new(DELIVERIES_RETRIED.clone()))
        .expect("Failed to register DELIVERIES_RETRIED");
}

/// Encode all registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_registered_metrics() {
        CONNECTED_SESSIONS.set(3);
        let output = gather_metrics();
        assert!(output.contains("chat_relay_connected_sessions"));
    }
}
