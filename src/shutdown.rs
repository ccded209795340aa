//! Shutdown Coordinator
//!
//! Single-pass ordered drain of the whole process. Phases:
//!
//! 1. Stop accepting new connections (accept token cancelled).
//! 2. Best-effort shutdown notice to every connected session.
//! 3. Stop the delivery queue's retry sweep.
//! 4. Grace window for in-flight handlers.
//! 5. Force-disconnect remaining connections.
//! 6. Close store and broker concurrently.
//!
//! The whole sequence runs under a hard deadline; exceeding it surfaces as
//! an error so the process can force-exit with non-zero status. A second
//! trigger while a shutdown is in progress is a logged no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::ShutdownSettings;
use crate::realtime::{DeliveryQueue, FanoutBridge, RoomRegistry, ServerEvent};

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("graceful shutdown exceeded the {0}s deadline")]
    DeadlineExceeded(u64),
}

pub struct ShutdownCoordinator {
    registry: Arc<RoomRegistry>,
    queue: Arc<DeliveryQueue>,
    bridge: Arc<FanoutBridge>,
    db: PgPool,
    settings: ShutdownSettings,
    accept_token: CancellationToken,
    triggered: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(
        registry: Arc<RoomRegistry>,
        queue: Arc<DeliveryQueue>,
        bridge: Arc<FanoutBridge>,
        db: PgPool,
        settings: ShutdownSettings,
    ) -> Self {
        Self {
            registry,
            queue,
            bridge,
            db,
            settings,
            accept_token: CancellationToken::new(),
            triggered: AtomicBool::new(false),
        }
    }

    /// Token cancelled in phase 1; the server loop uses it to stop
    /// accepting new connections.
    pub fn accept_token(&self) -> CancellationToken {
        self.accept_token.clone()
    }

    /// Whether a shutdown has been triggered.
    pub fn is_shutting_down(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Run the shutdown sequence once.
    ///
    /// Re-entrant triggers (overlapping OS signals) are ignored.
    pub async fn run(&self) -> Result<(), ShutdownError> {
        if self.triggered.swap(true, Ordering::SeqCst) {
            tracing::warn!("Shutdown already in progress, ignoring trigger");
            return Ok(());
        }

        tracing::info!("Shutdown: stopping accept loop");
        self.accept_token.cancel();

        let deadline = Duration::from_secs(self.settings.deadline_secs);
        match timeout(deadline, self.drain()).await {
            Ok(()) => {
                tracing::info!("Shutdown complete");
                Ok(())
            }
            Err(_) => {
                tracing::error!(
                    deadline_secs = self.settings.deadline_secs,
                    "Shutdown deadline exceeded, forcing exit"
                );
                Err(ShutdownError::DeadlineExceeded(self.settings.deadline_secs))
            }
        }
    }

    async fn drain(&self) {
        // Phase 2: notify clients. Send failures are logged inside the
        // registry and never abort the sequence.
        tracing::info!(
            connections = self.registry.connection_count(),
            "Shutdown: notifying connected sessions"
        );
        self.registry.broadcast_all(&ServerEvent::ServerShutdown {
            message: "server shutting down".into(),
            timestamp: Utc::now(),
        });

        // Phase 3: stop queue processing. Pending records stay persisted
        // and are swept again on next startup.
        tracing::info!("Shutdown: stopping delivery queue");
        self.queue.stop().await;

        // Phase 4: grace window for in-flight handlers.
        tracing::info!(
            grace_secs = self.settings.grace_secs,
            "Shutdown: waiting for in-flight work"
        );
        tokio::time::sleep(Duration::from_secs(self.settings.grace_secs)).await;

        // Phase 5: force-disconnect whatever is left.
        tracing::info!("Shutdown: disconnecting remaining sessions");
        self.registry.disconnect_all();

        // Phase 6: close external resources concurrently. Failures are
        // logged by the components themselves and do not block each other.
        tracing::info!("Shutdown: closing external resources");
        tokio::join!(self.db.close(), self.bridge.stop());
    }
}
