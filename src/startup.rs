//! Application Startup
//!
//! Wires the delivery subsystem together and runs the server. All shared
//! components are explicitly constructed here and passed by reference;
//! nothing is an ambient singleton, so tests can build independent stacks.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;

use crate::config::Settings;
use crate::domain::{ConversationDirectory, MessageStore, TokenVerifier};
use crate::infrastructure::database;
use crate::infrastructure::repositories::{
    JwtTokenVerifier, PgConversationDirectory, PgDeliveryRepository, PgMessageStore,
};
use crate::presentation::http::routes;
use crate::presentation::middleware::{create_cors_layer, create_trace_layer};
use crate::realtime::{
    DeliveryQueue, FanoutBridge, PresenceTracker, RedisBroker, RoomRegistry, TypingBroadcaster,
};
use crate::shared::snowflake::SnowflakeGenerator;
use crate::shutdown::ShutdownCoordinator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: PgPool,
    pub registry: Arc<RoomRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub typing: Arc<TypingBroadcaster>,
    pub queue: Arc<DeliveryQueue>,
    pub bridge: Arc<FanoutBridge>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub directory: Arc<dyn ConversationDirectory>,
    pub messages: Arc<dyn MessageStore>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    state: AppState,
}

impl Application {
    /// Build the application from settings.
    ///
    /// Fails fast when the database or the broker is unreachable; the
    /// system cannot guarantee cross-process delivery without the broker.
    pub async fn build(settings: Settings) -> Result<Self> {
        let db = database::create_pool(&settings.database).await?;
        database::run_migrations(&db).await?;
        tracing::info!("Database connection pool created");

        let broker = Arc::new(RedisBroker::connect(&settings.redis).await?);

        let registry = Arc::new(RoomRegistry::new());
        let presence = Arc::new(PresenceTracker::new());
        let bridge = FanoutBridge::start(broker, Arc::clone(&registry)).await?;
        let typing = Arc::new(TypingBroadcaster::new(Arc::clone(&bridge)));

        let queue = Arc::new(DeliveryQueue::new(
            Arc::new(PgDeliveryRepository::new(db.clone())),
            Arc::clone(&registry),
            Arc::clone(&bridge),
            settings.delivery.clone(),
        ));
        queue.start_sweep();

        let snowflake = Arc::new(SnowflakeGenerator::new(settings.snowflake.machine_id as u64));

        let shutdown = Arc::new(ShutdownCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&bridge),
            db.clone(),
            settings.shutdown.clone(),
        ));

        let state = AppState {
            settings: Arc::new(settings.clone()),
            db: db.clone(),
            registry,
            presence,
            typing,
            queue,
            bridge,
            verifier: Arc::new(JwtTokenVerifier::new(&settings.jwt.secret, db.clone())),
            directory: Arc::new(PgConversationDirectory::new(db.clone())),
            messages: Arc::new(PgMessageStore::new(db, snowflake)),
            shutdown,
        };

        let router = routes::create_router(state.clone())
            .layer(create_trace_layer())
            .layer(create_cors_layer());

        let addr: SocketAddr =
            format!("{}:{}", settings.server.host, settings.server.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            state,
        })
    }

    /// Run the server until a shutdown signal completes the drain.
    ///
    /// When the drain exceeds its hard deadline the process force-exits
    /// with non-zero status regardless of remaining work.
    pub async fn run_until_stopped(self) -> Result<()> {
        let coordinator = Arc::clone(&self.state.shutdown);
        let accept_token = coordinator.accept_token();

        let drain = tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Shutdown signal received");
            coordinator.run().await
        });

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(accept_token.cancelled_owned())
            .await?;

        // The server loop exits once the accept token cancels (phase 1);
        // the remaining phases, including closing the store and broker,
        // must finish before the process may exit.
        match drain.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Forcing exit after failed drain");
                std::process::exit(1);
            }
            Err(e) => {
                tracing::error!(error = %e, "Shutdown task failed");
                std::process::exit(1);
            }
        }
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
