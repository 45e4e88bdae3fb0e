//! Purchase queue HTTP server.
//!
//! Wires Redis (admission decisions, queue configs), `PostgreSQL` (audit
//! trail), the background sweeper and the Axum router, then serves until
//! SIGINT/SIGTERM.

use purchase_queue::{
    AdmissionController, AppState, Config, QueueManager, QueueSweeper, StatsPublisher,
    build_router,
};
use purchase_queue_core::environment::SystemClock;
use purchase_queue_postgres::PostgresAuditStore;
use purchase_queue_redis::{RedisAdmissionStore, RedisConfigRepository};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "purchase_queue=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting purchase queue server");
    let config = Config::from_env();

    let metrics_handle = match purchase_queue::metrics::install() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    info!("Connecting to Redis...");
    let redis = purchase_queue_redis::connect(&config.redis.url).await?;
    let admission = Arc::new(RedisAdmissionStore::from_manager(redis.clone()));
    let configs = Arc::new(RedisConfigRepository::from_manager(redis));
    info!("Redis connected");

    info!("Connecting to PostgreSQL...");
    let audit = PostgresAuditStore::with_settings(&config.postgres.url, config.pool_settings()).await?;
    audit.migrate().await?;
    info!("PostgreSQL connected, audit schema ready");

    let controller = AdmissionController::new(admission, configs.clone(), Arc::new(SystemClock))
        .with_avg_seconds_per_buyer(config.queue.avg_seconds_per_buyer);
    let manager = Arc::new(QueueManager::new(controller, configs, Arc::new(audit)));

    let shutdown = CancellationToken::new();
    let stats = StatsPublisher::from_controller(manager.controller())
        .with_interval(config.stats_interval())
        .with_buffer(config.queue.stream_buffer)
        .with_shutdown(shutdown.child_token());
    let sweeper = Arc::new(QueueSweeper::new(manager.clone()).with_interval(config.sweep_interval()));

    let sweeper_handle = sweeper.clone().start(shutdown.child_token());

    let mut state = AppState::new(manager).with_stats(stats).with_sweeper(sweeper);
    if let Some(handle) = metrics_handle {
        state = state.with_metrics(handle);
    }
    let app = build_router(state);

    let addr = config.server_addr();
    info!(address = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    // Cancelling the token also ends every stats stream, so open SSE
    // connections drain with the rest.
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let drain_deadline = {
        let shutdown = shutdown.clone();
        let budget = config.shutdown_timeout();
        async move {
            shutdown.cancelled().await;
            tokio::time::sleep(budget).await;
        }
    };
    tokio::select! {
        result = server => result?,
        () = drain_deadline => {
            warn!("Connections still open after the shutdown timeout, closing");
        }
    }

    info!("HTTP server stopped, waiting for sweeper");
    if tokio::time::timeout(config.shutdown_timeout(), sweeper_handle)
        .await
        .is_err()
    {
        warn!("Sweeper did not stop within the shutdown timeout");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
