//! synckairos-server — stateless cluster instance.
//!
//! Bootstrap order (torn down in reverse under the shutdown deadline):
//! audit pool + workers, Redis store, store subscription, delivery layer
//! + heartbeat, coordination consumer, HTTP/WS server.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use synckairos_audit::{AuditQueue, AuditRepository, AuditWorkerPool};
use synckairos_core::clock::SystemClock;
use synckairos_core::ports::AuditSink;
use synckairos_core::SessionService;
use synckairos_redis::{subscriber, RedisSessionStore};
use synckairos_server::config::Config;
use synckairos_server::coordination;
use synckairos_server::router::build_router;
use synckairos_server::state::AppState;
use synckairos_server::ws::{heartbeat, registry::ConnectionRegistry};

/// Capacity of the subscriber → delivery channel.
const EVENT_CHANNEL_DEPTH: usize = 1_024;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "startup failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(port = config.port, "starting synckairos-server");

    // Audit pipeline: Postgres pool, bounded queue, worker pool.
    let pg_pool = PgPoolOptions::new()
        .max_connections(config.db_pool_max)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;
    tracing::info!("audit store connected");

    let (audit_queue, audit_rx) = AuditQueue::new(config.audit_queue_depth);
    let audit_sink: Arc<dyn AuditSink> = Arc::new(audit_queue.clone());
    let worker_pool = AuditWorkerPool::new(Arc::new(AuditRepository::new(pg_pool.clone())));
    let audit_depth = audit_queue.depth_handle();
    let audit_handle = tokio::spawn(async move { worker_pool.run(audit_depth, audit_rx).await });

    // Primary store + process-global subscription.
    let store = Arc::new(
        RedisSessionStore::connect(&config.redis_url, audit_sink.clone(), config.session_ttl_secs)
            .await?,
    );
    tracing::info!("primary store connected");

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let pubsub_client = subscriber::connect_client(&config.redis_url)?;
    let subscriber_handle = tokio::spawn(subscriber::run(pubsub_client, event_tx));

    // Delivery layer.
    let registry = Arc::new(ConnectionRegistry::new());
    let heartbeat_handle = heartbeat::spawn(registry.clone());

    let clock = Arc::new(SystemClock);
    let service = Arc::new(SessionService::new(store, audit_sink, clock.clone()));

    let coordination_handle = tokio::spawn(coordination::run(
        event_rx,
        registry.clone(),
        clock.clone(),
    ));

    // HTTP/WS surface.
    let state = AppState::new(service, registry.clone());
    let app = build_router(state.clone());
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Teardown in reverse order, hard deadline.
    tracing::info!("shutting down");
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let teardown = async move {
        heartbeat_handle.abort();
        registry.shutdown().await;
        subscriber_handle.abort();
        let _ = coordination_handle.await;
        // Drop every remaining audit producer so the workers drain and exit.
        drop(state);
        drop(audit_queue);
        let _ = audit_handle.await;
        pg_pool.close().await;
    };
    if tokio::time::timeout(grace, teardown).await.is_err() {
        tracing::error!(grace_secs = config.shutdown_grace_secs, "shutdown deadline exceeded");
        std::process::exit(1);
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("SIGINT received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}
