//! acidbench server entry point.
//!
//! Connects the database pool, starts the Axum HTTP server and shuts both
//! down in order on SIGINT/SIGTERM.

use anyhow::Context;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use acidbench::api;
use acidbench::app_state::AppState;
use acidbench::config::{AppConfig, LogFormat};
use acidbench::persistence::{DbPool, PgLedgerStore};
use acidbench::service::{Deadline, MutationEngine, OperationKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env().context("loading configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting acidbench");

    // Build persistence layer
    let pool = DbPool::connect(&config.database_url, config.pool_settings())
        .await
        .context("connecting to the database")?;
    let timeouts = config.timeouts();
    pool.ping(&Deadline::after(timeouts.budget(OperationKind::Scan)))
        .await
        .context("database did not answer the startup ping")?;
    let monitor = pool.spawn_health_monitor();

    // Build service layer and application state
    let engine = MutationEngine::new(PgLedgerStore::new(pool.clone()), timeouts);
    let app_state = AppState::new(engine);

    // Build router
    let app = api::build_router()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    // Teardown once, after in-flight requests have drained
    pool.close().await;
    monitor.abort();
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received, draining requests");
}
