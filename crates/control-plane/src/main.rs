// Hookline API server
// Decision: One process serves the HTTP API and runs the retry worker
// Decision: In-memory dev mode when DATABASE_URL is unset

use std::sync::Arc;

use anyhow::{Context, Result};
use hookline_control_plane::{build_app, Config, StorageBackend};
use hookline_core::{HttpTransport, RetryWorker, RetryWorkerConfig, WebhookEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // RUST_LOG overrides the default filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("hookline_control_plane=debug,hookline_core=debug,tower_http=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("hookline-control-plane starting...");

    let config = Config::from_env().context("Invalid configuration")?;

    let backend = StorageBackend::from_config(&config)
        .await
        .context("Failed to initialize storage")?;
    if backend.is_dev_mode() {
        tracing::warn!("DATABASE_URL not set; using in-memory storage (data is lost on restart)");
    } else {
        tracing::info!("Connected to database");
    }

    let transport = Arc::new(HttpTransport::new().context("Failed to build HTTP client")?);
    let engine = WebhookEngine::new(backend.stores(), transport)
        .await
        .context("Failed to load engine settings")?;

    let worker = RetryWorker::new(
        engine.dispatcher(),
        RetryWorkerConfig::default()
            .with_poll_interval(config.retry_poll_interval)
            .with_batch_size(config.retry_batch_size)
            .with_max_in_flight(config.retry_max_in_flight),
    );
    worker.start();

    if config.cors_allowed_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
    } else {
        tracing::info!(origins = ?config.cors_allowed_origins, "CORS origins configured");
    }
    if !config.api_prefix.is_empty() {
        tracing::info!(prefix = %config.api_prefix, "API prefix configured");
    }

    let app = build_app(engine, &config);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    tracing::info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("HTTP server stopped; stopping retry worker");
    worker.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
