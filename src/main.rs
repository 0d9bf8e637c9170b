//! Application entry point for the `sensor-rollup` service.
//!
//! Startup sequence:
//! - Load configuration from environment variables or `.env`
//! - Initialize structured logging/tracing
//! - Select the store: PostgreSQL when `DATABASE_URL` is set (creating the
//!   schema if needed), otherwise the in-memory store
//! - Start the flush and aggregation timers
//! - Serve the HTTP routes until Ctrl-C / SIGTERM, then stop the timers and
//!   optionally drain the ingestion buffer
//!
//! See `config::load_from_env` for the recognized variables.
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;

use sensor_rollup::logging::init_tracing;
use sensor_rollup::pipeline::Pipeline;
use sensor_rollup::routes::{self, AppState};
use sensor_rollup::store::{MemoryStore, PgStore, TelemetryStore};
use sensor_rollup::{config, schema};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store: Arc<dyn TelemetryStore> = match &cfg.db_url {
        Some(db_url) => {
            tracing::info!("Attempting to connect to database");
            let pool = PgPoolOptions::new()
                .max_connections(cfg.db_pool_max)
                .connect(db_url)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
            tracing::info!("Successfully connected to database");

            schema::create_schema(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, readings and rollups are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let pipeline: Arc<Pipeline<dyn TelemetryStore>> = Arc::new(Pipeline::new(
        store.clone(),
        cfg.flush_settings(),
        cfg.aggregation_settings(),
        cfg.aggregation_cadence(),
    ));
    let running = pipeline.start();

    let app: Router = routes::router(AppState {
        pipeline,
        store,
        report_lookback: cfg.report_lookback,
    });

    tracing::info!("Listening on {}", cfg.listen_addr);
    let listener = tokio::net::TcpListener::bind(cfg.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, shutting down pipeline");
    running.shutdown(cfg.drain_on_shutdown).await;

    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    // ---
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
