//! Roster planner service.
//!
//! Accepts optimizer output over HTTP and commits it into the shift roster
//! through the batched, protection-aware commit pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use roster_commit::{AssignmentStore, CommitPipeline, MemoryStore};
use roster_planner::{
    api,
    config::{self, StoreKind},
    db::Database,
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to ROSTER_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting roster planner");
    info!(
        listen_addr = %config.listen_addr,
        store = ?config.store,
        batch_size = config.pipeline.batch_size,
        "Configuration loaded"
    );

    let (store, store_name): (Arc<dyn AssignmentStore>, &'static str) = match config.store {
        StoreKind::Postgres => {
            let db = match Database::connect(&config.database).await {
                Ok(db) => {
                    info!("Database connection established");
                    db
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                if let Err(e) = db.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }

            let store: Arc<dyn AssignmentStore> = Arc::new(db.assignment_store());
            (store, "postgres")
        }
        StoreKind::Memory => {
            warn!("Using in-memory store; assignments are lost on exit");
            let store: Arc<dyn AssignmentStore> = Arc::new(MemoryStore::new());
            (store, "memory")
        }
    };

    let pipeline = CommitPipeline::new(store, config.pipeline.clone());
    let state = AppState::new(pipeline, store_name);
    let app = api::create_router(state);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
            return Ok(());
        }
    }

    let _ = shutdown_tx.send(true);

    // In-flight commits finish before the server task returns.
    if tokio::time::timeout(Duration::from_secs(30), server_handle)
        .await
        .is_err()
    {
        warn!("HTTP server did not shut down in time");
    }

    info!("Roster planner shutdown complete");
    Ok(())
}
