//! RehaTrack — a patient-doctor rehabilitation tracking service.
//!
//! Patients connect with doctors, work through assigned recurring exercise
//! tasks, submit progress updates with pain readings and attachments, and
//! both sides read an aggregated recovery score. Recurring-task staleness is
//! resolved lazily at read time; there are no background jobs.

pub mod api;
pub mod config;
pub mod core_state;
pub mod db;
pub mod directory;
pub mod models;
pub mod notifications;
pub mod progress;
pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod videos;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::core_state::AppState;

/// Initialize logging, the data directory, and the database, then serve the
/// API until interrupted.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    let state = AppState::new();
    state.initialize()?;
    tracing::info!(data_dir = %state.data_dir.display(), "initialized");

    let server = api::server::start(Arc::new(state), config::bind_addr()).await?;
    tracing::info!(addr = %server.addr, "{} {} listening", config::APP_NAME, config::APP_VERSION);

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    Ok(())
}
