pub mod analytics;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod relay;
pub mod storage;

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{DatabaseBackend, DatabaseConfig, UmamiConfig};
use relay::EventRelay;
use storage::{MemoryStorage, PostgresStorage, SqliteStorage, Storage};

/// Install the global `tracing` subscriber, filtered by `RUST_LOG` (default `info`)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Connect the configured storage backend and create its schema
pub async fn connect_storage(config: &DatabaseConfig) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.url);
            Arc::new(SqliteStorage::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Memory => {
            info!("Using in-memory storage, data is lost on exit");
            Arc::new(MemoryStorage::new())
        }
    };

    storage.init().await?;
    info!("Database initialized successfully");
    Ok(storage)
}

/// Start the analytics relay when enabled.
///
/// The server keeps running without analytics if the collector cannot be reached.
pub async fn start_relay(config: &UmamiConfig) -> Option<Arc<EventRelay>> {
    if !config.enabled {
        info!("Analytics relay disabled");
        return None;
    }

    let relay = match EventRelay::new(config.relay_options()) {
        Ok(relay) => Arc::new(relay),
        Err(e) => {
            error!(error = %e, "Failed to create analytics relay");
            return None;
        }
    };

    if let Err(e) = relay.initialize().await {
        error!(error = %e, "Analytics relay unavailable, visits will not be forwarded");
    }

    Some(relay)
}
