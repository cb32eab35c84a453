pub mod config;
pub mod database;
pub mod error;
pub mod matching;
pub mod metadata;
pub mod playlist;
pub mod sync;
pub mod worker;

use config::AppConfig;
use database::Database;
use error::SyncResult;
use std::sync::Arc;

pub use error::SyncError;
pub use sync::{DirectoryScanner, Reconciler, SyncReport};
pub use worker::{Orchestrator, OrchestratorConfig};

/// Install the global subscriber. `RUST_LOG` overrides the default `info`
/// level; `log` records from the library are forwarded through it.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("Logging already initialized: {}", e);
    }
}

/// Open the catalog database and register every configured feed.
pub fn open_catalog(config: &AppConfig) -> SyncResult<Arc<Database>> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = Database::new(&config.database_path)?;
    for feed in &config.feeds {
        let id = db.upsert_feed(feed)?;
        log::debug!("Registered feed '{}' as {}", feed.name, id);
    }

    log::info!(
        "Catalog opened at {} with {} feeds",
        config.database_path.display(),
        config.feeds.len()
    );
    Ok(Arc::new(db))
}
