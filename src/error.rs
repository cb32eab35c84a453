use thiserror::Error;

/// Typed error hierarchy for the sync engine boundary.
///
/// The reconciliation paths themselves never surface these for partial
/// failures (they count them instead); they show up when a whole feed pass,
/// a config load, or a playlist call cannot proceed at all.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Database(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Playlist client: {0}")]
    Playlist(String),

    #[error("Cancelled")]
    Cancelled,
}

pub type SyncResult<T> = Result<T, SyncError>;

// ── From impls ─────────────────────────────────────────────────────────────

impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        SyncError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Database(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for SyncError {
    fn from(e: serde_yaml::Error) -> Self {
        SyncError::Config(e.to_string())
    }
}
