//! Remote playlist capability: list entries, fetch details, download audio.

pub mod file;
pub mod ytdlp;

use crate::error::SyncResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

pub use file::load_playlist_file;
pub use ytdlp::YtDlpClient;

/// Titles reported for entries that cannot be fetched.
const UNAVAILABLE_TITLES: &[&str] = &["[Private video]", "[Deleted video]", "Private video"];

pub fn is_unavailable_title(title: &str) -> bool {
    UNAVAILABLE_TITLES.contains(&title.trim())
}

/// One item of a remote playlist, optionally enriched with details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub source_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub upload_date: Option<String>,
}

impl PlaylistEntry {
    pub fn new(source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_details(mut self, details: EntryDetails) -> Self {
        self.description = details.description;
        self.thumbnail_url = details.thumbnail_url;
        self.upload_date = details.upload_date;
        self
    }

    /// True when the entry carries any field worth merging into a record.
    pub fn has_metadata(&self) -> bool {
        self.description.is_some() || self.thumbnail_url.is_some() || self.upload_date.is_some()
    }
}

/// Details that cost an extra remote call per item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryDetails {
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub upload_date: Option<String>,
}

#[async_trait]
pub trait PlaylistClient: Send + Sync {
    /// Entries in playlist order (typically newest first).
    async fn list_entries(&self, playlist_id: &str) -> SyncResult<Vec<PlaylistEntry>>;

    /// Description, thumbnail and upload date; `None` if the item is gone.
    async fn fetch_details(&self, source_id: &str) -> SyncResult<Option<EntryDetails>>;

    /// Download audio into `target_dir`, returning the written file.
    ///
    /// Progress percentages are sent on `progress` when provided.
    async fn download(
        &self,
        source_id: &str,
        target_dir: &Path,
        quality: &str,
        progress: Option<mpsc::Sender<i32>>,
    ) -> SyncResult<Option<PathBuf>>;
}
