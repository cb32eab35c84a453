use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a feed's catalog is ordered for consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedOrder {
    DisplayOrder,
    PublishedDate,
    AddedDate,
}

impl Default for FeedOrder {
    fn default() -> Self {
        Self::DisplayOrder
    }
}

impl std::fmt::Display for FeedOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DisplayOrder => write!(f, "display_order"),
            Self::PublishedDate => write!(f, "published_date"),
            Self::AddedDate => write!(f, "added_date"),
        }
    }
}

impl From<String> for FeedOrder {
    fn from(s: String) -> Self {
        match s.as_str() {
            "published_date" => Self::PublishedDate,
            "added_date" => Self::AddedDate,
            _ => Self::DisplayOrder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl Default for DownloadStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Downloading => write!(f, "downloading"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<String> for DownloadStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "downloading" => Self::Downloading,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub directory: String,
    pub extensions: Vec<String>,
    pub max_depth: u32,
    pub order_by: FeedOrder,
    pub playlist_id: Option<String>,
    pub playlist_enabled: bool,
    pub poll_interval_minutes: i64,
    pub max_concurrent_downloads: i64,
    pub audio_quality: String,
    pub part_aware_matching: bool,
    pub last_polled_at: Option<String>,
}

impl Feed {
    /// Whether the orchestrator should poll this feed's playlist at all.
    pub fn syncs_playlist(&self) -> bool {
        self.playlist_enabled && self.playlist_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// 0 until persisted.
    pub id: i64,
    pub feed_id: i64,
    /// Path relative to the feed directory, `/`-separated.
    pub filename: String,
    pub source_id: Option<String>,
    pub source_title: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub has_embedded_art: bool,
    pub display_order: i64,
    pub added_date: String,
    pub published_date: Option<String>,
    pub match_score: Option<f64>,
    pub duration: Option<f64>,
    pub file_size: Option<i64>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub track_number: Option<i32>,
    pub bitrate: Option<i32>,
    pub subtitle: Option<String>,
}

impl Episode {
    pub fn new(feed_id: i64, filename: impl Into<String>) -> Self {
        Self {
            feed_id,
            filename: filename.into(),
            added_date: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        }
    }

    /// Display title, falling back to the filename stem.
    pub fn display_title(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title.to_string(),
            _ => Path::new(&self.filename)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| self.filename.clone()),
        }
    }

    /// Missing any field that backfill tries to fill.
    pub fn needs_backfill(&self) -> bool {
        self.title.is_none()
            || self.duration.is_none()
            || self.file_size.is_none()
            || self.artist.is_none()
            || self.bitrate.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadQueueItem {
    pub id: String,
    pub feed_id: i64,
    pub source_id: String,
    pub title: String,
    pub status: DownloadStatus,
    pub progress: i32,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Warning,
    Error,
}

impl std::fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub level: AuditLevel,
    pub category: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub feed_id: Option<i64>,
}

impl AuditEntry {
    pub fn warning(category: &str, message: impl Into<String>) -> Self {
        Self {
            level: AuditLevel::Warning,
            category: category.to_string(),
            message: message.into(),
            details: None,
            feed_id: None,
        }
    }

    pub fn error(category: &str, message: impl Into<String>) -> Self {
        Self {
            level: AuditLevel::Error,
            ..Self::warning(category, message)
        }
    }

    pub fn for_feed(mut self, feed_id: i64) -> Self {
        self.feed_id = Some(feed_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_title_falls_back_to_stem() {
        let mut episode = Episode::new(1, "season1/Some Episode.mp3");
        assert_eq!(episode.display_title(), "Some Episode");
        episode.title = Some("  ".to_string());
        assert_eq!(episode.display_title(), "Some Episode");
        episode.title = Some("Real Title".to_string());
        assert_eq!(episode.display_title(), "Real Title");
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            DownloadStatus::Queued,
            DownloadStatus::Downloading,
            DownloadStatus::Completed,
            DownloadStatus::Failed,
        ] {
            assert_eq!(DownloadStatus::from(status.to_string()), status);
        }
        assert_eq!(DownloadStatus::from("garbage".to_string()), DownloadStatus::Queued);
        assert_eq!(FeedOrder::from("added_date".to_string()), FeedOrder::AddedDate);
    }

    #[test]
    fn test_syncs_playlist() {
        let mut feed = Feed {
            id: 1,
            name: "f".into(),
            directory: "/tmp".into(),
            extensions: vec!["mp3".into()],
            max_depth: 0,
            order_by: FeedOrder::DisplayOrder,
            playlist_id: Some("PL1".into()),
            playlist_enabled: true,
            poll_interval_minutes: 60,
            max_concurrent_downloads: 1,
            audio_quality: "0".into(),
            part_aware_matching: false,
            last_polled_at: None,
        };
        assert!(feed.syncs_playlist());
        feed.playlist_id = Some(String::new());
        assert!(!feed.syncs_playlist());
        feed.playlist_id = Some("PL1".into());
        feed.playlist_enabled = false;
        assert!(!feed.syncs_playlist());
    }
}
