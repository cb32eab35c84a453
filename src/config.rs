//! YAML configuration: where the catalog lives and which feeds to sync.

use crate::database::{Feed, FeedOrder};
use crate::error::{SyncError, SyncResult};
use crate::sync::MAX_SCAN_DEPTH;
use crate::worker::OrchestratorConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "podcast-catalog-sync";

/// Raw file contents. Every field is optional; defaults are applied in
/// [`AppConfig::resolve`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub database_path: Option<PathBuf>,
    pub startup_delay_secs: Option<u64>,
    pub inter_download_delay_secs: Option<u64>,
    pub ytdlp_path: Option<String>,
    #[serde(default)]
    pub feeds: Vec<FeedFileConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedFileConfig {
    pub name: String,
    pub directory: PathBuf,
    pub extensions: Option<Vec<String>>,
    pub max_depth: Option<u32>,
    pub order_by: Option<String>,
    pub playlist: Option<PlaylistFileConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaylistFileConfig {
    pub id: String,
    pub enabled: Option<bool>,
    pub poll_interval_minutes: Option<i64>,
    pub max_concurrent_downloads: Option<i64>,
    pub audio_quality: Option<String>,
    pub part_aware_matching: Option<bool>,
}

/// Resolved configuration with defaults applied.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub startup_delay: Duration,
    pub inter_download_delay: Duration,
    pub ytdlp_path: String,
    pub feeds: Vec<Feed>,
}

impl AppConfig {
    /// Read and resolve the file at `path`.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> SyncResult<Self> {
        let file: FileConfig = serde_yaml::from_str(text)?;
        Self::resolve(file)
    }

    pub fn resolve(file: FileConfig) -> SyncResult<Self> {
        let database_path = match file.database_path {
            Some(path) => path,
            None => default_database_path()?,
        };

        let mut names = HashSet::new();
        let mut feeds = Vec::with_capacity(file.feeds.len());
        for feed in file.feeds {
            let name = feed.name.trim().to_string();
            if name.is_empty() {
                return Err(SyncError::Config("feed name must not be empty".to_string()));
            }
            if !names.insert(name.clone()) {
                return Err(SyncError::Config(format!("duplicate feed name '{}'", name)));
            }
            feeds.push(resolve_feed(name, feed)?);
        }

        Ok(Self {
            database_path,
            startup_delay: Duration::from_secs(file.startup_delay_secs.unwrap_or(30)),
            inter_download_delay: Duration::from_secs(file.inter_download_delay_secs.unwrap_or(5)),
            ytdlp_path: file.ytdlp_path.unwrap_or_else(|| "yt-dlp".to_string()),
            feeds,
        })
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            startup_delay: self.startup_delay,
            inter_download_delay: self.inter_download_delay,
            ..Default::default()
        }
    }

    pub fn feed(&self, name: &str) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.name == name)
    }
}

fn resolve_feed(name: String, feed: FeedFileConfig) -> SyncResult<Feed> {
    let extensions: Vec<String> = feed
        .extensions
        .unwrap_or_else(|| vec!["mp3".to_string()])
        .into_iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();
    if extensions.is_empty() {
        return Err(SyncError::Config(format!("feed '{}' has no extensions", name)));
    }

    let order_by = match feed.order_by.as_deref() {
        None | Some("display_order") => FeedOrder::DisplayOrder,
        Some("published_date") => FeedOrder::PublishedDate,
        Some("added_date") => FeedOrder::AddedDate,
        Some(other) => {
            return Err(SyncError::Config(format!(
                "feed '{}': unknown order_by '{}'",
                name, other
            )))
        }
    };

    let max_depth = feed.max_depth.unwrap_or(0);
    if max_depth > MAX_SCAN_DEPTH {
        log::warn!(
            "Feed '{}': max_depth {} clamped to {}",
            name,
            max_depth,
            MAX_SCAN_DEPTH
        );
    }

    let mut resolved = Feed {
        name,
        directory: feed.directory.to_string_lossy().to_string(),
        extensions,
        max_depth: max_depth.min(MAX_SCAN_DEPTH),
        order_by,
        poll_interval_minutes: 60,
        max_concurrent_downloads: 1,
        audio_quality: "0".to_string(),
        ..Default::default()
    };

    if let Some(playlist) = feed.playlist {
        let id = playlist.id.trim().to_string();
        if id.is_empty() {
            return Err(SyncError::Config(format!("feed '{}': playlist id is empty", resolved.name)));
        }
        let interval = playlist.poll_interval_minutes.unwrap_or(60);
        if interval <= 0 {
            return Err(SyncError::Config(format!(
                "feed '{}': poll_interval_minutes must be positive",
                resolved.name
            )));
        }
        let concurrency = playlist.max_concurrent_downloads.unwrap_or(1);
        if concurrency <= 0 {
            return Err(SyncError::Config(format!(
                "feed '{}': max_concurrent_downloads must be positive",
                resolved.name
            )));
        }

        resolved.playlist_id = Some(id);
        resolved.playlist_enabled = playlist.enabled.unwrap_or(true);
        resolved.poll_interval_minutes = interval;
        resolved.max_concurrent_downloads = concurrency;
        resolved.audio_quality = playlist.audio_quality.unwrap_or_else(|| "0".to_string());
        resolved.part_aware_matching = playlist.part_aware_matching.unwrap_or(false);
    }

    Ok(resolved)
}

/// `<config dir>/podcast-catalog-sync/config.yaml`
pub fn default_config_path() -> SyncResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join("config.yaml"))
        .ok_or_else(|| SyncError::Config("cannot determine the user config directory".to_string()))
}

/// `<data dir>/podcast-catalog-sync/catalog.db`
pub fn default_database_path() -> SyncResult<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join("catalog.db"))
        .ok_or_else(|| SyncError::Config("cannot determine the user data directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
database_path: /var/lib/podcasts/catalog.db
startup_delay_secs: 10
inter_download_delay_secs: 2
ytdlp_path: /usr/local/bin/yt-dlp
feeds:
  - name: behind-the-bastards
    directory: /mnt/podcasts/btb
    extensions: [mp3, .M4A]
    max_depth: 9
    order_by: published_date
    playlist:
      id: PL123
      poll_interval_minutes: 30
      max_concurrent_downloads: 2
      audio_quality: "192"
      part_aware_matching: true
  - name: local-only
    directory: /mnt/podcasts/local
"#;

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_yaml(FULL).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/podcasts/catalog.db"));
        assert_eq!(config.startup_delay, Duration::from_secs(10));
        assert_eq!(config.inter_download_delay, Duration::from_secs(2));
        assert_eq!(config.ytdlp_path, "/usr/local/bin/yt-dlp");
        assert_eq!(config.feeds.len(), 2);

        let btb = config.feed("behind-the-bastards").unwrap();
        assert_eq!(btb.extensions, vec!["mp3", "m4a"]);
        assert_eq!(btb.max_depth, MAX_SCAN_DEPTH);
        assert_eq!(btb.order_by, FeedOrder::PublishedDate);
        assert_eq!(btb.playlist_id.as_deref(), Some("PL123"));
        assert!(btb.playlist_enabled);
        assert!(btb.syncs_playlist());
        assert_eq!(btb.poll_interval_minutes, 30);
        assert_eq!(btb.max_concurrent_downloads, 2);
        assert_eq!(btb.audio_quality, "192");
        assert!(btb.part_aware_matching);
    }

    #[test]
    fn test_feed_defaults() {
        let config = AppConfig::from_yaml(FULL).unwrap();
        let local = config.feed("local-only").unwrap();
        assert_eq!(local.extensions, vec!["mp3"]);
        assert_eq!(local.max_depth, 0);
        assert_eq!(local.order_by, FeedOrder::DisplayOrder);
        assert!(local.playlist_id.is_none());
        assert!(!local.syncs_playlist());
        assert_eq!(local.poll_interval_minutes, 60);

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.startup_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_duplicate_feed_names_rejected() {
        let yaml = "database_path: /tmp/c.db\nfeeds:\n  - name: a\n    directory: /x\n  - name: a\n    directory: /y\n";
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, SyncError::Config(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_empty_extensions_rejected() {
        let yaml = "database_path: /tmp/c.db\nfeeds:\n  - name: a\n    directory: /x\n    extensions: []\n";
        assert!(matches!(AppConfig::from_yaml(yaml), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_non_positive_interval_rejected() {
        let yaml = "database_path: /tmp/c.db\nfeeds:\n  - name: a\n    directory: /x\n    playlist:\n      id: PL\n      poll_interval_minutes: 0\n";
        assert!(matches!(AppConfig::from_yaml(yaml), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_unknown_order_rejected() {
        let yaml = "database_path: /tmp/c.db\nfeeds:\n  - name: a\n    directory: /x\n    order_by: random\n";
        assert!(matches!(AppConfig::from_yaml(yaml), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "database_path: /tmp/c.db\nfeedz: []\n";
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = AppConfig::load(&temp.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
