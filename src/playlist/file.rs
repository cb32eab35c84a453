//! Playlist snapshots saved as JSON, for offline matching.

use super::{is_unavailable_title, PlaylistEntry};
use crate::error::{SyncError, SyncResult};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum SavedEntry {
    Full {
        #[serde(default)]
        id: Option<String>,
        title: String,
    },
    Title(String),
}

/// Load a saved playlist: a JSON array of `{"id", "title"}` objects or of
/// bare title strings. Private and deleted entries are dropped; entries
/// without an id get a positional one.
pub fn load_playlist_file(path: &Path) -> SyncResult<Vec<PlaylistEntry>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SyncError::Io(format!("reading {}: {}", path.display(), e)))?;
    parse_playlist(&text)
}

pub fn parse_playlist(text: &str) -> SyncResult<Vec<PlaylistEntry>> {
    let saved: Vec<SavedEntry> = serde_json::from_str(text)?;

    let entries: Vec<PlaylistEntry> = saved
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let (id, title) = match item {
                SavedEntry::Full { id, title } => (id, title),
                SavedEntry::Title(title) => (None, title),
            };
            let title = title.trim();
            if title.is_empty() || is_unavailable_title(title) {
                return None;
            }
            let id = id.unwrap_or_else(|| format!("entry-{}", idx + 1));
            Some(PlaylistEntry::new(id, title))
        })
        .collect();

    if entries.is_empty() {
        log::warn!("Playlist file contains no usable entries");
    }
    Ok(entries)
}
