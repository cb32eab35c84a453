//! Directory scan: register new audio files and backfill missing metadata.

use super::merge::{fill_backfill_sentinels, fill_from_file};
use crate::database::{CatalogStore, Episode};
use crate::error::SyncResult;
use crate::metadata::MetadataReader;
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

/// Deepest subdirectory level a feed may ask to scan.
pub const MAX_SCAN_DEPTH: u32 = 4;

/// Audio files under `directory` whose extension is in `extensions`.
///
/// Depth 0 means the directory itself only. Returned names are relative to
/// `directory`, `/`-separated and sorted. A missing directory yields nothing.
pub fn list_media_files(directory: &Path, extensions: &[String], max_depth: u32) -> Vec<String> {
    if !directory.is_dir() {
        return Vec::new();
    }

    let wanted: HashSet<String> = extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_lowercase())
        .collect();
    let depth = max_depth.min(MAX_SCAN_DEPTH) as usize;

    let mut files: Vec<String> = WalkDir::new(directory)
        .min_depth(1)
        .max_depth(depth + 1)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Skipping unreadable path under {:?}: {}", directory, e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| wanted.contains(&ext.to_string_lossy().to_lowercase()))
                .unwrap_or(false)
        })
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(directory).ok()?;
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            Some(parts.join("/"))
        })
        .collect();

    files.sort();
    files
}

pub struct DirectoryScanner<'a> {
    store: &'a dyn CatalogStore,
    reader: &'a dyn MetadataReader,
}

impl<'a> DirectoryScanner<'a> {
    pub fn new(store: &'a dyn CatalogStore, reader: &'a dyn MetadataReader) -> Self {
        Self { store, reader }
    }

    /// Register files the catalog has not seen and backfill incomplete
    /// records. Returns the number of new files.
    ///
    /// New files are ordered before everything already in the feed, in the
    /// order they were listed.
    pub fn sync_directory(
        &self,
        feed_id: i64,
        directory: &Path,
        extensions: &[String],
        max_depth: u32,
    ) -> SyncResult<usize> {
        if !directory.is_dir() {
            log::debug!("Feed {} directory {:?} does not exist, skipping scan", feed_id, directory);
            return Ok(0);
        }

        let files = list_media_files(directory, extensions, max_depth);
        let existing = self.store.get_episodes_for_feed(feed_id)?;
        let known: HashSet<String> = existing.iter().map(|e| e.filename.to_lowercase()).collect();

        let mut next_order = self.store.min_display_order(feed_id)?.unwrap_or(0) - 1;
        let mut batch: Vec<Episode> = Vec::new();
        let mut accepted: HashSet<String> = HashSet::new();

        for filename in &files {
            let key = filename.to_lowercase();
            if known.contains(&key) {
                continue;
            }
            if !accepted.insert(key) {
                log::warn!(
                    "Feed {}: skipping {}, another new file differs from it only in case",
                    feed_id,
                    filename
                );
                continue;
            }

            let path = directory.join(filename);
            let mut episode = Episode::new(feed_id, filename.as_str());
            episode.display_order = next_order;
            next_order -= 1;

            // Unreadable tags leave the fields empty so backfill retries them.
            let metadata = self.reader.read(&path);
            fill_from_file(&mut episode, metadata.as_ref(), file_size(&path));
            episode.has_embedded_art = metadata.as_ref().is_some_and(|m| m.has_embedded_art);
            if episode.title.is_none() {
                episode.title = Some(episode.display_title());
            }
            batch.push(episode);
        }
        let added = batch.len();

        for mut episode in existing.into_iter().filter(Episode::needs_backfill) {
            let path = directory.join(&episode.filename);
            if !path.is_file() {
                log::warn!("Backfill skipped, file missing: {}", path.display());
                continue;
            }

            let metadata = self.reader.read(&path);
            fill_from_file(&mut episode, metadata.as_ref(), file_size(&path));
            episode.has_embedded_art = metadata.as_ref().is_some_and(|m| m.has_embedded_art);
            fill_backfill_sentinels(&mut episode);
            batch.push(episode);
        }
        let backfilled = batch.len() - added;

        if !batch.is_empty() {
            self.store.save_episodes(&batch)?;
        }
        if added > 0 || backfilled > 0 {
            log::info!(
                "Feed {}: scanned {} files, {} new, {} backfilled",
                feed_id,
                files.len(),
                added,
                backfilled
            );
        }

        Ok(added)
    }
}

fn file_size(path: &Path) -> Option<i64> {
    std::fs::metadata(path).ok().map(|m| m.len() as i64)
}
