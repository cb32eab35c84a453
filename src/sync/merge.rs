//! Field-by-field merge rules for catalog records.
//!
//! A value supplied by a source replaces the stored one; a missing value
//! never clears what is already stored.

use crate::database::Episode;
use crate::metadata::FileMetadata;
use crate::playlist::PlaylistEntry;

/// Merge a matched playlist entry into an existing record.
///
/// | field                                       | rule                         |
/// |---------------------------------------------|------------------------------|
/// | `source_id`, `source_title`                 | always the entry's           |
/// | `display_order`                             | always the entry's position  |
/// | `match_score`                               | always the new score         |
/// | `description`, `thumbnail_url`, `published` | entry's if present, else kept|
/// | everything else                             | kept                         |
pub fn merge_playlist_entry(
    existing: &Episode,
    entry: &PlaylistEntry,
    position: i64,
    score: f64,
) -> Episode {
    let mut merged = existing.clone();
    merged.source_id = Some(entry.source_id.clone());
    merged.source_title = Some(entry.title.clone());
    merged.display_order = position;
    merged.match_score = Some(score);
    merged.description = entry.description.clone().or(merged.description);
    merged.thumbnail_url = entry.thumbnail_url.clone().or(merged.thumbnail_url);
    merged.published_date = entry.upload_date.clone().or(merged.published_date);
    merged
}

/// A fresh record for a file first seen through the playlist.
pub fn episode_from_entry(
    feed_id: i64,
    filename: &str,
    entry: &PlaylistEntry,
    position: i64,
    score: f64,
) -> Episode {
    Episode {
        source_id: Some(entry.source_id.clone()),
        source_title: Some(entry.title.clone()),
        title: Some(entry.title.clone()),
        description: entry.description.clone(),
        thumbnail_url: entry.thumbnail_url.clone(),
        published_date: entry.upload_date.clone(),
        display_order: position,
        match_score: Some(score),
        ..Episode::new(feed_id, filename)
    }
}

/// Fill gaps in `episode` from file metadata. Stored values win.
pub fn fill_from_file(episode: &mut Episode, metadata: Option<&FileMetadata>, file_size: Option<i64>) {
    episode.file_size = episode.file_size.or(file_size);

    let Some(meta) = metadata else {
        return;
    };
    episode.title = episode.title.take().or_else(|| meta.title.clone());
    episode.description = episode.description.take().or_else(|| meta.comment.clone());
    episode.duration = episode.duration.or(meta.duration);
    episode.artist = episode.artist.take().or_else(|| meta.artist.clone());
    episode.album = episode.album.take().or_else(|| meta.album.clone());
    episode.genre = episode.genre.take().or_else(|| meta.genre.clone());
    episode.year = episode.year.or(meta.year);
    episode.track_number = episode.track_number.or(meta.track_number);
    episode.bitrate = episode.bitrate.or(meta.bitrate);
    episode.subtitle = episode.subtitle.take().or_else(|| meta.subtitle.clone());
}

/// Mark backfill fields as attempted so extraction is not retried every cycle.
pub fn fill_backfill_sentinels(episode: &mut Episode) {
    if episode.title.is_none() {
        episode.title = Some(episode.display_title());
    }
    episode.duration = episode.duration.or(Some(0.0));
    episode.file_size = episode.file_size.or(Some(0));
    episode.artist = episode.artist.take().or_else(|| Some(String::new()));
    episode.bitrate = episode.bitrate.or(Some(0));
}
