//! Audio file metadata capability, backed by `lofty`.

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::prelude::Accessor;
use lofty::tag::{ItemKey, Tag};
use std::path::Path;

/// Everything the catalog wants from an audio file's tags and properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetadata {
    pub title: Option<String>,
    pub comment: Option<String>,
    pub duration: Option<f64>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub track_number: Option<i32>,
    pub bitrate: Option<i32>,
    pub subtitle: Option<String>,
    pub has_embedded_art: bool,
}

/// Reads metadata from a file. Corrupt or unsupported files yield `None`
/// rather than an error.
pub trait MetadataReader: Send + Sync {
    fn read(&self, path: &Path) -> Option<FileMetadata>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyMetadataReader;

impl MetadataReader for LoftyMetadataReader {
    fn read(&self, path: &Path) -> Option<FileMetadata> {
        let tagged_file = match lofty::read_from_path(path) {
            Ok(file) => file,
            Err(e) => {
                log::warn!("Could not read tags from {}: {}", path.display(), e);
                return None;
            }
        };

        let properties = tagged_file.properties();
        let duration = properties.duration().as_secs_f64();
        let mut metadata = FileMetadata {
            duration: (duration > 0.0).then_some(duration),
            bitrate: properties.audio_bitrate().map(|b| b as i32),
            ..Default::default()
        };

        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag());
        if let Some(tag) = tag {
            metadata.title = non_empty(tag.title().map(|v| v.into_owned()));
            metadata.comment = non_empty(tag.comment().map(|v| v.into_owned()));
            metadata.artist = non_empty(tag.artist().map(|v| v.into_owned()));
            metadata.album = non_empty(tag.album().map(|v| v.into_owned()));
            metadata.genre = non_empty(tag.genre().map(|v| v.into_owned()));
            metadata.year = year_from_tag(tag);
            metadata.track_number = tag.track().map(|t| t as i32);
            metadata.subtitle = non_empty(tag.get_string(ItemKey::TrackSubtitle).map(str::to_string));
        }

        metadata.has_embedded_art = tagged_file.tags().iter().any(|t| !t.pictures().is_empty());

        Some(metadata)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn year_from_tag(tag: &Tag) -> Option<i32> {
    tag.get_string(ItemKey::Year)
        .or_else(|| tag.get_string(ItemKey::RecordingDate))
        .or_else(|| tag.get_string(ItemKey::ReleaseDate))
        .and_then(derive_year)
}

/// First run of four consecutive digits, e.g. `"2019-04-01"` -> 2019.
fn derive_year(date: &str) -> Option<i32> {
    let mut digits = String::with_capacity(4);
    for ch in date.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                return digits.parse().ok();
            }
        } else {
            digits.clear();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_derive_year() {
        assert_eq!(derive_year("2019"), Some(2019));
        assert_eq!(derive_year("2019-04-01"), Some(2019));
        assert_eq!(derive_year("April 1, 2019"), Some(2019));
        assert_eq!(derive_year("19"), None);
        assert_eq!(derive_year(""), None);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  x ".to_string())), Some("x".to_string()));
        assert_eq!(non_empty(Some("   ".to_string())), None);
        assert_eq!(non_empty(None), None);
    }

    #[test]
    fn test_unreadable_file_is_unknown() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("garbage.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(LoftyMetadataReader.read(&path).is_none());
    }

    #[test]
    fn test_missing_file_is_unknown() {
        let temp = TempDir::new().unwrap();
        assert!(LoftyMetadataReader.read(&temp.path().join("missing.mp3")).is_none());
    }
}
