//! Playlist-to-catalog reconciliation.

use super::merge::{episode_from_entry, merge_playlist_entry};
use super::scanner::list_media_files;
use super::{SyncReport, MATCH_EXTENSION};
use crate::database::{AuditEntry, AuditSink, CatalogStore, Episode};
use crate::error::SyncResult;
use crate::matching::{EntryMatch, Matcher, LOW_CONFIDENCE};
use crate::playlist::PlaylistEntry;
use std::collections::HashMap;
use std::path::Path;

enum Outcome {
    Added,
    Updated,
    Unchanged,
}

pub struct Reconciler<'a> {
    store: &'a dyn CatalogStore,
    audit: &'a dyn AuditSink,
    matcher: Matcher,
    max_depth: u32,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn CatalogStore, audit: &'a dyn AuditSink) -> Self {
        Self {
            store,
            audit,
            matcher: Matcher::default(),
            max_depth: 0,
        }
    }

    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Descend into subdirectories when listing candidate files.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Match `entries` against the feed directory's audio files and upsert
    /// the matched records.
    ///
    /// Per-entry write failures are counted, not returned. An error means the
    /// existing catalog could not be loaded at all.
    pub fn reconcile_playlist(
        &self,
        feed_id: i64,
        entries: &[PlaylistEntry],
        directory: &Path,
    ) -> SyncResult<SyncReport> {
        let mut report = SyncReport {
            total: entries.len(),
            ..Default::default()
        };

        let files = list_media_files(directory, &[MATCH_EXTENSION.to_string()], self.max_depth);
        if files.is_empty() {
            log::debug!("No {} files in {:?}, nothing to reconcile", MATCH_EXTENSION, directory);
            return Ok(report);
        }

        let existing: HashMap<String, Episode> = self
            .store
            .get_episodes_for_feed(feed_id)?
            .into_iter()
            .map(|e| (e.filename.to_lowercase(), e))
            .collect();

        let matches = self.matcher.reconcile_all(entries, &files);
        let mut low_confidence: Vec<&EntryMatch> = Vec::new();
        let mut score_sum = 0.0;

        for m in &matches {
            let Some(filename) = m.filename.as_deref() else {
                report.skipped += 1;
                continue;
            };
            report.matched += 1;
            score_sum += m.score;
            if m.score < LOW_CONFIDENCE {
                low_confidence.push(m);
            }

            match self.apply_match(feed_id, m, filename, existing.get(&filename.to_lowercase())) {
                Ok(Outcome::Added) => report.added += 1,
                Ok(Outcome::Updated) => report.updated += 1,
                Ok(Outcome::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!(
                        "Failed to reconcile '{}' -> {}: {}",
                        m.entry.title,
                        filename,
                        e
                    );
                }
            }
        }

        if report.matched > 0 {
            log::info!(
                "Feed {}: {} (average score {:.1}%)",
                feed_id,
                report,
                score_sum / report.matched as f64 * 100.0
            );
        }

        if !low_confidence.is_empty() {
            log::warn!(
                "Feed {}: {} matches have low confidence (< {:.0}%)",
                feed_id,
                low_confidence.len(),
                LOW_CONFIDENCE * 100.0
            );
            for m in low_confidence.iter().take(5) {
                log::warn!(
                    "  - {} -> {} ({:.1}%)",
                    m.entry.title,
                    m.filename.as_deref().unwrap_or_default(),
                    m.score * 100.0
                );
            }
            if low_confidence.len() > 5 {
                log::warn!("  ... and {} more", low_confidence.len() - 5);
            }
        }

        if report.failed > 0 {
            self.audit.record(
                AuditEntry::warning(
                    "reconcile",
                    format!("{} of {} matched entries failed to reconcile", report.failed, report.matched),
                )
                .for_feed(feed_id)
                .with_details(serde_json::json!({
                    "failed": report.failed,
                    "matched": report.matched,
                    "total": report.total,
                })),
            );
        }

        Ok(report)
    }

    fn apply_match(
        &self,
        feed_id: i64,
        m: &EntryMatch,
        filename: &str,
        existing: Option<&Episode>,
    ) -> anyhow::Result<Outcome> {
        let entry = m.entry;

        let Some(existing) = existing else {
            let episode = episode_from_entry(feed_id, filename, entry, m.position, m.score);
            self.store.insert_episode(&episode)?;
            self.store
                .mark_source_downloaded(feed_id, &entry.source_id, filename)?;
            log::debug!("Added '{}' as {}", entry.title, filename);
            return Ok(Outcome::Added);
        };

        let source_changed = existing.source_id.as_deref() != Some(entry.source_id.as_str());
        let outcome = if source_changed || entry.has_metadata() {
            let merged = merge_playlist_entry(existing, entry, m.position, m.score);
            if merged != *existing {
                self.store.update_episode(&merged)?;
                Outcome::Updated
            } else {
                Outcome::Unchanged
            }
        } else {
            Outcome::Unchanged
        };

        // A matched file is never fetched again, whatever the outcome above.
        self.store
            .mark_source_downloaded(feed_id, &entry.source_id, &existing.filename)?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, DownloadStatus, Feed, FeedOrder};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn test_feed(directory: &Path) -> Feed {
        Feed {
            id: 0,
            name: "btb".to_string(),
            directory: directory.to_string_lossy().to_string(),
            extensions: vec!["mp3".to_string()],
            max_depth: 0,
            order_by: FeedOrder::DisplayOrder,
            playlist_id: Some("PL1".to_string()),
            playlist_enabled: true,
            poll_interval_minutes: 60,
            max_concurrent_downloads: 1,
            audio_quality: "0".to_string(),
            part_aware_matching: false,
            last_polled_at: None,
        }
    }

    fn setup(files: &[&str]) -> (Database, TempDir, i64) {
        let temp = TempDir::new().unwrap();
        let media = temp.path().join("media");
        fs::create_dir_all(&media).unwrap();
        for name in files {
            let path = media.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, b"audio").unwrap();
        }
        let db = Database::new(&temp.path().join("test.db")).unwrap();
        let feed_id = db.upsert_feed(&test_feed(&media)).unwrap();
        (db, temp, feed_id)
    }

    fn media(temp: &TempDir) -> std::path::PathBuf {
        temp.path().join("media")
    }

    #[test]
    fn test_new_match_inserts_record() {
        let (db, temp, feed_id) = setup(&["The Villain Who Built McDonald's.mp3"]);
        let entries = vec![PlaylistEntry {
            description: Some("desc".into()),
            ..PlaylistEntry::new("vid1", "The Villain Who Built McDonald's | BEHIND THE BASTARDS")
        }];

        let report = Reconciler::new(&db, &db)
            .reconcile_playlist(feed_id, &entries, &media(&temp))
            .unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.matched, 1);
        assert_eq!(report.total, 1);

        let episode = db
            .get_episode_by_filename(feed_id, "The Villain Who Built McDonald's.mp3")
            .unwrap()
            .unwrap();
        assert_eq!(episode.source_id.as_deref(), Some("vid1"));
        assert_eq!(episode.description.as_deref(), Some("desc"));
        assert_eq!(episode.display_order, 1);
        assert!(episode.match_score.unwrap() > 0.6);

        let downloaded = db.get_downloaded_sources(feed_id).unwrap();
        assert_eq!(
            downloaded.get("vid1").map(String::as_str),
            Some("The Villain Who Built McDonald's.mp3")
        );
    }

    #[test]
    fn test_unmatched_entry_is_skipped_and_not_persisted() {
        let (db, temp, feed_id) = setup(&["Completely Different Name.mp3"]);
        let entries = vec![PlaylistEntry::new("x", "Totally Unrelated Video Title That Won't Match")];

        let report = Reconciler::new(&db, &db)
            .reconcile_playlist(feed_id, &entries, &media(&temp))
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.matched, 0);
        assert!(db.get_episodes_for_feed(feed_id).unwrap().is_empty());
        assert!(db.get_downloaded_sources(feed_id).unwrap().is_empty());
    }

    #[test]
    fn test_empty_directory_is_noop() {
        let (db, temp, feed_id) = setup(&[]);
        let entries = vec![PlaylistEntry::new("a", "Anything")];
        let report = Reconciler::new(&db, &db)
            .reconcile_playlist(feed_id, &entries, &media(&temp))
            .unwrap();
        assert_eq!(report.writes(), 0);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_missing_directory_is_noop() {
        let (db, temp, feed_id) = setup(&[]);
        let report = Reconciler::new(&db, &db)
            .reconcile_playlist(feed_id, &[PlaylistEntry::new("a", "A")], &temp.path().join("nope"))
            .unwrap();
        assert_eq!(report.writes(), 0);
    }

    #[test]
    fn test_only_mp3_files_participate() {
        let (db, temp, feed_id) = setup(&["Episode Title.m4a"]);
        let entries = vec![PlaylistEntry::new("a", "Episode Title")];
        let report = Reconciler::new(&db, &db)
            .reconcile_playlist(feed_id, &entries, &media(&temp))
            .unwrap();
        assert_eq!(report.matched, 0);
    }

    #[test]
    fn test_second_run_writes_nothing() {
        let (db, temp, feed_id) = setup(&["Episode One.mp3", "Episode Two.mp3"]);
        let entries = vec![
            PlaylistEntry {
                thumbnail_url: Some("https://img/2.jpg".into()),
                ..PlaylistEntry::new("v2", "Episode Two | CHANNEL")
            },
            PlaylistEntry::new("v1", "Episode One | CHANNEL"),
        ];
        let reconciler = Reconciler::new(&db, &db);

        let first = reconciler.reconcile_playlist(feed_id, &entries, &media(&temp)).unwrap();
        assert_eq!(first.added, 2);

        let before = db.get_episodes_for_feed(feed_id).unwrap();
        let second = reconciler.reconcile_playlist(feed_id, &entries, &media(&temp)).unwrap();
        assert_eq!(second.writes(), 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(db.get_episodes_for_feed(feed_id).unwrap(), before);
    }

    #[test]
    fn test_existing_record_keeps_description_when_entry_has_none() {
        let (db, temp, feed_id) = setup(&["Kept Episode.mp3"]);
        let mut episode = Episode::new(feed_id, "Kept Episode.mp3");
        episode.description = Some("kept".into());
        episode.display_order = -1;
        db.insert_episode(&episode).unwrap();

        let entries = vec![PlaylistEntry::new("new-id", "Kept Episode")];
        let report = Reconciler::new(&db, &db)
            .reconcile_playlist(feed_id, &entries, &media(&temp))
            .unwrap();
        assert_eq!(report.updated, 1);

        let stored = db.get_episode_by_filename(feed_id, "Kept Episode.mp3").unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("kept"));
        assert_eq!(stored.source_id.as_deref(), Some("new-id"));
        assert_eq!(stored.display_order, 1);
    }

    #[test]
    fn test_same_source_without_metadata_is_left_alone() {
        let (db, temp, feed_id) = setup(&["Stable.mp3"]);
        let mut episode = Episode::new(feed_id, "Stable.mp3");
        episode.source_id = Some("v1".into());
        episode.display_order = 50;
        db.insert_episode(&episode).unwrap();

        let entries = vec![PlaylistEntry::new("v1", "Stable")];
        let report = Reconciler::new(&db, &db)
            .reconcile_playlist(feed_id, &entries, &media(&temp))
            .unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.updated, 0);

        let stored = db.get_episode_by_filename(feed_id, "Stable.mp3").unwrap().unwrap();
        assert_eq!(stored.display_order, 50);
        // Still recorded in the ledger so it is never fetched again.
        assert!(db.get_downloaded_sources(feed_id).unwrap().contains_key("v1"));
    }

    #[test]
    fn test_existing_record_found_case_insensitively() {
        let (db, temp, feed_id) = setup(&["Loud Title.mp3"]);
        db.insert_episode(&Episode::new(feed_id, "LOUD TITLE.mp3")).unwrap();

        let entries = vec![PlaylistEntry::new("v1", "Loud Title")];
        let report = Reconciler::new(&db, &db)
            .reconcile_playlist(feed_id, &entries, &media(&temp))
            .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.added, 0);
        assert_eq!(db.get_episodes_for_feed(feed_id).unwrap().len(), 1);
    }

    #[test]
    fn test_identical_titles_claim_distinct_files() {
        let (db, temp, feed_id) = setup(&["Rerun.mp3", "Rerun (2).mp3"]);
        let entries = vec![PlaylistEntry::new("a", "Rerun"), PlaylistEntry::new("b", "Rerun")];
        let report = Reconciler::new(&db, &db)
            .reconcile_playlist(feed_id, &entries, &media(&temp))
            .unwrap();
        assert_eq!(report.added, 2);

        let downloaded = db.get_downloaded_sources(feed_id).unwrap();
        assert_ne!(downloaded.get("a"), downloaded.get("b"));
    }

    #[test]
    fn test_nested_files_match_with_depth() {
        let (db, temp, feed_id) = setup(&["2021/Nested Episode.mp3"]);
        let entries = vec![PlaylistEntry::new("n", "Nested Episode")];

        let flat = Reconciler::new(&db, &db)
            .reconcile_playlist(feed_id, &entries, &media(&temp))
            .unwrap();
        assert_eq!(flat.matched, 0);

        let deep = Reconciler::new(&db, &db)
            .with_max_depth(1)
            .reconcile_playlist(feed_id, &entries, &media(&temp))
            .unwrap();
        assert_eq!(deep.added, 1);
        assert!(db
            .get_episode_by_filename(feed_id, "2021/Nested Episode.mp3")
            .unwrap()
            .is_some());
    }

    // =========================================================================
    // Failure isolation
    // =========================================================================

    /// Store wrapper that fails inserts for one filename.
    struct FlakyStore<'a> {
        inner: &'a Database,
        poison: &'static str,
    }

    impl CatalogStore for FlakyStore<'_> {
        fn get_feed(&self, feed_id: i64) -> anyhow::Result<Option<Feed>> {
            self.inner.get_feed(feed_id)
        }
        fn get_feeds(&self) -> anyhow::Result<Vec<Feed>> {
            self.inner.get_feeds()
        }
        fn touch_feed_polled(&self, feed_id: i64) -> anyhow::Result<()> {
            self.inner.touch_feed_polled(feed_id)
        }
        fn get_episodes_for_feed(&self, feed_id: i64) -> anyhow::Result<Vec<Episode>> {
            self.inner.get_episodes_for_feed(feed_id)
        }
        fn get_episode_by_filename(&self, feed_id: i64, filename: &str) -> anyhow::Result<Option<Episode>> {
            self.inner.get_episode_by_filename(feed_id, filename)
        }
        fn insert_episode(&self, episode: &Episode) -> anyhow::Result<i64> {
            if episode.filename == self.poison {
                anyhow::bail!("disk full");
            }
            self.inner.insert_episode(episode)
        }
        fn update_episode(&self, episode: &Episode) -> anyhow::Result<()> {
            self.inner.update_episode(episode)
        }
        fn save_episodes(&self, episodes: &[Episode]) -> anyhow::Result<usize> {
            self.inner.save_episodes(episodes)
        }
        fn min_display_order(&self, feed_id: i64) -> anyhow::Result<Option<i64>> {
            self.inner.min_display_order(feed_id)
        }
        fn mark_source_downloaded(&self, feed_id: i64, source_id: &str, filename: &str) -> anyhow::Result<()> {
            self.inner.mark_source_downloaded(feed_id, source_id, filename)
        }
        fn get_downloaded_sources(&self, feed_id: i64) -> anyhow::Result<HashMap<String, String>> {
            self.inner.get_downloaded_sources(feed_id)
        }
        fn enqueue_download(&self, feed_id: i64, source_id: &str, title: &str) -> anyhow::Result<String> {
            self.inner.enqueue_download(feed_id, source_id, title)
        }
        fn update_download_status(
            &self,
            id: &str,
            status: DownloadStatus,
            progress: Option<i32>,
            error: Option<&str>,
        ) -> anyhow::Result<()> {
            self.inner.update_download_status(id, status, progress, error)
        }
    }

    #[test]
    fn test_one_failure_does_not_abort_batch() {
        let (db, temp, feed_id) = setup(&["Alpha Episode.mp3", "Beta Episode.mp3", "Gamma Episode.mp3"]);
        let flaky = FlakyStore {
            inner: &db,
            poison: "Beta Episode.mp3",
        };
        let entries = vec![
            PlaylistEntry::new("a", "Alpha Episode"),
            PlaylistEntry::new("b", "Beta Episode"),
            PlaylistEntry::new("g", "Gamma Episode"),
        ];

        let report = Reconciler::new(&flaky, &db)
            .reconcile_playlist(feed_id, &entries, &media(&temp))
            .unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.failed, 1);

        // Failed entry is not in the ledger, so the next pass retries it.
        let downloaded = db.get_downloaded_sources(feed_id).unwrap();
        assert!(downloaded.contains_key("a"));
        assert!(!downloaded.contains_key("b"));
        assert!(downloaded.contains_key("g"));

        let audit = db.get_audit_log(10).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].category, "reconcile");
        assert_eq!(audit[0].feed_id, Some(feed_id));
    }
}
