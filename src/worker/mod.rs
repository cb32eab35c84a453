pub mod download;

use crate::database::{AuditEntry, AuditSink, CatalogStore, Episode, Feed};
use crate::error::{SyncError, SyncResult};
use crate::matching::{Matcher, MATCH_THRESHOLD};
use crate::metadata::MetadataReader;
use crate::playlist::{PlaylistClient, PlaylistEntry};
use crate::sync::merge::{episode_from_entry, merge_playlist_entry};
use crate::sync::{list_media_files, DirectoryScanner, Reconciler, SyncReport, MATCH_EXTENSION};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use download::{DownloadJob, DownloadOutcome, DownloadSettings};

/// Where a feed is in its poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Idle,
    Polling,
    Reconciling,
    Downloading,
}

/// Shared worker state for status reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerState {
    pub feeds: HashMap<i64, FeedState>,
    pub downloads_completed: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

impl WorkerState {
    pub fn feed_state(&self, feed_id: i64) -> FeedState {
        self.feeds.get(&feed_id).copied().unwrap_or(FeedState::Idle)
    }
}

/// Timing knobs for the polling loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wait before the first cycle.
    pub startup_delay: Duration,
    /// Pause after each completed download.
    pub inter_download_delay: Duration,
    /// How often the loop wakes to look for due feeds.
    pub tick_interval: Duration,
    /// Waits between download attempts.
    pub retry_delays: Vec<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(30),
            inter_download_delay: Duration::from_secs(5),
            tick_interval: Duration::from_secs(60),
            retry_delays: vec![Duration::from_secs(2), Duration::from_secs(8), Duration::from_secs(30)],
        }
    }
}

/// What one feed pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedSyncSummary {
    pub feed_id: i64,
    pub report: SyncReport,
    pub downloaded: usize,
    pub already_present: usize,
    pub download_failures: usize,
    pub scanned_new: usize,
    pub cancelled: bool,
}

pub struct Orchestrator {
    store: Arc<dyn CatalogStore>,
    audit: Arc<dyn AuditSink>,
    client: Arc<dyn PlaylistClient>,
    reader: Arc<dyn MetadataReader>,
    config: OrchestratorConfig,
    state: Arc<RwLock<WorkerState>>,
    last_poll: Mutex<HashMap<i64, Instant>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        audit: Arc<dyn AuditSink>,
        client: Arc<dyn PlaylistClient>,
        reader: Arc<dyn MetadataReader>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            audit,
            client,
            reader,
            config,
            state: Arc::new(RwLock::new(WorkerState::default())),
            last_poll: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for status readers.
    pub fn state(&self) -> Arc<RwLock<WorkerState>> {
        self.state.clone()
    }

    /// Poll due feeds until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        log::info!(
            "Polling orchestrator started, first cycle in {}s",
            self.config.startup_delay.as_secs()
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("Polling orchestrator cancelled before first cycle");
                return;
            }
            _ = tokio::time::sleep(self.config.startup_delay) => {}
        }

        loop {
            self.poll_due_feeds(&cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }
        }

        log::info!("Polling orchestrator stopped");
    }

    /// One pass over every feed whose interval has elapsed.
    pub async fn poll_due_feeds(&self, cancel: &CancellationToken) -> Vec<FeedSyncSummary> {
        let feeds = match self.store.get_feeds() {
            Ok(feeds) => feeds,
            Err(e) => {
                log::error!("Failed to load feeds: {}", e);
                return Vec::new();
            }
        };

        let mut due = Vec::new();
        {
            let last_poll = self.last_poll.lock().await;
            for feed in feeds.into_iter().filter(Feed::syncs_playlist) {
                let interval = Duration::from_secs(feed.poll_interval_minutes.max(1) as u64 * 60);
                let is_due = last_poll
                    .get(&feed.id)
                    .map_or(true, |last| last.elapsed() >= interval);
                if is_due {
                    due.push(feed);
                }
            }
        }

        self.sync_feeds(&due, cancel).await
    }

    /// Process `feeds` one after another regardless of their intervals.
    ///
    /// A failing feed is logged and audited; the rest still run.
    pub async fn sync_feeds(&self, feeds: &[Feed], cancel: &CancellationToken) -> Vec<FeedSyncSummary> {
        let mut summaries = Vec::new();

        for feed in feeds {
            if cancel.is_cancelled() {
                break;
            }

            let span = tracing::info_span!("feed", name = %feed.name, id = feed.id);
            let result = self.process_feed(feed, cancel).instrument(span).await;
            self.last_poll.lock().await.insert(feed.id, Instant::now());
            self.set_state(feed.id, FeedState::Idle).await;

            match result {
                Ok(summary) => {
                    log::info!(
                        "Feed '{}' synced: {}; {} downloaded, {} failed downloads, {} new files",
                        feed.name,
                        summary.report,
                        summary.downloaded,
                        summary.download_failures,
                        summary.scanned_new
                    );
                    summaries.push(summary);
                }
                Err(SyncError::Cancelled) => {
                    log::info!("Feed '{}' sync cancelled", feed.name);
                    break;
                }
                Err(e) => {
                    log::error!("Feed '{}' sync failed: {}", feed.name, e);
                    self.audit.record(
                        AuditEntry::error("poll", format!("Feed '{}' sync failed: {}", feed.name, e))
                            .for_feed(feed.id),
                    );
                }
            }
        }

        summaries
    }

    /// Full cycle for one feed: list, enrich, reconcile, download, scan,
    /// persist.
    pub async fn process_feed(&self, feed: &Feed, cancel: &CancellationToken) -> SyncResult<FeedSyncSummary> {
        let playlist_id = feed
            .playlist_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SyncError::Config(format!("feed '{}' has no playlist id", feed.name)))?;
        let directory = PathBuf::from(&feed.directory);
        let matcher = Matcher::new(feed.part_aware_matching);
        let mut summary = FeedSyncSummary {
            feed_id: feed.id,
            ..Default::default()
        };

        // ── Polling ──────────────────────────────────────────────────────────
        self.set_state(feed.id, FeedState::Polling).await;
        let listed = self.client.list_entries(playlist_id).await?;
        log::info!("Feed '{}': {} playlist entries", feed.name, listed.len());

        let entries = self.enrich_entries(feed, &matcher, listed, cancel).await?;

        // ── Reconciling ──────────────────────────────────────────────────────
        self.set_state(feed.id, FeedState::Reconciling).await;
        summary.report = Reconciler::new(self.store.as_ref(), self.audit.as_ref())
            .with_matcher(matcher)
            .with_max_depth(feed.max_depth)
            .reconcile_playlist(feed.id, &entries, &directory)?;

        let downloaded = self.store.get_downloaded_sources(feed.id)?;
        let mut jobs: Vec<DownloadJob> = entries
            .into_iter()
            .enumerate()
            .filter(|(_, entry)| !downloaded.contains_key(&entry.source_id))
            .map(|(idx, entry)| DownloadJob {
                position: idx as i64 + 1,
                entry,
            })
            .collect();
        // Playlists list newest first; fetch oldest first.
        jobs.reverse();

        // ── Downloading ──────────────────────────────────────────────────────
        let mut fetched: Vec<(DownloadJob, String)> = Vec::new();
        if !jobs.is_empty() {
            self.set_state(feed.id, FeedState::Downloading).await;
            log::info!("Feed '{}': {} entries to download", feed.name, jobs.len());

            let settings = DownloadSettings::for_feed(
                feed,
                self.config.inter_download_delay,
                self.config.retry_delays.clone(),
            );
            let results = download::download_jobs(
                self.store.clone(),
                self.client.clone(),
                feed.id,
                directory.clone(),
                jobs,
                settings,
                cancel.clone(),
            )
            .await;

            for result in results {
                match result.outcome {
                    DownloadOutcome::Downloaded { filename } => {
                        summary.downloaded += 1;
                        fetched.push((result.job, filename));
                    }
                    DownloadOutcome::AlreadyPresent { filename } => {
                        summary.already_present += 1;
                        fetched.push((result.job, filename));
                    }
                    DownloadOutcome::Unresolved => summary.downloaded += 1,
                    DownloadOutcome::Failed(_) => summary.download_failures += 1,
                    DownloadOutcome::Cancelled => summary.cancelled = true,
                }
            }

            let mut state = self.state.write().await;
            state.downloads_completed += summary.downloaded;
            state.last_activity = Some(Utc::now());
        }

        if summary.download_failures > 0 {
            self.audit.record(
                AuditEntry::warning(
                    "download",
                    format!("{} downloads failed for feed '{}'", summary.download_failures, feed.name),
                )
                .for_feed(feed.id),
            );
        }

        // Completed downloads are persisted even when the pass was cancelled
        // or the scan failed.
        let scanner = DirectoryScanner::new(self.store.as_ref(), self.reader.as_ref());
        let scanned = scanner.sync_directory(feed.id, &directory, &feed.extensions, feed.max_depth);
        if let Err(e) = &scanned {
            log::error!("Feed '{}': directory scan failed: {}", feed.name, e);
        }
        self.persist_downloaded(feed.id, &fetched)?;
        summary.scanned_new = scanned?;

        self.store.touch_feed_polled(feed.id)?;

        if summary.cancelled {
            return Err(SyncError::Cancelled);
        }
        Ok(summary)
    }

    /// Fetch details for entries the catalog has never seen. Known entries
    /// (already in the ledger or matching a file on disk) go through as
    /// listed.
    async fn enrich_entries(
        &self,
        feed: &Feed,
        matcher: &Matcher,
        listed: Vec<PlaylistEntry>,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<PlaylistEntry>> {
        let downloaded = self.store.get_downloaded_sources(feed.id)?;
        let directory = PathBuf::from(&feed.directory);
        let files = list_media_files(&directory, &[MATCH_EXTENSION.to_string()], feed.max_depth);
        let unclaimed = HashSet::new();

        let mut entries = Vec::with_capacity(listed.len());
        let mut fetched = 0usize;
        for entry in listed {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let known = downloaded.contains_key(&entry.source_id)
                || matcher
                    .find_best_match(&entry.title, &files, &unclaimed)
                    .is_some_and(|found| found.score >= MATCH_THRESHOLD);
            if known {
                entries.push(entry);
                continue;
            }

            fetched += 1;
            match self.client.fetch_details(&entry.source_id).await {
                Ok(Some(details)) => entries.push(entry.with_details(details)),
                Ok(None) => entries.push(entry),
                Err(e) => {
                    log::warn!("Failed to fetch details for '{}': {}", entry.title, e);
                    entries.push(entry);
                }
            }
        }

        log::debug!("Feed '{}': fetched details for {} new entries", feed.name, fetched);
        Ok(entries)
    }

    /// One bulk write of downloaded entries, merged into any record the scan
    /// just created for the same file.
    fn persist_downloaded(&self, feed_id: i64, fetched: &[(DownloadJob, String)]) -> SyncResult<()> {
        if fetched.is_empty() {
            return Ok(());
        }

        let mut batch: Vec<Episode> = Vec::with_capacity(fetched.len());
        for (job, filename) in fetched {
            let episode = match self.store.get_episode_by_filename(feed_id, filename)? {
                Some(existing) => merge_playlist_entry(&existing, &job.entry, job.position, 1.0),
                None => episode_from_entry(feed_id, filename, &job.entry, job.position, 1.0),
            };
            batch.push(episode);
        }

        let saved = self.store.save_episodes(&batch)?;
        log::info!("Feed {}: saved {} downloaded episodes", feed_id, saved);
        Ok(())
    }

    async fn set_state(&self, feed_id: i64, state: FeedState) {
        let mut ws = self.state.write().await;
        ws.feeds.insert(feed_id, state);
        if state != FeedState::Idle {
            ws.last_activity = Some(Utc::now());
        }
    }
}
