use crate::database::{CatalogStore, DownloadStatus, Feed};
use crate::error::{SyncError, SyncResult};
use crate::matching::{Matcher, MATCH_THRESHOLD};
use crate::playlist::{PlaylistClient, PlaylistEntry};
use crate::sync::{list_media_files, MATCH_EXTENSION};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// One playlist entry waiting for its audio.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// 1-based playlist position, used as the record's display order.
    pub position: i64,
    pub entry: PlaylistEntry,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    /// Audio written to `filename`, relative to the feed directory.
    Downloaded { filename: String },
    /// A matching file appeared since the reconcile pass; nothing fetched.
    AlreadyPresent { filename: String },
    /// The tool succeeded but its output file could not be located. The next
    /// reconcile pass picks it up by title.
    Unresolved,
    Failed(String),
    Cancelled,
}

/// Result from a download task
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub job: DownloadJob,
    pub outcome: DownloadOutcome,
}

/// Knobs for one feed's download batch.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub max_concurrent: usize,
    pub audio_quality: String,
    /// Pause after each download before the slot takes the next job.
    pub inter_download_delay: Duration,
    /// Waits between attempts; attempts = delays + 1.
    pub retry_delays: Vec<Duration>,
    pub max_depth: u32,
    pub part_aware: bool,
}

impl DownloadSettings {
    pub fn for_feed(feed: &Feed, inter_download_delay: Duration, retry_delays: Vec<Duration>) -> Self {
        Self {
            max_concurrent: feed.max_concurrent_downloads.max(1) as usize,
            audio_quality: feed.audio_quality.clone(),
            inter_download_delay,
            retry_delays,
            max_depth: feed.max_depth,
            part_aware: feed.part_aware_matching,
        }
    }
}

/// Download `jobs` into `directory`, at most `max_concurrent` at a time.
///
/// Jobs start in the given order. Every job yields a result, including the
/// ones skipped after cancellation, so completed work can still be persisted.
pub async fn download_jobs(
    store: Arc<dyn CatalogStore>,
    client: Arc<dyn PlaylistClient>,
    feed_id: i64,
    directory: PathBuf,
    jobs: Vec<DownloadJob>,
    settings: DownloadSettings,
    cancel: CancellationToken,
) -> Vec<DownloadResult> {
    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
    let settings = Arc::new(settings);
    let mut tasks = JoinSet::new();

    for (order, job) in jobs.into_iter().enumerate() {
        // Acquire before spawning so jobs start in playlist order.
        let permit = tokio::select! {
            _ = cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            tasks.spawn(async move {
                (
                    order,
                    DownloadResult {
                        job,
                        outcome: DownloadOutcome::Cancelled,
                    },
                )
            });
            continue;
        };

        let store = store.clone();
        let client = client.clone();
        let directory = directory.clone();
        let settings = settings.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let outcome =
                run_job(store.as_ref(), client.as_ref(), feed_id, &directory, &job, &settings, &cancel)
                    .await;

            if matches!(outcome, DownloadOutcome::Downloaded { .. }) {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(settings.inter_download_delay) => {}
                }
            }
            drop(permit);
            (order, DownloadResult { job, outcome })
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => log::error!("Download task panicked: {}", e),
        }
    }
    results.sort_by_key(|(order, _)| *order);
    results.into_iter().map(|(_, result)| result).collect()
}

async fn run_job(
    store: &dyn CatalogStore,
    client: &dyn PlaylistClient,
    feed_id: i64,
    directory: &Path,
    job: &DownloadJob,
    settings: &DownloadSettings,
    cancel: &CancellationToken,
) -> DownloadOutcome {
    if cancel.is_cancelled() {
        return DownloadOutcome::Cancelled;
    }
    let entry = &job.entry;

    // Another download or a manual copy may have produced the file already.
    match existing_match(store, feed_id, directory, entry, settings) {
        Ok(Some(filename)) => {
            log::info!("Skipping download of '{}', already present as {}", entry.title, filename);
            if let Err(e) = store.mark_source_downloaded(feed_id, &entry.source_id, &filename) {
                log::warn!("Failed to record {} as downloaded: {}", entry.source_id, e);
            }
            return DownloadOutcome::AlreadyPresent { filename };
        }
        Ok(None) => {}
        Err(e) => log::warn!("Pre-download match check failed for '{}': {}", entry.title, e),
    }

    let queue_id = match store.enqueue_download(feed_id, &entry.source_id, &entry.title) {
        Ok(id) => Some(id),
        Err(e) => {
            log::warn!("Failed to enqueue download for '{}': {}", entry.title, e);
            None
        }
    };
    let set_status = |status: DownloadStatus, progress: Option<i32>, error: Option<&str>| {
        if let Some(id) = &queue_id {
            if let Err(e) = store.update_download_status(id, status, progress, error) {
                log::warn!("Failed to update download {}: {}", id, e);
            }
        }
    };

    set_status(DownloadStatus::Downloading, Some(0), None);

    let result = download_with_retry(client, directory, entry, settings, cancel, |percent| {
        set_status(DownloadStatus::Downloading, Some(percent), None)
    })
    .await;

    match result {
        Ok(Some(path)) => {
            let filename = relative_name(directory, &path);
            set_status(DownloadStatus::Completed, Some(100), None);
            if let Err(e) = store.mark_source_downloaded(feed_id, &entry.source_id, &filename) {
                log::warn!("Failed to record {} as downloaded: {}", entry.source_id, e);
            }
            log::info!("Downloaded '{}' as {}", entry.title, filename);
            DownloadOutcome::Downloaded { filename }
        }
        Ok(None) => {
            set_status(DownloadStatus::Completed, Some(100), None);
            log::warn!("Downloaded '{}' but could not locate the output file", entry.title);
            DownloadOutcome::Unresolved
        }
        Err(SyncError::Cancelled) => {
            set_status(DownloadStatus::Failed, None, Some("cancelled"));
            DownloadOutcome::Cancelled
        }
        Err(e) => {
            let message = e.to_string();
            set_status(DownloadStatus::Failed, None, Some(&message));
            log::error!("Download failed for '{}': {}", entry.title, message);
            DownloadOutcome::Failed(message)
        }
    }
}

/// Download with automatic retry, forwarding progress to `on_progress`.
async fn download_with_retry(
    client: &dyn PlaylistClient,
    directory: &Path,
    entry: &PlaylistEntry,
    settings: &DownloadSettings,
    cancel: &CancellationToken,
    on_progress: impl Fn(i32),
) -> SyncResult<Option<PathBuf>> {
    let attempts = settings.retry_delays.len() + 1;

    for attempt in 0..attempts {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let (tx, mut rx) = mpsc::channel::<i32>(32);
        let download = client.download(&entry.source_id, directory, &settings.audio_quality, Some(tx));
        tokio::pin!(download);

        let mut last_percent = -1;
        let result = loop {
            tokio::select! {
                result = &mut download => break result,
                Some(percent) = rx.recv() => {
                    // Progress lines repeat; only record changes.
                    if percent != last_percent {
                        last_percent = percent;
                        on_progress(percent);
                    }
                }
            }
        };

        match result {
            Ok(path) => return Ok(path),
            Err(e) if attempt + 1 < attempts => {
                let delay = settings.retry_delays[attempt];
                log::warn!(
                    "Download attempt {} failed, retrying in {}s: {}",
                    attempt + 1,
                    delay.as_secs(),
                    e
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                return Err(SyncError::Playlist(format!(
                    "Download failed after {} attempts: {}",
                    attempts, e
                )))
            }
        }
    }

    Err(SyncError::Playlist("no download attempts configured".to_string()))
}

/// An unclaimed file on disk that already matches `entry`.
fn existing_match(
    store: &dyn CatalogStore,
    feed_id: i64,
    directory: &Path,
    entry: &PlaylistEntry,
    settings: &DownloadSettings,
) -> SyncResult<Option<String>> {
    let files = list_media_files(directory, &[MATCH_EXTENSION.to_string()], settings.max_depth);
    if files.is_empty() {
        return Ok(None);
    }
    let claimed: HashSet<String> = store.get_downloaded_sources(feed_id)?.into_values().collect();
    let best = Matcher::new(settings.part_aware).find_best_match(&entry.title, &files, &claimed);
    Ok(best
        .filter(|found| found.score >= MATCH_THRESHOLD)
        .map(|found| found.filename))
}

/// `path` relative to `directory` with `/` separators, or its bare file name
/// when it lies elsewhere.
fn relative_name(directory: &Path, path: &Path) -> String {
    match path.strip_prefix(directory) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string()),
    }
}
