//! `PlaylistClient` backed by the `yt-dlp` executable.

use super::{EntryDetails, PlaylistClient, PlaylistEntry};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

pub struct YtDlpClient {
    binary: PathBuf,
}

impl YtDlpClient {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run_json(&self, args: &[&str]) -> SyncResult<String> {
        log::debug!("Running {:?} {:?}", self.binary, args);
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SyncError::Playlist(format!("Failed to spawn yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::Playlist(format!(
                "yt-dlp failed with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for YtDlpClient {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl PlaylistClient for YtDlpClient {
    async fn list_entries(&self, playlist_id: &str) -> SyncResult<Vec<PlaylistEntry>> {
        let url = playlist_url(playlist_id);
        let json = self.run_json(&["--flat-playlist", "-J", &url]).await?;
        parse_playlist_json(&json)
    }

    async fn fetch_details(&self, source_id: &str) -> SyncResult<Option<EntryDetails>> {
        let url = video_url(source_id);
        match self.run_json(&["-J", "--skip-download", &url]).await {
            Ok(json) => parse_details_json(&json).map(Some),
            Err(e) => {
                log::warn!("Could not fetch details for {}: {}", source_id, e);
                Ok(None)
            }
        }
    }

    async fn download(
        &self,
        source_id: &str,
        target_dir: &Path,
        quality: &str,
        progress: Option<mpsc::Sender<i32>>,
    ) -> SyncResult<Option<PathBuf>> {
        let url = video_url(source_id);
        let template = target_dir.join("%(title)s.%(ext)s");
        let template = template.to_string_lossy().to_string();

        log::info!("Downloading {} into {:?}", source_id, target_dir);

        let mut child = Command::new(&self.binary)
            .args([
                "-x",
                "--audio-format",
                "mp3",
                "--audio-quality",
                quality,
                "--newline",
                "--no-playlist",
                "--print",
                "after_move:filepath",
                "-o",
                &template,
                &url,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SyncError::Playlist(format!("Failed to spawn yt-dlp: {}", e)))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("yt-dlp: {}", line);
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::Playlist("yt-dlp stdout unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut output_path: Option<PathBuf> = None;

        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(percent) = parse_progress(&line) {
                if let Some(tx) = &progress {
                    let _ = tx.send(percent).await;
                }
            } else if let Some(path) = parse_output_path(&line) {
                output_path = Some(path);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| SyncError::Playlist(format!("Failed to wait for yt-dlp: {}", e)))?;

        if !status.success() {
            return Err(SyncError::Playlist(format!(
                "yt-dlp download of {} failed with status: {}",
                source_id, status
            )));
        }

        Ok(output_path.filter(|p| p.exists()))
    }
}

pub fn playlist_url(playlist_id: &str) -> String {
    if playlist_id.starts_with("http://") || playlist_id.starts_with("https://") {
        playlist_id.to_string()
    } else {
        format!("https://www.youtube.com/playlist?list={}", playlist_id)
    }
}

pub fn video_url(source_id: &str) -> String {
    if source_id.starts_with("http://") || source_id.starts_with("https://") {
        source_id.to_string()
    } else {
        format!("https://www.youtube.com/watch?v={}", source_id)
    }
}

/// Parse `yt-dlp --flat-playlist -J` output into entries, dropping
/// unavailable items.
pub fn parse_playlist_json(json: &str) -> SyncResult<Vec<PlaylistEntry>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let items = value
        .get("entries")
        .and_then(|e| e.as_array())
        .ok_or_else(|| SyncError::Playlist("playlist JSON has no entries".to_string()))?;

    let entries = items
        .iter()
        .filter_map(|item| {
            let id = item.get("id")?.as_str()?;
            let title = item.get("title")?.as_str()?.trim();
            if title.is_empty() || super::is_unavailable_title(title) {
                return None;
            }
            Some(PlaylistEntry::new(id, title))
        })
        .collect();

    Ok(entries)
}

/// Parse a single-video `yt-dlp -J` document into details.
pub fn parse_details_json(json: &str) -> SyncResult<EntryDetails> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let text = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(EntryDetails {
        description: text("description"),
        thumbnail_url: text("thumbnail"),
        upload_date: text("upload_date").map(|d| format_upload_date(&d)),
    })
}

/// yt-dlp reports `YYYYMMDD`; store ISO dates.
fn format_upload_date(raw: &str) -> String {
    chrono::NaiveDate::parse_from_str(raw, "%Y%m%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Parse a progress percentage from a `[download]  42.3% of ...` line.
pub fn parse_progress(line: &str) -> Option<i32> {
    let rest = line.trim_start().strip_prefix("[download]")?;
    let token = rest.split_whitespace().next()?;
    let number = token.strip_suffix('%')?;
    number
        .parse::<f64>()
        .ok()
        .map(|p| (p.floor() as i32).clamp(0, 100))
}

/// Lines printed by `--print after_move:filepath` are bare paths.
fn parse_output_path(line: &str) -> Option<PathBuf> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('[') {
        return None;
    }
    let path = PathBuf::from(trimmed);
    path.is_absolute().then_some(path)
}
