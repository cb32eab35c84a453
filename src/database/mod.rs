pub mod models;


use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub use models::*;

/// Persistence capability the sync engine runs against.
///
/// Filename lookups are case-insensitive. Marking a source id as downloaded
/// is idempotent.
pub trait CatalogStore: Send + Sync {
    fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>>;
    fn get_feeds(&self) -> Result<Vec<Feed>>;
    fn touch_feed_polled(&self, feed_id: i64) -> Result<()>;

    fn get_episodes_for_feed(&self, feed_id: i64) -> Result<Vec<Episode>>;
    fn get_episode_by_filename(&self, feed_id: i64, filename: &str) -> Result<Option<Episode>>;
    fn insert_episode(&self, episode: &Episode) -> Result<i64>;
    fn update_episode(&self, episode: &Episode) -> Result<()>;
    /// Insert (id 0) or update each episode in one transaction.
    fn save_episodes(&self, episodes: &[Episode]) -> Result<usize>;
    fn min_display_order(&self, feed_id: i64) -> Result<Option<i64>>;

    fn mark_source_downloaded(&self, feed_id: i64, source_id: &str, filename: &str) -> Result<()>;
    /// source id -> filename for every resolved entry of the feed.
    fn get_downloaded_sources(&self, feed_id: i64) -> Result<HashMap<String, String>>;

    fn enqueue_download(&self, feed_id: i64, source_id: &str, title: &str) -> Result<String>;
    fn update_download_status(
        &self,
        id: &str,
        status: DownloadStatus,
        progress: Option<i32>,
        error: Option<&str>,
    ) -> Result<()>;
}

/// Structured warning/error sink. Implementations swallow their own failures.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

pub struct Database {
    conn: Mutex<Connection>,
}

const EPISODE_COLUMNS: &str = "id, feed_id, filename, source_id, source_title, title, description,
    thumbnail_url, has_embedded_art, display_order, added_date, published_date, match_score,
    duration, file_size, artist, album, genre, year, track_number, bitrate, subtitle";

const FEED_COLUMNS: &str = "id, name, directory, extensions, max_depth, order_by, playlist_id,
    playlist_enabled, poll_interval_minutes, max_concurrent_downloads, audio_quality,
    part_aware_matching, last_polled_at";

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves SQLite consistent; keep going.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                directory TEXT NOT NULL,
                extensions TEXT NOT NULL DEFAULT 'mp3',
                max_depth INTEGER NOT NULL DEFAULT 0,
                order_by TEXT NOT NULL DEFAULT 'display_order',
                playlist_id TEXT,
                playlist_enabled INTEGER NOT NULL DEFAULT 0,
                poll_interval_minutes INTEGER NOT NULL DEFAULT 60,
                max_concurrent_downloads INTEGER NOT NULL DEFAULT 1,
                audio_quality TEXT NOT NULL DEFAULT '0',
                part_aware_matching INTEGER NOT NULL DEFAULT 0,
                last_polled_at TEXT
            );

            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_id INTEGER NOT NULL,
                filename TEXT NOT NULL COLLATE NOCASE,
                source_id TEXT,
                source_title TEXT,
                title TEXT,
                description TEXT,
                thumbnail_url TEXT,
                has_embedded_art INTEGER NOT NULL DEFAULT 0,
                display_order INTEGER NOT NULL DEFAULT 0,
                added_date TEXT NOT NULL,
                published_date TEXT,
                match_score REAL,
                duration REAL,
                file_size INTEGER,
                artist TEXT,
                album TEXT,
                genre TEXT,
                year INTEGER,
                track_number INTEGER,
                bitrate INTEGER,
                subtitle TEXT,
                FOREIGN KEY (feed_id) REFERENCES feeds(id) ON DELETE CASCADE,
                UNIQUE(feed_id, filename)
            );

            CREATE INDEX IF NOT EXISTS idx_episodes_feed_order
                ON episodes(feed_id, display_order);

            -- Ledger of remote entries already resolved to a file
            CREATE TABLE IF NOT EXISTS downloaded_sources (
                feed_id INTEGER NOT NULL,
                source_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (feed_id, source_id),
                FOREIGN KEY (feed_id) REFERENCES feeds(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS download_queue (
                id TEXT PRIMARY KEY,
                feed_id INTEGER NOT NULL,
                source_id TEXT NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                progress INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (feed_id) REFERENCES feeds(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_download_queue_feed_status
                ON download_queue(feed_id, status);

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                level TEXT NOT NULL,
                category TEXT NOT NULL,
                message TEXT NOT NULL,
                details_json TEXT,
                feed_id INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
        )?;

        Ok(())
    }

    // =========================================================================
    // Feed queries
    // =========================================================================

    /// Insert a feed or update its configuration (by name). Returns the id.
    pub fn upsert_feed(&self, feed: &Feed) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO feeds (name, directory, extensions, max_depth, order_by, playlist_id,
                                playlist_enabled, poll_interval_minutes, max_concurrent_downloads,
                                audio_quality, part_aware_matching)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                directory = excluded.directory,
                extensions = excluded.extensions,
                max_depth = excluded.max_depth,
                order_by = excluded.order_by,
                playlist_id = excluded.playlist_id,
                playlist_enabled = excluded.playlist_enabled,
                poll_interval_minutes = excluded.poll_interval_minutes,
                max_concurrent_downloads = excluded.max_concurrent_downloads,
                audio_quality = excluded.audio_quality,
                part_aware_matching = excluded.part_aware_matching",
            params![
                feed.name,
                feed.directory,
                feed.extensions.join(","),
                feed.max_depth,
                feed.order_by.to_string(),
                feed.playlist_id,
                feed.playlist_enabled as i32,
                feed.poll_interval_minutes,
                feed.max_concurrent_downloads,
                feed.audio_quality,
                feed.part_aware_matching as i32,
            ],
        )?;
        let id = conn.query_row("SELECT id FROM feeds WHERE name = ?", params![feed.name], |row| {
            row.get(0)
        })?;
        Ok(id)
    }

    pub fn get_feed_by_name(&self, name: &str) -> Result<Option<Feed>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM feeds WHERE name = ?", FEED_COLUMNS);
        let feed = conn
            .query_row(&sql, params![name], feed_from_row)
            .optional()?;
        Ok(feed)
    }

    /// Episodes in the order consumers should present them.
    pub fn get_ordered_episodes(&self, feed_id: i64, order: FeedOrder) -> Result<Vec<Episode>> {
        let order_clause = match order {
            FeedOrder::DisplayOrder => "display_order ASC, filename ASC",
            FeedOrder::PublishedDate => "published_date IS NULL, published_date DESC, display_order ASC",
            FeedOrder::AddedDate => "added_date DESC, display_order ASC",
        };
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM episodes WHERE feed_id = ? ORDER BY {}",
            EPISODE_COLUMNS, order_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let episodes = stmt
            .query_map(params![feed_id], episode_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(episodes)
    }

    // =========================================================================
    // Queue / audit queries
    // =========================================================================

    #[cfg(test)]
    pub(crate) fn get_download_queue(&self, feed_id: i64) -> Result<Vec<DownloadQueueItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, feed_id, source_id, title, status, progress, error_message, created_at, updated_at
             FROM download_queue WHERE feed_id = ? ORDER BY created_at ASC, rowid ASC",
        )?;
        let items = stmt
            .query_map(params![feed_id], |row| {
                Ok(DownloadQueueItem {
                    id: row.get(0)?,
                    feed_id: row.get(1)?,
                    source_id: row.get(2)?,
                    title: row.get(3)?,
                    status: row.get::<_, String>(4)?.into(),
                    progress: row.get(5)?,
                    error_message: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Most recent audit entries, newest first.
    pub fn get_audit_log(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT level, category, message, details_json, feed_id
             FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                let level: String = row.get(0)?;
                let details: Option<String> = row.get(3)?;
                Ok(AuditEntry {
                    level: if level == "error" {
                        AuditLevel::Error
                    } else {
                        AuditLevel::Warning
                    },
                    category: row.get(1)?,
                    message: row.get(2)?,
                    details: details.and_then(|d| serde_json::from_str(&d).ok()),
                    feed_id: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn insert_audit(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.conn();
        let details = entry.details.as_ref().map(|d| d.to_string());
        conn.execute(
            "INSERT INTO audit_log (level, category, message, details_json, feed_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                entry.level.to_string(),
                entry.category,
                entry.message,
                details,
                entry.feed_id,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl CatalogStore for Database {
    fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM feeds WHERE id = ?", FEED_COLUMNS);
        let feed = conn
            .query_row(&sql, params![feed_id], feed_from_row)
            .optional()?;
        Ok(feed)
    }

    fn get_feeds(&self) -> Result<Vec<Feed>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM feeds ORDER BY id ASC", FEED_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let feeds = stmt
            .query_map([], feed_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    fn touch_feed_polled(&self, feed_id: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE feeds SET last_polled_at = ? WHERE id = ?",
            params![chrono::Utc::now().to_rfc3339(), feed_id],
        )?;
        Ok(())
    }

    fn get_episodes_for_feed(&self, feed_id: i64) -> Result<Vec<Episode>> {
        self.get_ordered_episodes(feed_id, FeedOrder::DisplayOrder)
    }

    fn get_episode_by_filename(&self, feed_id: i64, filename: &str) -> Result<Option<Episode>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM episodes WHERE feed_id = ? AND filename = ? COLLATE NOCASE",
            EPISODE_COLUMNS
        );
        let episode = conn
            .query_row(&sql, params![feed_id, filename], episode_from_row)
            .optional()?;
        Ok(episode)
    }

    fn insert_episode(&self, episode: &Episode) -> Result<i64> {
        let conn = self.conn();
        insert_episode_with(&conn, episode)
    }

    fn update_episode(&self, episode: &Episode) -> Result<()> {
        let conn = self.conn();
        update_episode_with(&conn, episode)
    }

    fn save_episodes(&self, episodes: &[Episode]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for episode in episodes {
            if episode.id == 0 {
                insert_episode_with(&tx, episode)?;
            } else {
                update_episode_with(&tx, episode)?;
            }
        }
        tx.commit()?;
        Ok(episodes.len())
    }

    fn min_display_order(&self, feed_id: i64) -> Result<Option<i64>> {
        let conn = self.conn();
        let min = conn.query_row(
            "SELECT MIN(display_order) FROM episodes WHERE feed_id = ?",
            params![feed_id],
            |row| row.get(0),
        )?;
        Ok(min)
    }

    fn mark_source_downloaded(&self, feed_id: i64, source_id: &str, filename: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO downloaded_sources (feed_id, source_id, filename) VALUES (?, ?, ?)
             ON CONFLICT(feed_id, source_id) DO NOTHING",
            params![feed_id, source_id, filename],
        )?;
        Ok(())
    }

    fn get_downloaded_sources(&self, feed_id: i64) -> Result<HashMap<String, String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT source_id, filename FROM downloaded_sources WHERE feed_id = ?")?;
        let rows = stmt
            .query_map(params![feed_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<String, String>, _>>()?;
        Ok(rows)
    }

    fn enqueue_download(&self, feed_id: i64, source_id: &str, title: &str) -> Result<String> {
        let conn = self.conn();
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO download_queue (id, feed_id, source_id, title, status, progress, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'queued', 0, ?, ?)",
            params![id, feed_id, source_id, title, now, now],
        )?;
        Ok(id)
    }

    fn update_download_status(
        &self,
        id: &str,
        status: DownloadStatus,
        progress: Option<i32>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE download_queue SET
                status = ?,
                progress = COALESCE(?, progress),
                error_message = ?,
                updated_at = ?
             WHERE id = ?",
            params![status.to_string(), progress, error, chrono::Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }
}

impl AuditSink for Database {
    fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.insert_audit(&entry) {
            log::warn!("Failed to write audit entry '{}': {}", entry.message, e);
        }
    }
}

fn insert_episode_with(conn: &Connection, episode: &Episode) -> Result<i64> {
    conn.execute(
        "INSERT INTO episodes (feed_id, filename, source_id, source_title, title, description,
                               thumbnail_url, has_embedded_art, display_order, added_date,
                               published_date, match_score, duration, file_size, artist, album,
                               genre, year, track_number, bitrate, subtitle)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            episode.feed_id,
            episode.filename,
            episode.source_id,
            episode.source_title,
            episode.title,
            episode.description,
            episode.thumbnail_url,
            episode.has_embedded_art as i32,
            episode.display_order,
            episode.added_date,
            episode.published_date,
            episode.match_score,
            episode.duration,
            episode.file_size,
            episode.artist,
            episode.album,
            episode.genre,
            episode.year,
            episode.track_number,
            episode.bitrate,
            episode.subtitle,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn update_episode_with(conn: &Connection, episode: &Episode) -> Result<()> {
    let changed = conn.execute(
        "UPDATE episodes SET
            filename = ?, source_id = ?, source_title = ?, title = ?, description = ?,
            thumbnail_url = ?, has_embedded_art = ?, display_order = ?, published_date = ?,
            match_score = ?, duration = ?, file_size = ?, artist = ?, album = ?, genre = ?,
            year = ?, track_number = ?, bitrate = ?, subtitle = ?
         WHERE id = ?",
        params![
            episode.filename,
            episode.source_id,
            episode.source_title,
            episode.title,
            episode.description,
            episode.thumbnail_url,
            episode.has_embedded_art as i32,
            episode.display_order,
            episode.published_date,
            episode.match_score,
            episode.duration,
            episode.file_size,
            episode.artist,
            episode.album,
            episode.genre,
            episode.year,
            episode.track_number,
            episode.bitrate,
            episode.subtitle,
            episode.id,
        ],
    )?;
    if changed == 0 {
        anyhow::bail!("Episode {} ({}) not found", episode.id, episode.filename);
    }
    Ok(())
}

fn episode_from_row(row: &Row<'_>) -> rusqlite::Result<Episode> {
    Ok(Episode {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        filename: row.get(2)?,
        source_id: row.get(3)?,
        source_title: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        thumbnail_url: row.get(7)?,
        has_embedded_art: row.get::<_, i32>(8)? == 1,
        display_order: row.get(9)?,
        added_date: row.get(10)?,
        published_date: row.get(11)?,
        match_score: row.get(12)?,
        duration: row.get(13)?,
        file_size: row.get(14)?,
        artist: row.get(15)?,
        album: row.get(16)?,
        genre: row.get(17)?,
        year: row.get(18)?,
        track_number: row.get(19)?,
        bitrate: row.get(20)?,
        subtitle: row.get(21)?,
    })
}

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<Feed> {
    let extensions: String = row.get(3)?;
    Ok(Feed {
        id: row.get(0)?,
        name: row.get(1)?,
        directory: row.get(2)?,
        extensions: extensions
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect(),
        max_depth: row.get(4)?,
        order_by: row.get::<_, String>(5)?.into(),
        playlist_id: row.get(6)?,
        playlist_enabled: row.get::<_, i32>(7)? == 1,
        poll_interval_minutes: row.get(8)?,
        max_concurrent_downloads: row.get(9)?,
        audio_quality: row.get(10)?,
        part_aware_matching: row.get::<_, i32>(11)? == 1,
        last_polled_at: row.get(12)?,
    })
}
