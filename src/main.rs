use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use podcast_catalog_sync::config::{default_config_path, AppConfig};
use podcast_catalog_sync::database::{CatalogStore, Database, Feed};
use podcast_catalog_sync::matching::{MatchReport, Matcher};
use podcast_catalog_sync::metadata::LoftyMetadataReader;
use podcast_catalog_sync::playlist::{load_playlist_file, YtDlpClient};
use podcast_catalog_sync::sync::{list_media_files, DirectoryScanner, MATCH_EXTENSION};
use podcast_catalog_sync::{init_logging, open_catalog, Orchestrator};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(version, about = "Keep a podcast catalog in sync with its playlist and media folder")]
struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every playlist-enabled feed until interrupted.
    Run,
    /// One pass over the playlist-enabled feeds, ignoring poll intervals.
    SyncOnce {
        /// Only this feed.
        #[arg(long)]
        feed: Option<String>,
    },
    /// Register new files and backfill metadata for one feed.
    Scan {
        #[arg(long)]
        feed: String,
    },
    /// Show how a saved playlist would match the feed's files. Writes nothing.
    Match {
        #[arg(long)]
        feed: String,
        /// JSON array of {"id", "title"} objects or bare titles.
        #[arg(long)]
        playlist: PathBuf,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Write the feed's filenames in catalog order, one per line.
    ExportOrder {
        #[arg(long)]
        feed: String,
        /// Output file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Oldest first.
        #[arg(long)]
        reverse: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = CliArgs::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    match args.command {
        Command::Run => run(&config).await,
        Command::SyncOnce { feed } => sync_once(&config, feed.as_deref()).await,
        Command::Scan { feed } => scan(&config, &feed),
        Command::Match {
            feed,
            playlist,
            json,
        } => match_playlist(&config, &feed, &playlist, json),
        Command::ExportOrder {
            feed,
            output,
            reverse,
        } => export_order(&config, &feed, output.as_deref(), reverse),
    }
}

fn build_orchestrator(config: &AppConfig, db: Arc<Database>) -> Orchestrator {
    Orchestrator::new(
        db.clone(),
        db,
        Arc::new(YtDlpClient::new(&config.ytdlp_path)),
        Arc::new(LoftyMetadataReader),
        config.orchestrator_config(),
    )
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Interrupt received, stopping after in-flight work");
                token.cancel();
            }
            Err(e) => log::warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

async fn run(config: &AppConfig) -> Result<()> {
    let db = open_catalog(config)?;
    let orchestrator = build_orchestrator(config, db);
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    orchestrator.run(cancel).await;
    Ok(())
}

async fn sync_once(config: &AppConfig, only: Option<&str>) -> Result<()> {
    let db = open_catalog(config)?;
    let feeds: Vec<Feed> = db
        .get_feeds()?
        .into_iter()
        .filter(|f| only.map_or(true, |name| f.name == name))
        .filter(Feed::syncs_playlist)
        .collect();
    if feeds.is_empty() {
        match only {
            Some(name) => bail!("feed '{}' does not exist or has no enabled playlist", name),
            None => bail!("no feeds with an enabled playlist"),
        }
    }

    let orchestrator = build_orchestrator(config, db);
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let summaries = orchestrator.sync_feeds(&feeds, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

fn scan(config: &AppConfig, name: &str) -> Result<()> {
    let db = open_catalog(config)?;
    let feed = stored_feed(&db, name)?;

    let reader = LoftyMetadataReader;
    let added = DirectoryScanner::new(db.as_ref(), &reader).sync_directory(
        feed.id,
        Path::new(&feed.directory),
        &feed.extensions,
        feed.max_depth,
    )?;
    println!("{} new files registered for '{}'", added, feed.name);
    Ok(())
}

fn match_playlist(config: &AppConfig, name: &str, playlist: &Path, json: bool) -> Result<()> {
    let feed = config
        .feed(name)
        .with_context(|| format!("feed '{}' is not configured", name))?;
    let entries = load_playlist_file(playlist)?;
    let files = list_media_files(
        Path::new(&feed.directory),
        &[MATCH_EXTENSION.to_string()],
        feed.max_depth,
    );
    log::info!(
        "Matching {} playlist entries against {} files",
        entries.len(),
        files.len()
    );

    let matches = Matcher::new(feed.part_aware_matching).reconcile_all(&entries, &files);
    let report = MatchReport::new(&matches, files.len());
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

fn export_order(config: &AppConfig, name: &str, output: Option<&Path>, reverse: bool) -> Result<()> {
    let db = open_catalog(config)?;
    let feed = stored_feed(&db, name)?;

    let mut filenames: Vec<String> = db
        .get_ordered_episodes(feed.id, feed.order_by)?
        .into_iter()
        .map(|e| e.filename)
        .collect();
    if reverse {
        filenames.reverse();
    }

    let mut text = filenames.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    match output {
        Some(path) => {
            std::fs::write(path, &text).with_context(|| format!("writing {}", path.display()))?;
            log::info!("Wrote {} entries to {}", filenames.len(), path.display());
        }
        None => std::io::stdout().write_all(text.as_bytes())?,
    }
    Ok(())
}

fn stored_feed(db: &Database, name: &str) -> Result<Feed> {
    db.get_feed_by_name(name)?
        .with_context(|| format!("feed '{}' is not configured", name))
}
