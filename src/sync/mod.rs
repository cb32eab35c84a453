//! Catalog reconciliation: playlist matching, directory scan and backfill.

pub mod merge;
pub mod reconcile;
pub mod scanner;

use serde::Serialize;

pub use reconcile::Reconciler;
pub use scanner::{list_media_files, DirectoryScanner, MAX_SCAN_DEPTH};

/// The only extension that takes part in fuzzy playlist matching.
pub const MATCH_EXTENSION: &str = "mp3";

/// Aggregate outcome of one playlist reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Existing records whose stored values changed.
    pub updated: usize,
    /// New records created for matched files.
    pub added: usize,
    /// Entries with no acceptable match.
    pub skipped: usize,
    /// Entries whose writes failed.
    pub failed: usize,
    /// Matched entries whose record already held the same values.
    pub unchanged: usize,
    pub matched: usize,
    pub total: usize,
}

impl SyncReport {
    pub fn writes(&self) -> usize {
        self.updated + self.added
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} matched: {} added, {} updated, {} unchanged, {} skipped, {} failed",
            self.matched, self.total, self.added, self.updated, self.unchanged, self.skipped, self.failed
        )
    }
}
