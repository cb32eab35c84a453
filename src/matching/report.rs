//! Dry-run summary of a matching pass, for review before anything is written.

use super::{EntryMatch, LOW_CONFIDENCE};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct MatchRow {
    pub order: i64,
    pub title: String,
    pub source_id: String,
    pub filename: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub rows: Vec<MatchRow>,
    pub total_entries: usize,
    pub total_files: usize,
    pub matched: usize,
    pub unmatched_files: usize,
    pub average_score: f64,
}

impl MatchReport {
    pub fn new(matches: &[EntryMatch<'_>], total_files: usize) -> Self {
        let rows: Vec<MatchRow> = matches
            .iter()
            .map(|m| MatchRow {
                order: m.position,
                title: m.entry.title.clone(),
                source_id: m.entry.source_id.clone(),
                filename: m.filename.clone(),
                score: m.score,
            })
            .collect();

        let scores: Vec<f64> = rows
            .iter()
            .filter(|r| r.filename.is_some())
            .map(|r| r.score)
            .collect();
        let matched = scores.len();
        let average_score = if matched == 0 {
            0.0
        } else {
            scores.iter().sum::<f64>() / matched as f64
        };

        Self {
            total_entries: rows.len(),
            total_files,
            matched,
            unmatched_files: total_files.saturating_sub(matched),
            average_score,
            rows,
        }
    }

    /// Accepted matches scoring under [`LOW_CONFIDENCE`].
    pub fn low_confidence(&self) -> impl Iterator<Item = &MatchRow> {
        self.rows
            .iter()
            .filter(|r| r.filename.is_some() && r.score < LOW_CONFIDENCE)
    }

    /// Matched filenames in playlist order.
    pub fn ordered_files(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().filter_map(|r| r.filename.as_deref())
    }
}

impl fmt::Display for MatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            writeln!(f, "{:>4}. {}", row.order, row.title)?;
            match &row.filename {
                Some(filename) => writeln!(f, "      -> {} ({:.2}%)", filename, row.score * 100.0)?,
                None => writeln!(f, "      -> NO MATCH FOUND")?,
            }
        }

        writeln!(f)?;
        writeln!(f, "Statistics:")?;
        writeln!(f, "  Total playlist entries: {}", self.total_entries)?;
        writeln!(f, "  Total files: {}", self.total_files)?;
        writeln!(f, "  Successful matches: {}", self.matched)?;
        writeln!(f, "  Unmatched files: {}", self.unmatched_files)?;
        writeln!(f, "  Average match score: {:.2}%", self.average_score * 100.0)?;

        let low: Vec<&MatchRow> = self.low_confidence().collect();
        if !low.is_empty() {
            writeln!(
                f,
                "  {} matches have low confidence (< {:.0}%):",
                low.len(),
                LOW_CONFIDENCE * 100.0
            )?;
            for row in low.iter().take(5) {
                writeln!(
                    f,
                    "     - {} -> {} ({:.2}%)",
                    row.title,
                    row.filename.as_deref().unwrap_or_default(),
                    row.score * 100.0
                )?;
            }
            if low.len() > 5 {
                writeln!(f, "     ... and {} more", low.len() - 5)?;
            }
        }
        Ok(())
    }
}
