//! Fuzzy assignment of playlist entries to audio files on disk.
//!
//! Matching is greedy and single-pass: entries are processed in playlist
//! order, each takes the best unclaimed file, and a claimed file is never
//! offered to a later entry. Earlier entries win ties and ambiguous files.

pub mod normalize;
pub mod report;
pub mod similarity;

use crate::playlist::PlaylistEntry;
use std::collections::HashSet;
use std::path::Path;

pub use normalize::normalize;
pub use report::MatchReport;
pub use similarity::similarity;

/// Minimum score for a file to be accepted as an entry's match.
pub const MATCH_THRESHOLD: f64 = 0.6;

/// Matches below this are accepted but reported as low confidence.
pub const LOW_CONFIDENCE: f64 = 0.7;

/// A candidate file and how well it scored against a title.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFile {
    pub filename: String,
    pub score: f64,
}

/// Outcome of matching one playlist entry.
#[derive(Debug, Clone)]
pub struct EntryMatch<'a> {
    /// 1-based position of the entry in the playlist.
    pub position: i64,
    pub entry: &'a PlaylistEntry,
    /// `None` when no file reached [`MATCH_THRESHOLD`].
    pub filename: Option<String>,
    /// Best score seen, even when rejected.
    pub score: f64,
}

impl EntryMatch<'_> {
    pub fn is_matched(&self) -> bool {
        self.filename.is_some()
    }
}

/// Scoring strategy for title/stem pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher {
    /// Penalize "Part N:" titles whose part numbers disagree.
    pub part_aware: bool,
}

impl Matcher {
    pub fn new(part_aware: bool) -> Self {
        Self { part_aware }
    }

    /// Score a playlist title against a filename stem.
    pub fn score(&self, title: &str, stem: &str) -> f64 {
        if !self.part_aware {
            return similarity(&normalize(title), &normalize(stem));
        }

        let base_title = normalize(&normalize::strip_part_prefix(title));
        let base_stem = normalize(&normalize::strip_part_prefix(stem));
        let base_score = similarity(&base_title, &base_stem);

        match (normalize::part_number(title), normalize::part_number(stem)) {
            (Some(a), Some(b)) if a != b => base_score * 0.3,
            _ => {
                let full_score = similarity(&normalize(title), &normalize(stem));
                0.7 * full_score + 0.3 * base_score
            }
        }
    }

    /// Best candidate for `title` among files not in `exclude`.
    ///
    /// Ties keep the first candidate seen. Returns `None` only when there is
    /// nothing to compare against.
    pub fn find_best_match(
        &self,
        title: &str,
        candidates: &[String],
        exclude: &HashSet<String>,
    ) -> Option<ScoredFile> {
        let mut best: Option<ScoredFile> = None;

        for candidate in candidates {
            if exclude.contains(candidate) {
                continue;
            }
            let stem = file_stem(candidate);
            let score = self.score(title, &stem);
            let better = match &best {
                Some(current) => score > current.score,
                None => true,
            };
            if better {
                best = Some(ScoredFile {
                    filename: candidate.clone(),
                    score,
                });
            }
        }

        best
    }

    /// Match every entry, in order, claiming each accepted file once.
    pub fn reconcile_all<'a>(
        &self,
        entries: &'a [PlaylistEntry],
        candidates: &[String],
    ) -> Vec<EntryMatch<'a>> {
        let mut claimed: HashSet<String> = HashSet::new();
        let mut results = Vec::with_capacity(entries.len());

        for (idx, entry) in entries.iter().enumerate() {
            let position = idx as i64 + 1;
            let best = self.find_best_match(&entry.title, candidates, &claimed);

            let (filename, score) = match best {
                Some(found) if found.score >= MATCH_THRESHOLD => {
                    claimed.insert(found.filename.clone());
                    (Some(found.filename), found.score)
                }
                Some(found) => {
                    log::trace!(
                        "No acceptable match for '{}' (best '{}' at {:.2})",
                        entry.title,
                        found.filename,
                        found.score
                    );
                    (None, found.score)
                }
                None => (None, 0.0),
            };

            results.push(EntryMatch {
                position,
                entry,
                filename,
                score,
            });
        }

        results
    }
}

/// Free-function form of [`Matcher::find_best_match`] with plain LCS scoring.
pub fn find_best_match(
    title: &str,
    candidates: &[String],
    exclude: &HashSet<String>,
) -> Option<ScoredFile> {
    Matcher::default().find_best_match(title, candidates, exclude)
}

/// Free-function form of [`Matcher::reconcile_all`] with plain LCS scoring.
pub fn reconcile_all<'a>(entries: &'a [PlaylistEntry], candidates: &[String]) -> Vec<EntryMatch<'a>> {
    Matcher::default().reconcile_all(entries, candidates)
}

/// File name without directories or extension, e.g. `"a/b/Title.mp3"` -> `"Title"`.
pub fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn entry(id: &str, title: &str) -> PlaylistEntry {
        PlaylistEntry::new(id, title)
    }

    #[test]
    fn test_branded_title_matches_plain_filename() {
        let candidates = files(&["The Villain Who Built McDonald's.mp3"]);
        let best = find_best_match(
            "The Villain Who Built McDonald's | BEHIND THE BASTARDS",
            &candidates,
            &HashSet::new(),
        )
        .unwrap();
        assert_eq!(best.filename, "The Villain Who Built McDonald's.mp3");
        assert!(best.score > MATCH_THRESHOLD);
    }

    #[test]
    fn test_unrelated_title_is_rejected() {
        let entries = vec![entry("x", "Totally Unrelated Video Title That Won't Match")];
        let candidates = files(&["Completely Different Name.mp3"]);
        let results = reconcile_all(&entries, &candidates);
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_matched());
        assert!(results[0].score < MATCH_THRESHOLD);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(find_best_match("anything", &[], &HashSet::new()).is_none());
    }

    #[test]
    fn test_excluded_candidates_are_skipped() {
        let candidates = files(&["Episode One.mp3", "Episode One (copy).mp3"]);
        let mut exclude = HashSet::new();
        exclude.insert("Episode One.mp3".to_string());
        let best = find_best_match("Episode One", &candidates, &exclude).unwrap();
        assert_eq!(best.filename, "Episode One (copy).mp3");
    }

    #[test]
    fn test_all_excluded_returns_none() {
        let candidates = files(&["Episode One.mp3"]);
        let exclude: HashSet<String> = candidates.iter().cloned().collect();
        assert!(find_best_match("Episode One", &candidates, &exclude).is_none());
    }

    #[test]
    fn test_first_candidate_wins_ties() {
        let candidates = files(&["dir1/Same Title.mp3", "dir2/Same Title.mp3"]);
        let best = find_best_match("Same Title", &candidates, &HashSet::new()).unwrap();
        assert_eq!(best.filename, "dir1/Same Title.mp3");
        assert_eq!(best.score, 1.0);
    }

    #[test]
    fn test_identical_titles_claim_distinct_files() {
        let entries = vec![entry("a", "Same Title"), entry("b", "Same Title")];
        let candidates = files(&["Same Title.mp3", "Same Title (1).mp3"]);
        let results = reconcile_all(&entries, &candidates);

        let first = results[0].filename.clone().unwrap();
        let second = results[1].filename.clone().unwrap();
        assert_eq!(first, "Same Title.mp3");
        assert_eq!(second, "Same Title (1).mp3");
        assert_ne!(first, second);
    }

    #[test]
    fn test_earlier_entry_claims_first() {
        let entries = vec![entry("a", "Episode Alpha"), entry("b", "Episode Alpha Extended")];
        let candidates = files(&["Episode Alpha Extended.mp3"]);
        let results = reconcile_all(&entries, &candidates);

        // The first entry takes the only file even though the second fits it better.
        assert_eq!(results[0].filename.as_deref(), Some("Episode Alpha Extended.mp3"));
        assert!(results[1].filename.is_none());
    }

    #[test]
    fn test_positions_are_one_based_and_ordered() {
        let entries = vec![entry("a", "One"), entry("b", "Two"), entry("c", "Three")];
        let results = reconcile_all(&entries, &files(&["One.mp3", "Two.mp3", "Three.mp3"]));
        let positions: Vec<i64> = results.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(results.iter().all(|m| m.is_matched()));
    }

    #[test]
    fn test_nested_candidate_uses_file_stem() {
        let candidates = files(&["2023/archive/Deep Dive.mp3"]);
        let best = find_best_match("Deep Dive", &candidates, &HashSet::new()).unwrap();
        assert_eq!(best.score, 1.0);
    }

    #[test]
    fn test_part_aware_scoring_separates_parts() {
        let matcher = Matcher::new(true);
        let candidates = files(&[
            "Part One： The Man Who Sold The World.mp3",
            "Part Two： The Man Who Sold The World.mp3",
        ]);
        let best = matcher
            .find_best_match(
                "Part Two: The Man Who Sold The World | BEHIND THE BASTARDS",
                &candidates,
                &HashSet::new(),
            )
            .unwrap();
        assert_eq!(best.filename, "Part Two： The Man Who Sold The World.mp3");

        let mismatched = matcher.score(
            "Part One: The Man Who Sold The World",
            "Part Two: The Man Who Sold The World",
        );
        assert!(mismatched < MATCH_THRESHOLD);
    }

    #[test]
    fn test_part_aware_without_parts_matches_plain_score() {
        let matcher = Matcher::new(true);
        let plain = Matcher::default();
        let title = "A Regular Episode Title";
        let stem = "A Regular Episode Title";
        assert!((matcher.score(title, stem) - plain.score(title, stem)).abs() < 1e-9);
    }
}
