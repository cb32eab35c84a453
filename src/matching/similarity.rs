//! Longest-common-subsequence similarity ratio.
//!
//! Quadratic in the title lengths. Titles are short, but a full pass costs
//! files × titles × len², which is fine for a personal catalog and not for
//! bulk corpora.

/// Length of the longest common subsequence of two code-point sequences.
fn lcs_length(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    // table[i][j] = LCS of a[..i] and b[..j]
    let mut table = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            table[i][j] = if a[i - 1] == b[j - 1] {
                table[i - 1][j - 1] + 1
            } else {
                table[i - 1][j].max(table[i][j - 1])
            };
        }
    }
    table[a.len()][b.len()]
}

/// `2 * LCS(a, b) / (len(a) + len(b))` over Unicode code points.
///
/// Symmetric, 1.0 for identical non-empty inputs, 0.0 when either is empty.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let lcs = lcs_length(&a, &b);
    (2 * lcs) as f64 / (a.len() + b.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_identical() {
        assert_eq!(similarity("episode one", "episode one"), 1.0);
        assert_eq!(similarity("x", "x"), 1.0);
        assert_eq!(similarity("日本語", "日本語"), 1.0);
    }

    #[test]
    fn test_similarity_empty() {
        assert_eq!(similarity("", ""), 0.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert_eq!(similarity("", "abc"), 0.0);
    }

    #[test]
    fn test_similarity_symmetric() {
        let pairs = [
            ("the villain", "villain the"),
            ("abcdef", "azced"),
            ("part one: x", "part two: x"),
            ("short", "a much longer string entirely"),
            ("ñandú", "nandu"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a), "{:?} vs {:?}", a, b);
        }
    }

    #[test]
    fn test_similarity_known_value() {
        // LCS("abcde", "ace") = 3 -> 2*3 / 8
        assert!((similarity("abcde", "ace") - 0.75).abs() < 1e-12);
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_similarity_counts_code_points_not_bytes() {
        // "é" is two bytes but one code point; LCS = 2 of lengths 3 and 3
        let score = similarity("éab", "xab");
        assert!((score - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_similarity_bounded() {
        let score = similarity("the quick brown fox", "the lazy dog");
        assert!((0.0..=1.0).contains(&score));
    }
}
