//! Title canonicalization shared by playlist titles and filename stems.

use regex::Regex;
use std::sync::OnceLock;

/// Separator remote sources use to append channel branding to a title,
/// e.g. `"Some Episode | BEHIND THE BASTARDS"`.
pub const BRANDING_SEPARATOR: char = '|';

/// Map full-width punctuation that downloaders substitute into filenames
/// back to ASCII.
fn ascii_punctuation(c: char) -> char {
    match c {
        '｜' => '|',
        '：' => ':',
        '？' => '?',
        other => other,
    }
}

/// Canonicalize a display title or filename stem for comparison.
///
/// Lower-cases, drops the branding suffix after the last `|`, collapses
/// whitespace and trims. Separators left in front of the dropped suffix are
/// treated as whitespace so a second pass never removes more text.
pub fn normalize(text: &str) -> String {
    let lowered: String = text.chars().map(ascii_punctuation).collect::<String>().to_lowercase();

    let without_branding = match lowered.rfind(BRANDING_SEPARATOR) {
        Some(idx) => lowered[..idx].trim_end(),
        None => lowered.as_str(),
    };

    without_branding
        .split(|c: char| c.is_whitespace() || c == BRANDING_SEPARATOR)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn part_prefix() -> &'static Regex {
    static PART_PREFIX: OnceLock<Regex> = OnceLock::new();
    PART_PREFIX.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:part|pt\.?)\s+(one|two|three|four|five|six|seven|eight|nine|ten|\d+)\s*[:：]\s*",
        )
        .expect("part prefix pattern is valid")
    })
}

/// Extract the part number from a `"Part Three: ..."` / `"Pt 2: ..."` prefix.
pub fn part_number(title: &str) -> Option<u32> {
    let caps = part_prefix().captures(title)?;
    let word = caps.get(1)?.as_str().to_lowercase();
    match word.as_str() {
        "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        "six" => Some(6),
        "seven" => Some(7),
        "eight" => Some(8),
        "nine" => Some(9),
        "ten" => Some(10),
        digits => digits.parse().ok(),
    }
}

/// Strip a leading part prefix, leaving the episode's base name.
pub fn strip_part_prefix(title: &str) -> String {
    part_prefix().replace(title, "").into_owned()
}
