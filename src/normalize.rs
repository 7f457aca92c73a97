//! Track identifier derivation from downloaded media filenames.
//!
//! Downloads are named `Artist - Title - <date or id suffix>`. The identifier
//! is the title segment with video noise ("(Official Video)", "[Lyrics]", ...)
//! removed. It doubles as the cache key and the search query, so every
//! function here must stay deterministic.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// Constants
// ============================================================================

/// Separator between artist, title and suffix segments.
pub const SEGMENT_SEPARATOR: &str = " - ";

/// A trailing segment (separator included) must be longer than this many
/// characters to be treated as a date/id suffix and stripped.
pub const MIN_SUFFIX_CHARS: usize = 10;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Video noise commonly appended to uploaded track titles (applied in order).
pub static NOISE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // "(Official Video)", "[Official Music Video]", "(Official Audio)", "(Official Lyric Video)"
        Regex::new(r"(?i)\s*[\(\[]\s*official\s+(?:music\s+|lyric\s+|hd\s+)?(?:video|audio|visuali[sz]er)\s*[\)\]]").unwrap(),
        // "(Lyrics)", "[Lyric Video]", "(Audio)", "(Visualizer)"
        Regex::new(r"(?i)\s*[\(\[]\s*(?:lyrics?(?:\s+video)?|audio|visuali[sz]er|video\s+clip)\s*[\)\]]").unwrap(),
        // Quality markers: "(HD)", "[4K]", "(HQ)", "[1080p]"
        Regex::new(r"(?i)\s*[\(\[]\s*(?:hd|hq|4k|\d{3,4}p)\s*[\)\]]").unwrap(),
        // Remaster variants: "(2011 Remaster)", "[Remastered 2009]"
        Regex::new(r"(?i)\s*[\(\[]\s*(?:\d{4}\s+)?remaster(?:ed)?(?:\s+\d{4})?\s*[\)\]]").unwrap(),
        // Bare trailing tags: "Song Official Video", "Song Lyrics"
        Regex::new(r"(?i)\s+(?:official\s+(?:music\s+)?video|lyrics)$").unwrap(),
    ]
});

/// Regex to collapse multiple whitespace into single space
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

// ============================================================================
// Identifier Derivation
// ============================================================================

/// Drop a trailing ` - <suffix>` segment when the suffix is long enough to be
/// a date or upload id. Titles without such a segment are returned whole.
pub fn strip_trailing_suffix(title: &str) -> &str {
    match title.rfind(SEGMENT_SEPARATOR) {
        Some(idx) if title[idx..].chars().count() > MIN_SUFFIX_CHARS => &title[..idx],
        _ => title,
    }
}

/// Take the last ` - ` segment of an `Artist - Title` string.
/// Without a separator the whole string is the title.
pub fn title_segment(title: &str) -> &str {
    match title.rfind(SEGMENT_SEPARATOR) {
        Some(idx) => &title[idx + SEGMENT_SEPARATOR.len()..],
        None => title,
    }
}

/// Remove video noise tags and collapse whitespace.
pub fn strip_noise(title: &str) -> String {
    let mut s = title.to_string();
    for pattern in NOISE_PATTERNS.iter() {
        s = pattern.replace_all(&s, "").to_string();
    }
    MULTI_SPACE.replace_all(&s, " ").trim().to_string()
}

/// Derive the track identifier from a file stem (filename without extension).
///
/// May return an empty string, e.g. for stems made only of separators or noise.
pub fn derive_track_identifier(stem: &str) -> String {
    let stem = stem.trim();
    let without_suffix = strip_trailing_suffix(stem);
    strip_noise(title_segment(without_suffix))
}

// ============================================================================
// Matching Normalization
// ============================================================================

fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036F}' | '\u{1AB0}'..='\u{1AFF}' |
             '\u{1DC0}'..='\u{1DFF}' | '\u{20D0}'..='\u{20FF}' |
             '\u{FE20}'..='\u{FE2F}')
}

/// Fold to lowercase with diacritics removed ("Björk" -> "bjork").
/// Used only for comparison, never for cache keys.
pub fn fold_for_match(s: &str) -> String {
    let folded: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    folded.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_download_name() {
        assert_eq!(
            derive_track_identifier("Queen - Bohemian Rhapsody - 20240115_abcdef"),
            "Bohemian Rhapsody"
        );
    }

    #[test]
    fn test_short_suffix_is_kept() {
        // " - 2024" is too short to count as a date/id suffix
        assert_eq!(strip_trailing_suffix("Song - 2024"), "Song - 2024");
        assert_eq!(derive_track_identifier("Artist - Song - 2024"), "2024");
    }

    #[test]
    fn test_no_separator_uses_full_title() {
        assert_eq!(derive_track_identifier("Bohemian Rhapsody"), "Bohemian Rhapsody");
        assert_eq!(title_segment("Bohemian Rhapsody"), "Bohemian Rhapsody");
    }

    #[test]
    fn test_title_without_artist_is_searched_whole() {
        // Only the date suffix is stripped; the remaining title is the identifier
        assert_eq!(
            derive_track_identifier("Bohemian Rhapsody - 20240101abcdef"),
            "Bohemian Rhapsody"
        );
    }

    #[test]
    fn test_noise_removed() {
        assert_eq!(
            derive_track_identifier("Daft Punk - Around the World (Official Video) - 2023-04-01 abc"),
            "Around the World"
        );
        assert_eq!(strip_noise("Song  [Lyrics]  (HD)"), "Song");
        assert_eq!(strip_noise("Song (2011 Remaster)"), "Song");
        assert_eq!(strip_noise("Song Official Music Video"), "Song");
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(derive_track_identifier(""), "");
        assert_eq!(derive_track_identifier("   "), "");
        assert_eq!(derive_track_identifier("Artist - (Official Video) - 20240101xyz"), "");
    }

    #[test]
    fn test_deterministic() {
        let stem = "Muse - Uprising [Official Video] - 20200202_x1y2z3";
        assert_eq!(derive_track_identifier(stem), derive_track_identifier(stem));
    }

    #[test]
    fn test_multibyte_suffix_counts_chars() {
        // 9 two-byte chars after the separator: 12 chars, 21 bytes
        assert_eq!(strip_trailing_suffix("A - B - ééééééééé"), "A - B");
        assert_eq!(strip_trailing_suffix("A - B - éééé"), "A - B - éééé");
    }

    #[test]
    fn test_fold_for_match() {
        assert_eq!(fold_for_match("Björk"), "bjork");
        assert_eq!(fold_for_match("Motörhead"), "motorhead");
        assert_eq!(fold_for_match("BEYONCÉ"), "beyonce");
    }
}
