//! The compiled pattern bank for filename extraction.
//!
//! Patterns that need look-around (issue/volume/cover detection) use
//! `fancy_regex`; plain patterns use `regex`. Everything is compiled once at
//! first use. The ordered application of the issue patterns is semantic:
//! earlier patterns are more trustworthy and win outright.

use std::sync::LazyLock;

use fancy_regex::Regex as FancyRegex;
use regex::Regex;

/// Issue number grammar: decimal, integer with up to three trailing
/// letters/digits, half/quarter glyphs; excludes ordinals and sizes.
const ISSUE_NUMBER: &str = r"(?!\d+(?:th|rd|st|\s?(?:gb|mb)))(?<!')(?:\d+(?:\.\d{1,2}|\.?[a-z0-9]{1,3}|[\s\-\._]?[½¼])?|[½¼])";

/// Volume marker grammar: `v`/`vol`/`volume` with separator, digits or a
/// short Roman numeral, optionally a range.
const VOLUME_NUMBER: &str =
    r"\b(?:v(?:ol|olume)?)(?:\.\s|[\.\-\s])?(\d+(?:\s?\-\s?\d+)?|(?<!v)I{1,3})";

/// Year grammar covering the recognized forms: `YYYY`, `YYYY-MM(-DD)`,
/// `MM-YYYY`, `YYYY Edition` and the degenerate `YYYY-YYYY   YYYY`.
const YEAR_NUMBER: &str = r"(?:(\d{4})(?:-\d{2}){0,2}|(\d{4})[\s\.]?[\-\s](?:[\s\.]?\d{4})?|(?:\d{2}-){1,2}(\d{4})|(\d{4})[\s\.\-_]Edition|(\d{4})\-\d{4}\s{3}\d{4})";

fn fancy(pattern: &str) -> FancyRegex {
    FancyRegex::new(pattern)
        .unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

fn plain(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

/// Bracketed runs to blank out before series/volume extraction.
pub(crate) static STRIP_BRACKETS: LazyLock<Regex> =
    LazyLock::new(|| plain(r"\(.*?\)|\[.*?\]|\{.*?\}"));

pub(crate) static RUSSIAN_VOLUME: LazyLock<Regex> =
    LazyLock::new(|| plain(r"(?i)Томa?[\s\.]?(\d+)"));
pub(crate) static RUSSIAN_VOLUME_REVERSED: LazyLock<Regex> =
    LazyLock::new(|| plain(r"(?i)(\d+)[\s\.]?Томa?"));
pub(crate) static CHINESE_VOLUME: LazyLock<Regex> = LazyLock::new(|| plain(r"第(\d+)(?:卷|册)"));
pub(crate) static CHINESE_VOLUME_REVERSED: LazyLock<Regex> =
    LazyLock::new(|| plain(r"(?:卷|册)(\d+)"));
pub(crate) static KOREAN_VOLUME: LazyLock<Regex> = LazyLock::new(|| plain(r"제?(\d+)권"));
pub(crate) static JAPANESE_VOLUME: LazyLock<Regex> = LazyLock::new(|| plain(r"(\d+)巻"));

/// TPB / one-shot / hard-cover tokens, as word or parenthesized.
pub(crate) static SPECIAL_VERSION: LazyLock<FancyRegex> = LazyLock::new(|| {
    fancy(
        r"(?i)(?:(?<!\s{3})\b|\()(?:(?P<tpb>tpb|trade paper back)|(?P<one_shot>os|one[ \-_]?shot)|(?P<hard_cover>hc|hard[ \-_]?cover))(?:\b|\))",
    )
});

pub(crate) static VOLUME: LazyLock<FancyRegex> =
    LazyLock::new(|| fancy(&format!("(?i){VOLUME_NUMBER}")));

/// Volume marker in a folder name; a folder that is nothing but digits also
/// counts as a volume number.
pub(crate) static VOLUME_FOLDER: LazyLock<FancyRegex> =
    LazyLock::new(|| fancy(&format!(r"(?i){VOLUME_NUMBER}|^(\d+)$")));

pub(crate) static ISSUE_1: LazyLock<FancyRegex> =
    LazyLock::new(|| fancy(&format!(r"(?i)\(_(\-?{ISSUE_NUMBER})\)")));

pub(crate) static ISSUE_2: LazyLock<FancyRegex> = LazyLock::new(|| {
    fancy(&format!(
        r"(?i)(?<!\()(?:(?<![a-z])c(?!2c)|\bissues?|\bbooks?|no)(?:[\s\-\._]?|\s\-\s)(?:#\s*)?(\-?{ISSUE_NUMBER}(?:[\s\.]?\-[\s\.]?\-?{ISSUE_NUMBER})?)\b(?!\))"
    ))
});

pub(crate) static ISSUE_3: LazyLock<FancyRegex> = LazyLock::new(|| {
    fancy(&format!(
        r"(?i)(?<!part[\s\._])({ISSUE_NUMBER})[\s\-\._]?\(?[\s\-\._]?of[\s\-\._]?{ISSUE_NUMBER}\)?"
    ))
});

pub(crate) static ISSUE_4: LazyLock<FancyRegex> = LazyLock::new(|| {
    fancy(&format!(
        r"(?i)(?<!--)(?<!annual\s)(?:#\s*)?(\-?{ISSUE_NUMBER}[\s\.]?-[\s\.]?{ISSUE_NUMBER})(?=\s|\.|_|(?=\()|$)"
    ))
});

pub(crate) static ISSUE_5: LazyLock<FancyRegex> = LazyLock::new(|| {
    fancy(&format!(
        r"(?i)#\s*(\-?{ISSUE_NUMBER})\b(?![\s\.]?\-[\s\.]?{ISSUE_NUMBER})"
    ))
});

// The bare-number pattern has three shapes that are tried as one unit: a
// number at the very start followed by ` -`, the `n<issue>c<page>` encoding,
// and a separator-delimited bare number.
pub(crate) static ISSUE_6_START: LazyLock<FancyRegex> = LazyLock::new(|| {
    fancy(&format!(
        r"(?i)^(\-?{ISSUE_NUMBER})(?=\s\-(?=\s|\.|_|(?=\()|$))"
    ))
});

pub(crate) static ISSUE_6_PAGED: LazyLock<FancyRegex> = LazyLock::new(|| {
    fancy(&format!(
        r"(?i)(?<=(?<!part)[\s\._])n(\-?{ISSUE_NUMBER})(?=c\d+(?=\s|\.|_|(?=\()|$))"
    ))
});

pub(crate) static ISSUE_6_BARE: LazyLock<FancyRegex> = LazyLock::new(|| {
    fancy(&format!(
        r"(?i)(?<=(?<!part)[\s\._])(\-?{ISSUE_NUMBER})(?=\s|\.|_|(?=\()|$)"
    ))
});

/// Last resort: the fully-cleaned filename is nothing but an issue number.
pub(crate) static ISSUE_7: LazyLock<FancyRegex> =
    LazyLock::new(|| fancy(&format!(r"(?i)^(\-?{ISSUE_NUMBER})$")));

pub(crate) static YEAR: LazyLock<Regex> = LazyLock::new(|| {
    plain(&format!(
        r"(?i)\((?:[a-z]+\.?\s)?{Y}\)|--{Y}--|__{Y}__|, {Y}\s{{3}}|\b(?:(?:\d{{2}}-){{1,2}}(\d{{4}})|(\d{{4}})(?:-\d{{2}}){{1,2}})\b",
        Y = YEAR_NUMBER
    ))
});

/// Leading numbering, doubled spaces and trailing separators in a series
/// name.
pub(crate) static SERIES_CLEANUP: LazyLock<FancyRegex> =
    LazyLock::new(|| fancy(r"(^(\d+\.)?\s+|^\d+\s{3}|\s(?=\s)|[\s,]+$)"));

/// Matching means the string is NOT an annual: either a "plus annuals"
/// qualifier or no annual token at all.
pub(crate) static NOT_ANNUAL: LazyLock<FancyRegex> = LazyLock::new(|| {
    fancy(
        r"(?i)(?:\+|plus)[\s\._]?annuals?|annuals?[\s\._]?(?:\+|plus)|^((?!annuals?).)*$",
    )
});

/// Cover markers: the word `cover` (not negated), `n<digits>c<digits>` and
/// `(i)fc` encodings.
pub(crate) static COVER: LazyLock<FancyRegex> = LazyLock::new(|| {
    fancy(
        r"(?i)\b(?<!no[ \-_])(?<!hard[ \-_])(?<!\d[ \-_]covers)cover\b|n\d+c(\d+)|(?:\b|\d)i?fc\b",
    )
});

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compile() {
        // Forces every lazy pattern; a bad translation fails here, not deep
        // inside extraction.
        let _ = &*STRIP_BRACKETS;
        let _ = &*RUSSIAN_VOLUME;
        let _ = &*RUSSIAN_VOLUME_REVERSED;
        let _ = &*CHINESE_VOLUME;
        let _ = &*CHINESE_VOLUME_REVERSED;
        let _ = &*KOREAN_VOLUME;
        let _ = &*JAPANESE_VOLUME;
        let _ = &*SPECIAL_VERSION;
        let _ = &*VOLUME;
        let _ = &*VOLUME_FOLDER;
        let _ = &*ISSUE_1;
        let _ = &*ISSUE_2;
        let _ = &*ISSUE_3;
        let _ = &*ISSUE_4;
        let _ = &*ISSUE_5;
        let _ = &*ISSUE_6_START;
        let _ = &*ISSUE_6_PAGED;
        let _ = &*ISSUE_6_BARE;
        let _ = &*ISSUE_7;
        let _ = &*YEAR;
        let _ = &*SERIES_CLEANUP;
        let _ = &*NOT_ANNUAL;
        let _ = &*COVER;
    }

    #[test]
    fn test_volume_pattern_accepts_roman_and_ranges() {
        let caps = VOLUME.captures("Series Vol. III (1994)").unwrap().unwrap();
        assert_eq!(caps.get(1).map(|m| m.as_str()), Some("III"));

        let caps = VOLUME.captures("Series v2-3").unwrap().unwrap();
        assert_eq!(caps.get(1).map(|m| m.as_str()), Some("2-3"));
    }

    #[test]
    fn test_year_pattern_forms() {
        for s in [
            "(1994)",
            "(June 2022)",
            "--2004--",
            "(06-2016)",
            "2016-04-30",
            "(1994 Edition)",
        ] {
            assert!(YEAR.is_match(s), "no year found in {s:?}");
        }
    }

    #[test]
    fn test_cover_pattern_negations() {
        assert!(COVER.is_match("Amazing Cover Art").unwrap());
        assert!(!COVER.is_match("no cover included").unwrap());
        assert!(!COVER.is_match("hard cover").unwrap());
        assert!(COVER.is_match("n12c34").unwrap());
    }

    #[test]
    fn test_annual_pattern_detects_plus_annual() {
        // A match means "not an annual".
        assert!(NOT_ANNUAL.is_match("Series + Annuals").unwrap());
        assert!(NOT_ANNUAL.is_match("Plain Series").unwrap());
        assert!(!NOT_ANNUAL.is_match("Series Annual 1998").unwrap());
    }
}
