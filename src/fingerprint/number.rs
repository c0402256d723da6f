//! Number grammar: converting issue/volume number strings to decimals.
//!
//! Issue numbers come in more shapes than plain integers: `5.5`, `1a` (letter
//! suffix), `½`/`¼` glyphs, negatives, and ranges like `1a-5b`. All of them
//! normalize to `f64` values so they can be ordered, joined and checked for
//! range membership.

use super::NumberSpan;

/// Roman numerals 1-10, lowercase.
const ROMAN_DIGITS: [(&str, i32); 10] = [
    ("i", 1),
    ("ii", 2),
    ("iii", 3),
    ("iv", 4),
    ("v", 5),
    ("vi", 6),
    ("vii", 7),
    ("viii", 8),
    ("ix", 9),
    ("x", 10),
];

/// Fixes common wire artifacts in strings coming from online sources:
/// percent-escapes, mis-encoded parentheses, unicode dashes and quotes,
/// surrounding whitespace.
#[must_use]
pub fn normalize_string(s: &str) -> String {
    urlencoding::decode(s)
        .map_or_else(|_| s.to_string(), |c| c.into_owned())
        .replace("_28", "(")
        .replace("_29", ")")
        .replace('–', "-")
        .replace('’', "'")
        .trim()
        .to_string()
}

/// Normalizes a user-entered number string: locale commas, unknown-number
/// placeholders, trailing dots, case.
#[must_use]
pub fn normalize_number(s: &str) -> String {
    s.replace(',', ".")
        .replace('?', "0")
        .trim_end_matches('.')
        .trim()
        .to_lowercase()
}

/// Converts one issue number from string to its decimal representation.
///
/// Letter suffixes map to two-digit fractions (`a` -> `.01`, .., `z` ->
/// `.26`), the half/quarter glyphs map to `.5`/`.3`, and a leading minus is
/// preserved.
#[must_use]
pub fn calc_float_issue_number(issue_number: &str) -> Option<f64> {
    if let Ok(n) = issue_number.parse::<f64>() {
        return Some(n);
    }

    let issue_number = normalize_number(issue_number);

    let mut converted = String::new();
    if issue_number.starts_with('-') {
        converted.push('-');
    }

    let mut dot = true;
    for c in issue_number.chars() {
        if c.is_ascii_digit() {
            converted.push(c);
        } else {
            if dot && c != '-' {
                converted.push('.');
                dot = false;
            }

            match c {
                '½' => converted.push('5'),
                '¼' => converted.push('3'),
                'a'..='z' => {
                    let index = (c as u8 - b'a') + 1;
                    converted.push_str(&format!("{index:02}"));
                }
                _ => {}
            }
        }
    }

    converted.parse().ok()
}

/// Converts an issue number or issue range string to calculated decimals.
///
/// `1a-5b` becomes `Range(1.01, 5.02)`. A dash that does not separate two
/// numbers (e.g. a negative single issue) is not treated as a range.
#[must_use]
pub fn process_issue_number(issue_number: &str) -> Option<NumberSpan<f64>> {
    let mut chars = issue_number.char_indices();
    let (_, first) = chars.next()?;
    let rest_start = first.len_utf8();
    let rest = &issue_number[rest_start..];

    if !rest.contains('-') {
        return calc_float_issue_number(issue_number).map(NumberSpan::Single);
    }

    let rest = rest.replace(' ', "");
    let (left, end) = rest.split_once('-')?;
    let start = format!("{first}{left}");

    let starts_numeric = |s: &str| {
        s.trim_start_matches('-')
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    };
    if !(starts_numeric(&start) && starts_numeric(end)) {
        // The split must have been false; not actually a range.
        return calc_float_issue_number(issue_number).map(NumberSpan::Single);
    }

    match (
        calc_float_issue_number(&start),
        calc_float_issue_number(end),
    ) {
        (Some(a), Some(b)) => Some(NumberSpan::Range(a, b)),
        (Some(a), None) => Some(NumberSpan::Single(a)),
        (None, Some(b)) => Some(NumberSpan::Single(b)),
        (None, None) => None,
    }
}

/// Converts a volume number or volume range to integers, accepting Roman
/// numerals 1-10.
#[must_use]
pub fn process_volume_number(volume_number: &str) -> Option<NumberSpan<i32>> {
    let lowered = volume_number.to_lowercase();
    let resolved = ROMAN_DIGITS
        .iter()
        .find(|(roman, _)| *roman == lowered)
        .map_or_else(|| volume_number.to_string(), |(_, n)| n.to_string());

    match process_issue_number(&resolved)? {
        NumberSpan::Single(n) => Some(NumberSpan::Single(n as i32)),
        NumberSpan::Range(a, b) => Some(NumberSpan::Range(a as i32, b as i32)),
    }
}

/// Fixes year numbers that are most likely a typo, like `2204` -> `2024` and
/// `1890` -> `1980`, by swapping the middle digits. Years that already fall
/// in `[1900, 2100)` are returned unchanged.
#[must_use]
pub fn fix_broken_year(year: i32) -> i32 {
    if (1900..2100).contains(&year) {
        return year;
    }

    let digits = year.to_string();
    let bytes = digits.as_bytes();
    if bytes.len() != 4 {
        return year;
    }

    let swapped = [bytes[0], bytes[2], bytes[1], bytes[3]];
    std::str::from_utf8(&swapped)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(year)
}

/// Gets the year out of a `YYYY-MM-DD` date string.
#[must_use]
pub fn extract_year_from_date(date: Option<&str>) -> Option<i32> {
    date?.split('-').next()?.parse().ok()
}
