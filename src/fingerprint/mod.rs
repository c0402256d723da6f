//! Extracting structured comic data from filenames, folder names and
//! release titles.
//!
//! The extractor distills a free-form string (a filepath, a bare filename or
//! an aggregator release title) into a [`Fingerprint`]: series name, year,
//! volume number, issue number (or range), special-version tag and annual
//! flag. Everything downstream (matching, importing, renaming, search
//! ranking) works on fingerprints instead of raw strings.
//!
//! # Overview
//!
//! - [`Fingerprint`] - The extracted value object
//! - [`NumberSpan`] - Single value or inclusive range (volume/issue numbers)
//! - [`SpecialVersion`] - TPB, one-shot, hard-cover, volume-as-issue, ...
//! - [`extract_filename_data`] - The extraction entry point
//! - [`process_issue_number`] / [`process_volume_number`] - Number grammar

mod extractor;
mod number;
mod patterns;

pub use extractor::{ExtractOptions, extract_filename_data};
pub use number::{
    calc_float_issue_number, extract_year_from_date, fix_broken_year, normalize_number,
    normalize_string, process_issue_number, process_volume_number,
};

use std::fmt;

use serde::{Deserialize, Serialize};

/// File extensions of image files, lowercase without dot.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpeg", "jpg", "webp", "gif"];

/// File extensions of archive/container files, lowercase without dot.
pub const CONTAINER_EXTENSIONS: [&str; 11] = [
    "cbz", "zip", "rar", "cbr", "tar.gz", "7zip", "7z", "cb7", "cbt", "epub", "pdf",
];

/// Archive extensions that are candidates for extraction.
pub const EXTRACTABLE_EXTENSIONS: [&str; 2] = ["zip", "rar"];

/// File extensions of metadata files, lowercase without dot.
pub const METADATA_EXTENSIONS: [&str; 2] = ["xml", "json"];

/// Filenames (lowercase) that are recognized as pure metadata files.
pub const METADATA_FILES: [&str; 3] = ["cvinfo.xml", "comicinfo.xml", "series.json"];

/// Returns the lowercase extension of `name` without the dot, handling the
/// double extension `.tar.gz`.
#[must_use]
pub fn file_extension(name: &str) -> Option<String> {
    let lower = name.to_lowercase();
    if lower.ends_with(".tar.gz") {
        return Some("tar.gz".to_string());
    }
    let base = lower.rsplit('/').next().unwrap_or(&lower);
    let dot = base.rfind('.')?;
    if dot == 0 || dot + 1 == base.len() {
        return None;
    }
    Some(base[dot + 1..].to_string())
}

/// Returns true if the filename has an image extension.
#[must_use]
pub fn is_image_file(name: &str) -> bool {
    file_extension(name).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// Returns true if the filename has a media (image or container) extension.
#[must_use]
pub fn is_content_file(name: &str) -> bool {
    file_extension(name).is_some_and(|e| {
        IMAGE_EXTENSIONS.contains(&e.as_str()) || CONTAINER_EXTENSIONS.contains(&e.as_str())
    })
}

/// Returns true if the filename has an extension the library scanner cares
/// about (media or metadata).
#[must_use]
pub fn is_scannable_file(name: &str) -> bool {
    file_extension(name).is_some_and(|e| {
        IMAGE_EXTENSIONS.contains(&e.as_str())
            || CONTAINER_EXTENSIONS.contains(&e.as_str())
            || METADATA_EXTENSIONS.contains(&e.as_str())
    })
}

/// A single number or an inclusive range of numbers.
///
/// Volume and issue numbers extracted from filenames can be either a single
/// value (`#5`) or a range (`#11-25`). Ranges are kept ordered as extracted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NumberSpan<T> {
    /// A single number.
    Single(T),
    /// An inclusive range.
    Range(T, T),
}

impl<T: Copy> NumberSpan<T> {
    /// The first (or only) number.
    pub fn first(&self) -> T {
        match self {
            Self::Single(n) | Self::Range(n, _) => *n,
        }
    }

    /// The last (or only) number.
    pub fn last(&self) -> T {
        match self {
            Self::Single(n) | Self::Range(_, n) => *n,
        }
    }

    /// Both borders; a single value is its own range.
    pub fn bounds(&self) -> (T, T) {
        match self {
            Self::Single(n) => (*n, *n),
            Self::Range(a, b) => (*a, *b),
        }
    }
}

impl NumberSpan<f64> {
    /// Whether two issue spans share any issue number.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let (a1, a2) = self.bounds();
        let (b1, b2) = other.bounds();
        a1 <= b2 && b1 <= a2
    }

    /// Whether `n` falls inside the span.
    #[must_use]
    pub fn contains(&self, n: f64) -> bool {
        let (a, b) = self.bounds();
        a <= n && n <= b
    }

    /// The number of issues the span covers, counting a single issue as one.
    #[must_use]
    pub fn width(&self) -> f64 {
        let (a, b) = self.bounds();
        if (b - a).abs() < f64::EPSILON {
            1.0
        } else {
            b - a
        }
    }
}

impl From<NumberSpan<i32>> for NumberSpan<f64> {
    fn from(value: NumberSpan<i32>) -> Self {
        match value {
            NumberSpan::Single(n) => NumberSpan::Single(f64::from(n)),
            NumberSpan::Range(a, b) => NumberSpan::Range(f64::from(a), f64::from(b)),
        }
    }
}

impl<T: fmt::Display> fmt::Display for NumberSpan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(n) => write!(f, "{n}"),
            Self::Range(a, b) => write!(f, "{a}-{b}"),
        }
    }
}

/// A volume shape other than plain numbered issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecialVersion {
    /// Trade paperback: the whole volume collected in one book.
    Tpb,
    /// A volume consisting of a single issue.
    OneShot,
    /// Hard-cover collected edition.
    HardCover,
    /// Volume where each issue is named `Volume N`.
    VolumeAsIssue,
    /// Image file that is the cover of an issue or volume. Overrules the
    /// other special versions.
    Cover,
    /// Metadata file (comicinfo.xml and friends).
    Metadata,
}

impl SpecialVersion {
    /// Stable string form used in the database and summaries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tpb => "tpb",
            Self::OneShot => "one-shot",
            Self::HardCover => "hard-cover",
            Self::VolumeAsIssue => "volume-as-issue",
            Self::Cover => "cover",
            Self::Metadata => "metadata",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "tpb" => Some(Self::Tpb),
            "one-shot" => Some(Self::OneShot),
            "hard-cover" => Some(Self::HardCover),
            "volume-as-issue" => Some(Self::VolumeAsIssue),
            "cover" => Some(Self::Cover),
            "metadata" => Some(Self::Metadata),
            _ => None,
        }
    }
}

impl fmt::Display for SpecialVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured data extracted from a filename or release title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Series name, normalized (separators collapsed, numbering stripped).
    pub series: String,
    /// Publication year, if one was recognized.
    pub year: Option<i32>,
    /// Volume number or range.
    pub volume_number: Option<NumberSpan<i32>>,
    /// Special-version tag, absent for a plain numbered issue.
    pub special_version: Option<SpecialVersion>,
    /// Issue number or range, as calculated decimals.
    pub issue_number: Option<NumberSpan<f64>>,
    /// Whether the file belongs to the annual run of the series.
    pub annual: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_span_bounds() {
        assert_eq!(NumberSpan::Single(5.0).bounds(), (5.0, 5.0));
        assert_eq!(NumberSpan::Range(1.0, 9.0).bounds(), (1.0, 9.0));
    }

    #[test]
    fn test_number_span_overlap() {
        let a = NumberSpan::Range(1.0, 5.0);
        let b = NumberSpan::Range(5.0, 9.0);
        let c = NumberSpan::Single(7.0);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn test_number_span_display() {
        assert_eq!(NumberSpan::Single(3).to_string(), "3");
        assert_eq!(NumberSpan::Range(11, 25).to_string(), "11-25");
    }

    #[test]
    fn test_special_version_round_trip() {
        for sv in [
            SpecialVersion::Tpb,
            SpecialVersion::OneShot,
            SpecialVersion::HardCover,
            SpecialVersion::VolumeAsIssue,
            SpecialVersion::Cover,
            SpecialVersion::Metadata,
        ] {
            assert_eq!(SpecialVersion::from_str_opt(sv.as_str()), Some(sv));
        }
        assert_eq!(SpecialVersion::from_str_opt("bogus"), None);
    }

    #[test]
    fn test_file_extension_handles_tar_gz() {
        assert_eq!(file_extension("a/b/c.tar.gz").as_deref(), Some("tar.gz"));
        assert_eq!(file_extension("a/b/c.CBZ").as_deref(), Some("cbz"));
        assert_eq!(file_extension("noext"), None);
    }

    #[test]
    fn test_scannable_extension_sets() {
        assert!(is_image_file("page01.JPG"));
        assert!(is_content_file("Series Vol. 2.cbz"));
        assert!(is_scannable_file("comicinfo.xml"));
        assert!(!is_scannable_file("notes.txt"));
    }
}
