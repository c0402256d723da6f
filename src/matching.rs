//! Matching predicates: file to volume, release to volume, group to volume.
//!
//! All comparisons here work on [`Fingerprint`]s against library data. Four
//! composed filters sit on top of the primitive predicates:
//!
//! - [`folder_extraction_filter`] - which files from a downloaded
//!   archive/folder are relevant (conservative)
//! - [`file_importing_filter`] - which files map to a volume during a scan
//! - [`group_filter`] - whether a parsed download group fits a volume
//! - [`check_search_result_match`] - whether a search result fits, with a
//!   reason when it does not

use std::sync::LazyLock;

use fancy_regex::Regex as FancyRegex;

use crate::fingerprint::{Fingerprint, NumberSpan, SpecialVersion, extract_year_from_date};
use crate::library::{IssueData, IssueYearIndex, VolumeData, approx_eq};

/// Punctuation and filler words ignored in title comparisons.
static CLEAN_TITLE: LazyLock<FancyRegex> = LazyLock::new(|| {
    FancyRegex::new(
        r#"((?<=annual)s|/|\-|–|\+|,|\.|\!|:|\bthe\s|\band\b|&|’|'|"|\bone-shot\b|\btpb\b)"#,
    )
    .unwrap_or_else(|e| panic!("invalid title cleanup pattern: {e}"))
});

fn clean_title(title: &str) -> String {
    CLEAN_TITLE
        .replace_all(&title.to_lowercase(), "")
        .replace(' ', "")
}

/// Whether two titles refer to the same series. With `allow_contains`, a
/// `check` title found anywhere inside the reference also counts.
#[must_use]
pub fn titles_match(reference: &str, check: &str, allow_contains: bool) -> bool {
    let reference = clean_title(reference);
    let check = clean_title(check);
    if allow_contains {
        reference.contains(&check)
    } else {
        reference == check
    }
}

/// Whether two years match with one year of wiggle room. `end_year` widens
/// the window to a range; `conservative` decides the verdict when either
/// year is unknown.
#[must_use]
pub fn years_match(
    reference_year: Option<i32>,
    check_year: Option<i32>,
    end_year: Option<i32>,
    conservative: bool,
) -> bool {
    let (Some(reference), Some(check)) = (reference_year, check_year) else {
        return conservative;
    };
    let end_border = end_year.unwrap_or(reference);
    reference - 1 <= check && check <= end_border + 1
}

/// Whether an extracted volume number fits the volume: the number itself, a
/// year mistaken for a volume number, or, for volume-as-issue volumes, an
/// existing issue number.
#[must_use]
pub fn volume_number_matches(
    volume: &VolumeData,
    issues: &[IssueData],
    check_number: Option<NumberSpan<i32>>,
    conservative: bool,
) -> bool {
    if volume.year.is_none() && volume.volume_number == 0 {
        return conservative;
    }
    let Some(check) = check_number else {
        return conservative;
    };

    if let NumberSpan::Single(n) = check {
        if n == volume.volume_number {
            return true;
        }
        if years_match(volume.year, Some(n), None, false) {
            return true;
        }
    }

    // The volume number may actually be the issue number of a
    // volume-as-issue volume.
    if volume.special_version != Some(SpecialVersion::VolumeAsIssue) {
        return false;
    }

    let numbers: Vec<f64> = match check {
        NumberSpan::Single(n) => vec![f64::from(n)],
        NumberSpan::Range(a, b) => vec![f64::from(a), f64::from(b)],
    };
    numbers.iter().all(|n| {
        issues
            .iter()
            .any(|i| approx_eq(i.calculated_issue_number, *n))
    })
}

/// Whether a file's special version is compatible with the volume's,
/// accounting for shapes a filename cannot express.
#[must_use]
pub fn special_versions_match(
    reference: Option<SpecialVersion>,
    check: Option<SpecialVersion>,
    issue_number: Option<NumberSpan<f64>>,
) -> bool {
    if check == reference
        || check == Some(SpecialVersion::Cover)
        || check == Some(SpecialVersion::Metadata)
    {
        return true;
    }

    if matches!(issue_number, Some(NumberSpan::Single(n)) if approx_eq(n, 1.0))
        && matches!(
            reference,
            Some(SpecialVersion::HardCover | SpecialVersion::OneShot)
        )
    {
        return true;
    }

    if reference == Some(SpecialVersion::VolumeAsIssue) && check.is_none() {
        return true;
    }

    // Shapes that usually go unmentioned in filenames extract as TPB.
    check == Some(SpecialVersion::Tpb)
        && matches!(
            reference,
            Some(
                SpecialVersion::HardCover
                    | SpecialVersion::OneShot
                    | SpecialVersion::VolumeAsIssue
            )
        )
}

/// Whether the volume is an annual run, judged from its title.
#[must_use]
pub fn volume_is_annual(volume: &VolumeData) -> bool {
    volume.title.to_lowercase().contains("annual")
}

/// Filter applied when extracting useful files out of a downloaded
/// archive/folder. Relatively conservative: files that name neither a year
/// nor a volume number are kept.
#[must_use]
pub fn folder_extraction_filter(
    fingerprint: &Fingerprint,
    volume: &VolumeData,
    issues: &[IssueData],
    end_year: Option<i32>,
) -> bool {
    let annual = volume_is_annual(volume);

    let matching_title = titles_match(&fingerprint.series, &volume.title, false);
    let matching_year = years_match(volume.year, fingerprint.year, end_year, false);
    let matching_volume_number =
        volume_number_matches(volume, issues, fingerprint.volume_number, false);
    let neither_found = fingerprint.year.is_none() && fingerprint.volume_number.is_none();

    matching_title
        && fingerprint.annual == annual
        && (matching_year || matching_volume_number || neither_found)
}

/// The issue span a fingerprint effectively covers for a volume, falling
/// back to the volume number for volume-as-issue volumes.
#[must_use]
pub fn effective_issue_number(
    fingerprint: &Fingerprint,
    volume: &VolumeData,
) -> Option<NumberSpan<f64>> {
    if fingerprint.issue_number.is_some() {
        return fingerprint.issue_number;
    }
    if volume.special_version == Some(SpecialVersion::VolumeAsIssue) {
        return fingerprint.volume_number.map(Into::into);
    }
    None
}

/// Filter for matching scanned files to a volume.
#[must_use]
pub fn file_importing_filter(
    fingerprint: &Fingerprint,
    volume: &VolumeData,
    issues: &[IssueData],
    number_to_year: &IssueYearIndex,
) -> bool {
    let issue_number = effective_issue_number(fingerprint, volume);

    let matching_special_version = special_versions_match(
        volume.special_version,
        fingerprint.special_version,
        fingerprint.issue_number,
    );
    let matching_volume_number =
        volume_number_matches(volume, issues, fingerprint.volume_number, false);
    let matching_year = years_match(
        volume.year,
        fingerprint.year,
        number_to_year.year_of(issue_number.map(|n| n.last())),
        false,
    );

    matching_special_version && (matching_volume_number || matching_year)
}

/// Filter for deciding whether an aggregator download group fits the volume.
#[must_use]
pub fn group_filter(
    fingerprint: &Fingerprint,
    volume: &VolumeData,
    last_issue_date: Option<&str>,
    issues: &[IssueData],
) -> bool {
    let last_year = extract_year_from_date(last_issue_date).or(volume.year);
    let annual = volume_is_annual(volume);

    let matching_title = titles_match(&volume.title, &fingerprint.series, false);
    let matching_volume_number =
        volume_number_matches(volume, issues, fingerprint.volume_number, true);
    let matching_year = years_match(volume.year, fingerprint.year, last_year, true);
    let matching_special_version = special_versions_match(
        volume.special_version,
        fingerprint.special_version,
        fingerprint.issue_number,
    );

    matching_title
        && fingerprint.annual == annual
        && matching_special_version
        && matching_volume_number
        && matching_year
}

/// The verdict on a single search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    /// Whether the result fits what was searched for.
    pub matched: bool,
    /// Why it does not, when it does not.
    pub reason: Option<&'static str>,
}

impl SearchMatch {
    fn rejected(reason: &'static str) -> Self {
        Self {
            matched: false,
            reason: Some(reason),
        }
    }

    fn accepted() -> Self {
        Self {
            matched: true,
            reason: None,
        }
    }
}

/// Decides whether a search result fits the volume (and issue, when the
/// search was for one). The caller supplies the blocklist verdict for the
/// result's link.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn check_search_result_match(
    fingerprint: &Fingerprint,
    link_blocklisted: bool,
    volume: &VolumeData,
    issues: &[IssueData],
    number_to_year: &IssueYearIndex,
    calculated_issue_number: Option<f64>,
) -> SearchMatch {
    let annual = volume_is_annual(volume);

    if link_blocklisted {
        return SearchMatch::rejected("Link is blocklisted");
    }

    if fingerprint.annual != annual {
        return SearchMatch::rejected("Annual conflict");
    }

    let title_fits = titles_match(&volume.title, &fingerprint.series, false)
        || volume
            .alt_title
            .as_deref()
            .is_some_and(|alt| titles_match(alt, &fingerprint.series, false));
    if !title_fits {
        return SearchMatch::rejected("Titles don't match");
    }

    if !volume_number_matches(volume, issues, fingerprint.volume_number, true) {
        return SearchMatch::rejected("Volume numbers don't match");
    }

    if !special_versions_match(
        volume.special_version,
        fingerprint.special_version,
        fingerprint.issue_number,
    ) {
        return SearchMatch::rejected("Special version conflict");
    }

    let issue_number = effective_issue_number(fingerprint, volume);

    if matches!(
        volume.special_version,
        None | Some(SpecialVersion::VolumeAsIssue)
    ) {
        match calculated_issue_number {
            None => {
                // Volume search: every covered issue number must exist.
                let covered_exists = issue_number.is_some_and(|span| {
                    let (a, b) = span.bounds();
                    number_to_year.contains(a) && number_to_year.contains(b)
                });
                if !covered_exists {
                    return SearchMatch::rejected("Issue numbers don't match");
                }
            }
            Some(wanted) => {
                // Issue search: only an exact single-number match is useful.
                let exact = matches!(
                    issue_number,
                    Some(NumberSpan::Single(n)) if approx_eq(n, wanted)
                );
                if !exact {
                    return SearchMatch::rejected("Issue numbers don't match");
                }
            }
        }
    }

    if !years_match(
        volume.year,
        fingerprint.year,
        number_to_year.year_of(issue_number.map(|n| n.last())),
        true,
    ) {
        return SearchMatch::rejected("Year doesn't match");
    }

    SearchMatch::accepted()
}
