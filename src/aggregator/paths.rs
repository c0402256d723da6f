//! Building non-overlapping "link paths" out of an article's download
//! groups.
//!
//! One article often carries several ways to get the same content: a
//! full-TPB group, an extras group and per-issue-range groups. A link path
//! is an ordered choice of groups that together cover the requested content
//! without overlap; later paths are fallbacks for when the first path's
//! links turn out dead.

use crate::fingerprint::{NumberSpan, SpecialVersion};
use crate::library::{IssueData, VolumeData};
use crate::matching::group_filter;

use super::DownloadGroup;

/// Builds the candidate link paths for a volume from the article's groups.
///
/// With `force_match`, filtering is skipped and every group lands in one
/// path. Otherwise groups must pass the group filter; special-version
/// groups form their own path, plain issue groups pack greedily into the
/// first path they don't overlap.
#[must_use]
pub fn create_link_paths(
    groups: Vec<DownloadGroup>,
    volume: &VolumeData,
    last_issue_date: Option<&str>,
    issues: &[IssueData],
    force_match: bool,
) -> Vec<Vec<DownloadGroup>> {
    let mut link_paths: Vec<Vec<DownloadGroup>> = Vec::new();
    if force_match {
        link_paths.push(Vec::new());
    }

    for mut group in groups {
        if !force_match && !group_filter(&group.fingerprint, volume, last_issue_date, issues) {
            continue;
        }

        // A volume-as-issue volume reads "Volume N" groups as issues.
        if volume.special_version == Some(SpecialVersion::VolumeAsIssue)
            && (group.fingerprint.special_version == Some(SpecialVersion::Tpb)
                || matches!(group.fingerprint.volume_number, Some(NumberSpan::Range(_, _))))
        {
            group.fingerprint.issue_number = group.fingerprint.volume_number.map(Into::into);
            group.fingerprint.volume_number = Some(NumberSpan::Single(volume.volume_number));
            group.fingerprint.special_version = Some(SpecialVersion::VolumeAsIssue);
        }

        // Hard-cover and one-shot volumes claim generic special versions.
        if group.fingerprint.special_version.is_some()
            && group.fingerprint.special_version != Some(SpecialVersion::VolumeAsIssue)
            && matches!(
                volume.special_version,
                Some(SpecialVersion::HardCover | SpecialVersion::OneShot)
            )
        {
            group.fingerprint.special_version = volume.special_version;
        }

        if force_match {
            link_paths[0].push(group);
            continue;
        }

        if group.fingerprint.special_version.is_some()
            && group.fingerprint.special_version != Some(SpecialVersion::VolumeAsIssue)
        {
            link_paths.push(vec![group]);
            continue;
        }

        // Find a path of plain issue groups this one doesn't overlap.
        let mut placed = false;
        for path in &mut link_paths {
            let conflict = path.iter().any(|entry| {
                !matches!(
                    entry.fingerprint.special_version,
                    None | Some(SpecialVersion::VolumeAsIssue)
                ) || overlaps(
                    entry.fingerprint.issue_number,
                    group.fingerprint.issue_number,
                )
            });
            if !conflict {
                path.push(group.clone());
                placed = true;
                break;
            }
        }
        if !placed {
            link_paths.push(vec![group]);
        }
    }

    link_paths.sort_by(|a, b| {
        path_rating(a)
            .partial_cmp(&path_rating(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    link_paths
}

fn overlaps(a: Option<NumberSpan<f64>>, b: Option<NumberSpan<f64>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.overlaps(&b),
        _ => false,
    }
}

/// Rating for path ordering: special-version paths first, then larger issue
/// coverage, then fewer downloads.
fn path_rating(path: &[DownloadGroup]) -> (f64, usize) {
    if path
        .first()
        .is_some_and(|g| g.fingerprint.special_version.is_some())
    {
        return (0.0, 0);
    }

    let issues_covered: f64 = path
        .iter()
        .filter_map(|g| g.fingerprint.issue_number)
        .map(|span| span.width())
        .sum();
    if issues_covered <= 0.0 {
        return (f64::INFINITY, path.len());
    }
    (1.0 / issues_covered, path.len())
}
