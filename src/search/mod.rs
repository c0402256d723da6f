//! Searching the aggregator for a volume or issue: query construction,
//! ranking, and automatic release selection.
//!
//! # Overview
//!
//! - [`manual_search`] - runs the query set, annotates every release with
//!   its match verdict, and ranks the results
//! - [`auto_search`] - picks releases automatically: one release for
//!   special-version volumes and single issues, a greedy non-overlapping
//!   cover of the open issues for normal volumes
//! - [`query_formats`] - the fixed query templates per search kind

use std::collections::HashSet;

use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::aggregator::{AggregatorError, Release};
use crate::context::Services;
use crate::fingerprint::{NumberSpan, SpecialVersion};
use crate::library::{IssueData, IssueYearIndex, LibraryError, VolumeData};
use crate::matching::{SearchMatch, check_search_result_match};

/// Search errors.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Aggregator(#[from] AggregatorError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What kind of search the query templates serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Volume,
    Issue,
    Tpb,
    VolumeAsIssue,
}

/// The fixed, ordered query templates per search kind.
#[must_use]
pub fn query_formats(kind: SearchKind) -> &'static [&'static str] {
    match kind {
        SearchKind::Tpb => &[
            "{title} Vol. {volume_number} ({year}) TPB",
            "{title} ({year}) TPB",
            "{title} Vol. {volume_number} TPB",
            "{title} Vol. {volume_number}",
            "{title}",
        ],
        SearchKind::VolumeAsIssue => &["{title} ({year})", "{title}"],
        SearchKind::Volume => &[
            "{title} Vol. {volume_number} ({year})",
            "{title} ({year})",
            "{title} Vol. {volume_number}",
            "{title}",
        ],
        SearchKind::Issue => &[
            "{title} #{issue_number} ({year})",
            "{title} Vol. {volume_number} #{issue_number}",
            "{title} #{issue_number}",
            "{title}",
        ],
    }
}

/// A release together with its match verdict.
#[derive(Debug, Clone)]
pub struct MatchedRelease {
    pub release: Release,
    pub verdict: SearchMatch,
    /// Which issues this release covers; filled in by auto search.
    pub covered_issues: Option<NumberSpan<f64>>,
}

fn render_query(
    template: &str,
    title: &str,
    volume_number: i32,
    year: Option<i32>,
    issue_number: Option<&str>,
) -> String {
    template
        .replace("{title}", title)
        .replace("{volume_number}", &volume_number.to_string())
        .replace(
            "{year}",
            &year.map(|y| y.to_string()).unwrap_or_default(),
        )
        .replace("{issue_number}", issue_number.unwrap_or_default())
        .trim()
        .to_string()
}

fn search_kind(volume: &VolumeData, issue_number: Option<&str>) -> SearchKind {
    match volume.special_version {
        Some(SpecialVersion::Tpb) => SearchKind::Tpb,
        Some(SpecialVersion::VolumeAsIssue) => SearchKind::VolumeAsIssue,
        _ if issue_number.is_none() => SearchKind::Volume,
        _ => SearchKind::Issue,
    }
}

/// The sort key of one result, ascending; lower ranks first.
fn rank_result(
    result: &MatchedRelease,
    search_title: &str,
    volume_number: i32,
    volume_year: Option<i32>,
    issue_year: Option<i32>,
    calculated_issue_number: Option<f64>,
) -> (u8, usize, i32, f64) {
    // Matches first.
    let not_match = u8::from(!result.verdict.matched);

    // Word-set distance: result title tokens absent from the query title.
    let query_words: HashSet<&str> = search_title.split(' ').collect();
    let word_distance = result
        .release
        .fingerprint
        .series
        .split(' ')
        .filter(|word| !query_words.contains(word))
        .count();

    // Volume/year fit.
    let fingerprint = &result.release.fingerprint;
    let mut vy_score = 3;
    if matches!(fingerprint.volume_number, Some(NumberSpan::Single(n)) if n == volume_number) {
        vy_score -= 1;
    }
    if let (Some(issue_year), Some(result_year)) = (issue_year, fingerprint.year) {
        if issue_year == result_year {
            vy_score -= 2;
        } else if let Some(volume_year) = volume_year {
            if volume_year - 1 <= result_year && result_year <= issue_year + 1 {
                vy_score -= 1;
            }
        }
    }

    // Issue-number fit.
    let issue_fit = match calculated_issue_number {
        Some(wanted) => match fingerprint.issue_number {
            Some(NumberSpan::Single(n)) if (n - wanted).abs() < 1e-9 => 0.0,
            Some(NumberSpan::Range(a, b)) if a <= wanted && wanted <= b => {
                1.0 - 1.0 / (b - a + 1.0)
            }
            Some(NumberSpan::Range(_, _)) => 3.0,
            _ if fingerprint.special_version.is_some() => 2.0,
            _ => 3.0,
        },
        None => match fingerprint.issue_number {
            Some(NumberSpan::Range(a, b)) => 1.0 / (b - a + 1.0),
            Some(NumberSpan::Single(_)) => 1.0,
            // No issue number at all ranks before any numbered release.
            None => f64::NEG_INFINITY,
        },
    };

    (not_match, word_distance, vy_score, issue_fit)
}

/// Runs a manual search for a volume or one of its issues. Results are
/// annotated with their match verdict and ranked best-first.
///
/// # Errors
///
/// Returns [`SearchError`] when the aggregator or a store fails.
#[instrument(skip(services))]
pub async fn manual_search(
    services: &Services,
    volume_id: i64,
    issue_id: Option<i64>,
) -> Result<Vec<MatchedRelease>, SearchError> {
    let volume = services.volumes.get_data(volume_id).await?;
    let issues = services.volumes.get_issues(volume_id).await?;
    let number_to_year = IssueYearIndex::from_issues(&issues);

    let issue = match issue_id {
        Some(id)
            if matches!(
                volume.special_version,
                None | Some(SpecialVersion::VolumeAsIssue)
            ) =>
        {
            Some(services.volumes.get_issue(id).await?)
        }
        _ => None,
    };
    let issue_number = issue.as_ref().map(|i| i.issue_number.clone());
    let calculated_issue_number = issue.as_ref().map(|i| i.calculated_issue_number);

    info!(
        title = %volume.title,
        year = ?volume.year,
        issue = ?issue_number,
        "starting manual search"
    );

    let titles: Vec<String> = [Some(volume.title.clone()), volume.alt_title.clone()]
        .into_iter()
        .flatten()
        .collect();

    for title in titles {
        let search_title = title.replace(':', "");
        let kind = search_kind(&volume, issue_number.as_deref());

        let queries: Vec<String> = query_formats(kind)
            .iter()
            .map(|format| {
                let format = if volume.year.is_none() {
                    format.replace("({year})", "")
                } else {
                    (*format).to_string()
                };
                render_query(
                    &format,
                    &search_title,
                    volume.volume_number,
                    volume.year,
                    issue_number.as_deref(),
                )
            })
            .collect();

        let mut releases: Vec<Release> = Vec::new();
        let mut seen_links: HashSet<String> = HashSet::new();
        for response in join_all(queries.iter().map(|q| services.aggregator.search(q))).await {
            // Several queries often surface the same article.
            for release in response? {
                if seen_links.insert(release.link.clone()) {
                    releases.push(release);
                }
            }
        }
        if releases.is_empty() {
            continue;
        }

        let mut results = Vec::with_capacity(releases.len());
        for release in releases {
            let blocklisted = services.blocklist.contains(&release.link).await?;
            let verdict = check_search_result_match(
                &release.fingerprint,
                blocklisted,
                &volume,
                &issues,
                &number_to_year,
                calculated_issue_number,
            );
            results.push(MatchedRelease {
                release,
                verdict,
                covered_issues: None,
            });
        }

        let issue_year = number_to_year.year_of(calculated_issue_number);
        results.sort_by(|a, b| {
            let ka = rank_result(
                a,
                &search_title,
                volume.volume_number,
                volume.year,
                issue_year,
                calculated_issue_number,
            );
            let kb = rank_result(
                b,
                &search_title,
                volume.volume_number,
                volume.year,
                issue_year,
                calculated_issue_number,
            );
            ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(results = results.len(), "manual search results");
        return Ok(results);
    }

    Ok(Vec::new())
}

/// Searches for a volume or issue and automatically chooses the releases
/// to download: the best match for special versions and single issues, a
/// greedy non-overlapping cover of the open issues otherwise. Issues the
/// volume search left uncovered get their own per-issue search.
///
/// # Errors
///
/// Returns [`SearchError`] when the aggregator or a store fails.
#[instrument(skip(services))]
pub async fn auto_search(
    services: &Services,
    volume_id: i64,
    issue_id: Option<i64>,
) -> Result<Vec<MatchedRelease>, SearchError> {
    auto_search_guarded(services, volume_id, issue_id, &mut HashSet::new()).await
}

async fn auto_search_guarded(
    services: &Services,
    volume_id: i64,
    issue_id: Option<i64>,
    visited_issues: &mut HashSet<i64>,
) -> Result<Vec<MatchedRelease>, SearchError> {
    let volume = services.volumes.get_data(volume_id).await?;
    if !volume.monitored {
        return Ok(Vec::new());
    }

    let searchable: Vec<IssueData> = match issue_id {
        None => services.volumes.get_open_issues(volume_id).await?,
        Some(id) => {
            let issue = services.volumes.get_issue(id).await?;
            let has_files = !services.files.files_for_issue(id).await?.is_empty();
            if issue.monitored && !has_files {
                vec![issue]
            } else {
                Vec::new()
            }
        }
    };
    if searchable.is_empty() {
        return Ok(Vec::new());
    }

    let results: Vec<MatchedRelease> = manual_search(services, volume_id, issue_id)
        .await?
        .into_iter()
        .filter(|r| r.verdict.matched)
        .collect();

    // A single "item": take the best match and stop.
    if issue_id.is_some()
        || matches!(
            volume.special_version,
            Some(SpecialVersion::Tpb | SpecialVersion::OneShot | SpecialVersion::HardCover)
        )
    {
        return Ok(results.into_iter().take(1).collect());
    }

    // Volume search: build a non-overlapping cover of the open issues.
    let searchable_numbers: Vec<f64> =
        searchable.iter().map(|i| i.calculated_issue_number).collect();
    let mut chosen: Vec<MatchedRelease> = Vec::new();

    for mut result in results {
        let fingerprint = &result.release.fingerprint;

        // What the release covers: its issue span, a volume-as-issue
        // volume number, or the whole volume for collected shapes.
        let (span, whole_volume): (NumberSpan<f64>, bool) =
            if let Some(span) = fingerprint.issue_number {
                (span, false)
            } else if volume.special_version == Some(SpecialVersion::VolumeAsIssue)
                && fingerprint.special_version == Some(SpecialVersion::Tpb)
            {
                match fingerprint.volume_number {
                    Some(volume_span) => (volume_span.into(), false),
                    None => continue,
                }
            } else if matches!(
                volume.special_version,
                Some(SpecialVersion::OneShot | SpecialVersion::HardCover | SpecialVersion::Tpb)
            ) && (fingerprint.special_version == volume.special_version
                || fingerprint.special_version == Some(SpecialVersion::Tpb))
            {
                (NumberSpan::Single(1.0), true)
            } else {
                continue;
            };

        let covered = if whole_volume {
            services.volumes.get_issues(volume_id).await?
        } else {
            let (start, end) = span.bounds();
            services
                .volumes
                .get_issues_in_range(volume_id, start, end)
                .await?
        };

        // Anything already on disk disqualifies the release.
        let all_open = covered.iter().all(|issue| {
            searchable_numbers
                .iter()
                .any(|n| (n - issue.calculated_issue_number).abs() < 1e-9)
        });
        if !all_open || covered.is_empty() {
            continue;
        }

        let overlapping = chosen.iter().any(|part| {
            part.covered_issues
                .is_some_and(|existing| existing.overlaps(&span))
        });
        if overlapping {
            continue;
        }

        result.covered_issues = Some(span);
        chosen.push(result);
    }

    // Issues the volume search did not cover might still surface on a
    // per-issue search.
    let missing: Vec<&IssueData> = searchable
        .iter()
        .filter(|issue| {
            !chosen.iter().any(|part| {
                part.covered_issues
                    .is_some_and(|span| span.contains(issue.calculated_issue_number))
            })
        })
        .collect();

    for issue in missing {
        if !visited_issues.insert(issue.id) {
            // Already tried this issue down another branch.
            continue;
        }
        let per_issue = Box::pin(auto_search_guarded(
            services,
            volume_id,
            Some(issue.id),
            visited_issues,
        ))
        .await?;
        chosen.extend(per_issue.into_iter().map(|mut r| {
            if r.covered_issues.is_none() {
                r.covered_issues = Some(NumberSpan::Single(issue.calculated_issue_number));
            }
            r
        }));
    }

    debug!(chosen = chosen.len(), "auto search results");
    Ok(chosen)
}
