//! Turning an aggregator article into concrete downloads.
//!
//! The article's download groups are packed into link paths; paths are
//! tested in order, purifying each group's links until one works. Broken
//! links get blocklisted along the way; a path only counts when at least
//! one of its groups produced a working download.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::error::QueueError;
use crate::aggregator::{AggregatorError, DownloadGroup, PageFailure, create_link_paths};
use crate::blocklist::{BlocklistReason, NewBlocklistEntry};
use crate::context::Services;
use crate::download::{
    DirectDownload, Download, DownloadError, DownloadKind, DownloadMeta, ExternalClientKind,
    ExternalDownload, FetchSpec, MegaDownload,
};
use crate::credentials::CredentialSource;
use crate::fingerprint::NumberSpan;
use crate::library::{LibraryError, VolumeData};
use crate::naming::generate_issue_name;
use crate::resolver::{ResolvedLink, pixeldrain_key_usable, resolve};
use crate::settings::Settings;
use crate::source::DownloadSource;

/// Creates the downloads for an article, for a volume (and optionally one
/// issue).
///
/// # Errors
///
/// Returns [`QueueError::Aggregator`] with the page-failure reason when the
/// article yields nothing: `NoMatches` when no group fits the volume,
/// `LimitReached` when only transfer quotas stood in the way, and
/// `NoWorkingLinks` otherwise.
#[instrument(skip(services), fields(link = %web_link))]
pub async fn downloads_from_article(
    services: &Services,
    web_link: &str,
    volume_id: i64,
    issue_id: Option<i64>,
    force_match: bool,
) -> Result<Vec<Arc<dyn Download>>, QueueError> {
    let settings = services.settings.get();
    let torrent_available = services
        .external_clients
        .any_of_kind(ExternalClientKind::Torrent)
        .await?;
    let usenet_available = services
        .external_clients
        .any_of_kind(ExternalClientKind::Usenet)
        .await?;

    let page = services
        .aggregator
        .fetch_article(
            web_link,
            &settings,
            &services.blocklist,
            torrent_available,
            usenet_available,
        )
        .await?;

    let volume = services.volumes.get_data(volume_id).await?;
    let issues = services.volumes.get_issues(volume_id).await?;
    let last_issue_date = services.volumes.get_last_issue_date(volume_id).await?;

    let link_paths = create_link_paths(
        page.groups,
        &volume,
        last_issue_date.as_deref(),
        &issues,
        force_match,
    );
    if link_paths.is_empty() {
        return Err(QueueError::Aggregator(AggregatorError::Page {
            reason: PageFailure::NoMatches,
        }));
    }

    let mut limit_reached = false;
    for path in link_paths {
        let mut downloads: Vec<Arc<dyn Download>> = Vec::new();
        for group in &path {
            let outcome = purify_group(
                services,
                &settings,
                &volume,
                group,
                web_link,
                page.title.as_deref(),
                issue_id,
                force_match,
            )
            .await?;
            limit_reached |= outcome.limit_reached;
            if let Some(download) = outcome.download {
                downloads.push(download);
            }
        }
        if !downloads.is_empty() {
            return Ok(downloads);
        }
    }

    Err(QueueError::Aggregator(AggregatorError::Page {
        reason: if limit_reached {
            PageFailure::LimitReached
        } else {
            PageFailure::NoWorkingLinks
        },
    }))
}

struct GroupOutcome {
    download: Option<Arc<dyn Download>>,
    limit_reached: bool,
}

/// Tries a group's links in preference order until one produces a working
/// download.
#[allow(clippy::too_many_arguments)]
async fn purify_group(
    services: &Services,
    settings: &Settings,
    volume: &VolumeData,
    group: &DownloadGroup,
    web_link: &str,
    web_title: Option<&str>,
    issue_id: Option<i64>,
    force_match: bool,
) -> Result<GroupOutcome, QueueError> {
    let covered = group.fingerprint.issue_number;

    // Resolve the issue the group covers; a group naming issues the volume
    // doesn't have is not usable (unless forced).
    let download_issue_id = match (issue_id, covered) {
        (Some(id), _) => Some(id),
        (None, Some(NumberSpan::Single(number))) => {
            match services.volumes.issue_by_calc_number(volume.id, number).await {
                Ok(issue) => Some(issue.id),
                Err(LibraryError::IssueNotFound(_)) if !force_match => {
                    debug!(number, "group covers an unknown issue");
                    return Ok(GroupOutcome {
                        download: None,
                        limit_reached: false,
                    });
                }
                Err(LibraryError::IssueNotFound(_)) => None,
                Err(e) => return Err(e.into()),
            }
        }
        _ => None,
    };

    let preferred_body = if settings.rename_downloaded_files && !force_match {
        let covered_issues = match covered {
            Some(span) => {
                let (start, end) = span.bounds();
                services
                    .volumes
                    .get_issues_in_range(volume.id, start, end)
                    .await?
            }
            None => Vec::new(),
        };
        Some(generate_issue_name(volume, covered, &covered_issues, settings)?)
    } else {
        None
    };

    let mut limit_reached = false;
    for (source, links) in &group.links {
        for link in links {
            match build_download(
                services,
                settings,
                volume,
                *source,
                link,
                Some(web_link),
                web_title,
                Some(&group.web_sub_title),
                download_issue_id,
                covered,
                preferred_body.clone(),
            )
            .await
            {
                Ok(download) => {
                    return Ok(GroupOutcome {
                        download: Some(download),
                        limit_reached,
                    });
                }
                Err(DownloadError::LinkBroken { reason }) => {
                    services
                        .blocklist
                        .add(
                            NewBlocklistEntry {
                                volume_id: Some(volume.id),
                                issue_id: download_issue_id,
                                web_link: Some(web_link.to_string()),
                                web_title: web_title.map(str::to_string),
                                web_sub_title: Some(group.web_sub_title.clone()),
                                download_link: Some(link.clone()),
                                source: Some(*source),
                            },
                            reason,
                        )
                        .await
                        .map_err(QueueError::Database)?;
                }
                Err(DownloadError::LimitReached { source }) => {
                    debug!(%source, "service transfer limit reached");
                    limit_reached = true;
                }
                Err(e) => {
                    warn!(link, error = %e, "link did not work");
                }
            }
        }
    }

    Ok(GroupOutcome {
        download: None,
        limit_reached,
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn build_download(
    services: &Services,
    settings: &Settings,
    volume: &VolumeData,
    source: DownloadSource,
    link: &str,
    web_link: Option<&str>,
    web_title: Option<&str>,
    web_sub_title: Option<&str>,
    issue_id: Option<i64>,
    covered: Option<NumberSpan<f64>>,
    preferred_body: Option<String>,
) -> Result<Arc<dyn Download>, DownloadError> {
    let resolved = resolve(&services.http, source, link).await?;

    let meta = DownloadMeta {
        volume_id: volume.id,
        issue_id,
        covered_issues: covered,
        source,
        source_name: source.as_str().to_string(),
        web_link: web_link.map(str::to_string),
        web_title: web_title.map(str::to_string),
        web_sub_title: web_sub_title.map(str::to_string),
        download_link: link.to_string(),
        pure_link: resolved.pure_link(link).to_string(),
        filename_body: String::new(),
        title: String::new(),
        download_folder: std::path::PathBuf::from(&settings.download_folder),
    };

    match resolved {
        ResolvedLink::Stream {
            kind, mut fetch, ..
        } => {
            // Pixeldrain transfers authenticate when a usable key exists.
            if let FetchSpec::PixelDrain { api_key, .. } = &mut fetch {
                *api_key = usable_pixeldrain_key(services).await;
            }
            let download =
                DirectDownload::create(services.http.clone(), kind, fetch, meta, preferred_body)
                    .await?;
            Ok(Arc::new(download))
        }

        ResolvedLink::Mega { kind } => {
            let credentials = services
                .credentials
                .get_from_source(CredentialSource::Mega)
                .await
                .unwrap_or_default();
            let download = MegaDownload::create(
                services.http.clone(),
                kind,
                meta,
                &credentials,
                &services.mega_sessions,
                preferred_body,
            )
            .await
            .map_err(|e| match e {
                // A dead Mega node means a dead link.
                DownloadError::ClientNotWorking { .. } => {
                    DownloadError::link_broken(BlocklistReason::LinkBroken)
                }
                other => other,
            })?;
            Ok(Arc::new(download))
        }

        ResolvedLink::External { pure_link, kind } => {
            let client_kind = if kind == DownloadKind::Torrent {
                ExternalClientKind::Torrent
            } else {
                ExternalClientKind::Usenet
            };
            let client = services.external_clients.connect_for(client_kind).await?;

            let payload_name = magnet_display_name(&pure_link)
                .or_else(|| preferred_body.clone())
                .unwrap_or_else(|| "payload".to_string());
            let body = preferred_body.unwrap_or_else(|| payload_name.clone());
            let title = body.rsplit('/').next().unwrap_or(&body).to_string();

            let meta = DownloadMeta {
                pure_link,
                filename_body: body,
                title,
                ..meta
            };
            Ok(Arc::new(ExternalDownload::new(
                client,
                kind,
                meta,
                &payload_name,
            )))
        }
    }
}

/// Rebuilds a download from its persisted queue row by re-resolving the
/// original link. Used at startup.
///
/// # Errors
///
/// Returns [`QueueError::Download`] when the link no longer resolves, so
/// the caller can run the failed chain for the row.
pub(crate) async fn download_from_row(
    services: &Services,
    row: &super::item::QueueRow,
) -> Result<Arc<dyn Download>, QueueError> {
    let settings = services.settings.get();
    let source = DownloadSource::from_str_opt(&row.source_kind).ok_or_else(|| {
        QueueError::Download(DownloadError::link_broken(
            BlocklistReason::SourceNotSupported,
        ))
    })?;
    let volume = services.volumes.get_data(row.volume_id).await?;
    let covered = row.covered_issues();

    let preferred_body = if settings.rename_downloaded_files {
        let covered_issues = match covered {
            Some(span) => {
                let (start, end) = span.bounds();
                services
                    .volumes
                    .get_issues_in_range(volume.id, start, end)
                    .await?
            }
            None => Vec::new(),
        };
        Some(generate_issue_name(&volume, covered, &covered_issues, &settings)?)
    } else {
        None
    };

    let download = build_download(
        services,
        &settings,
        &volume,
        source,
        &row.download_link,
        row.web_link.as_deref(),
        row.web_title.as_deref(),
        row.web_sub_title.as_deref(),
        row.issue_id,
        covered,
        preferred_body,
    )
    .await?;
    Ok(download)
}

/// The first configured Pixeldrain key that authenticates.
async fn usable_pixeldrain_key(services: &Services) -> Option<String> {
    let credentials = services
        .credentials
        .get_from_source(CredentialSource::PixelDrain)
        .await
        .ok()?;
    for credential in credentials {
        let Some(key) = credential.api_key else {
            continue;
        };
        if pixeldrain_key_usable(&services.http, &key)
            .await
            .unwrap_or(false)
        {
            return Some(key);
        }
    }
    None
}

/// The display name (`dn`) of a magnet link.
fn magnet_display_name(link: &str) -> Option<String> {
    let dn = link.split("dn=").nth(1)?.split('&').next()?;
    let dn_spaced = dn.replace('+', " ");
    let decoded = urlencoding::decode(&dn_spaced).ok()?;
    Some(decoded.into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_magnet_display_name() {
        assert_eq!(
            magnet_display_name("magnet:?xt=urn:btih:x&dn=My+Comic%21&tr=u"),
            Some("My Comic!".to_string())
        );
        assert_eq!(magnet_display_name("magnet:?xt=urn:btih:x"), None);
    }
}
