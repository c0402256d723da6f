//! Turning an aggregator link into a concrete, downloadable target.
//!
//! Each download source needs its own purification: following redirects,
//! scraping interstitial pages, calling service APIs, or converting
//! `.torrent` payloads into magnet URIs. The result is a [`ResolvedLink`]
//! naming the pure link and the client type that can transfer it.
//!
//! Resolution failures surface as [`DownloadError::LinkBroken`] with the
//! reason to blocklist, or pass through transport errors untouched.

mod mediafire;
mod pixeldrain;
mod torrent;
mod wetransfer;

pub use pixeldrain::pixeldrain_key_usable;

use tracing::{debug, instrument};

use crate::blocklist::BlocklistReason;
use crate::download::{DownloadError, DownloadKind, FetchSpec};
use crate::source::DownloadSource;

/// A link resolved to something a download client can act on.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedLink {
    /// A plain HTTP payload, streamed by the direct client.
    Stream {
        pure_link: String,
        kind: DownloadKind,
        fetch: FetchSpec,
    },
    /// A Mega file or folder; the Mega client does its own protocol work.
    Mega { kind: DownloadKind },
    /// A magnet URI or NZB link for an external client.
    External {
        pure_link: String,
        kind: DownloadKind,
    },
}

impl ResolvedLink {
    /// The pure link the resolution produced.
    #[must_use]
    pub fn pure_link<'a>(&'a self, original: &'a str) -> &'a str {
        match self {
            Self::Stream { pure_link, .. } | Self::External { pure_link, .. } => pure_link,
            Self::Mega { .. } => original,
        }
    }

    /// The client type for the link.
    #[must_use]
    pub fn kind(&self) -> DownloadKind {
        match self {
            Self::Stream { kind, .. } | Self::External { kind, .. } | Self::Mega { kind } => *kind,
        }
    }
}

/// Resolves a `(source, url)` pair from an aggregator article into a
/// concrete download target.
///
/// # Errors
///
/// Returns [`DownloadError::LinkBroken`] with `SourceNotSupported` for
/// non-HTTP links and `LinkBroken` for dead ones; service/API failures map
/// the same way.
#[instrument(skip(client))]
pub async fn resolve(
    client: &reqwest::Client,
    source: DownloadSource,
    link: &str,
) -> Result<ResolvedLink, DownloadError> {
    debug!(link, "purifying link");

    if source == DownloadSource::Torrent && link.starts_with("magnet:?") {
        return Ok(ResolvedLink::External {
            pure_link: link.to_string(),
            kind: DownloadKind::Torrent,
        });
    }
    if source == DownloadSource::Usenet {
        return Ok(ResolvedLink::External {
            pure_link: link.to_string(),
            kind: DownloadKind::Usenet,
        });
    }

    if !link.starts_with("http") {
        return Err(DownloadError::link_broken(
            BlocklistReason::SourceNotSupported,
        ));
    }

    let response = client
        .get(link)
        .send()
        .await
        .map_err(|_| DownloadError::link_broken(BlocklistReason::LinkBroken))?;
    if !response.status().is_success() {
        return Err(DownloadError::link_broken(BlocklistReason::LinkBroken));
    }
    let url = response.url().to_string();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    match source {
        DownloadSource::Mega => {
            let kind = if url.contains("#F!") || url.contains("/folder/") {
                DownloadKind::MegaFolder
            } else {
                DownloadKind::Mega
            };
            Ok(ResolvedLink::Mega { kind })
        }

        DownloadSource::MediaFire => mediafire::resolve(response).await,

        DownloadSource::WeTransfer => wetransfer::resolve(client, &url).await,

        DownloadSource::PixelDrain => Ok(pixeldrain::resolve(&url)),

        DownloadSource::Torrent => {
            if content_type == "application/x-bittorrent" {
                torrent::resolve(response).await
            } else {
                Err(DownloadError::link_broken(
                    BlocklistReason::SourceNotSupported,
                ))
            }
        }

        // Aggregator-hosted mirrors resolve to themselves.
        DownloadSource::Direct | DownloadSource::Usenet => Ok(ResolvedLink::Stream {
            pure_link: url.clone(),
            kind: DownloadKind::Direct,
            fetch: FetchSpec::Get { url },
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_magnet_links_pass_through() {
        let client = reqwest::Client::new();
        let resolved = resolve(
            &client,
            DownloadSource::Torrent,
            "magnet:?xt=urn:btih:abc",
        )
        .await
        .unwrap();
        assert_eq!(
            resolved,
            ResolvedLink::External {
                pure_link: "magnet:?xt=urn:btih:abc".to_string(),
                kind: DownloadKind::Torrent,
            }
        );
    }

    #[tokio::test]
    async fn test_non_http_link_is_not_supported() {
        let client = reqwest::Client::new();
        let result = resolve(&client, DownloadSource::Direct, "ftp://host/file").await;
        assert!(matches!(
            result,
            Err(DownloadError::LinkBroken {
                reason: BlocklistReason::SourceNotSupported
            })
        ));
    }

    #[tokio::test]
    async fn test_dead_link_is_broken() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let result = resolve(
            &client,
            DownloadSource::Direct,
            &format!("{}/dead", server.uri()),
        )
        .await;
        assert!(matches!(
            result,
            Err(DownloadError::LinkBroken {
                reason: BlocklistReason::LinkBroken
            })
        ));
    }

    #[tokio::test]
    async fn test_direct_link_resolves_to_final_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.cbz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/file.cbz", server.uri());
        let resolved = resolve(&client, DownloadSource::Direct, &url).await.unwrap();
        assert_eq!(resolved.kind(), DownloadKind::Direct);
        assert_eq!(resolved.pure_link(&url), url);
    }

    #[tokio::test]
    async fn test_mega_folder_detection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/folder/abc", server.uri());
        let resolved = resolve(&client, DownloadSource::Mega, &url).await.unwrap();
        assert_eq!(resolved.kind(), DownloadKind::MegaFolder);
    }
}
