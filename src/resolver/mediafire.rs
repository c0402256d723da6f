//! MediaFire link purification: interstitial page scraping and folder
//! handling.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use super::ResolvedLink;
use crate::blocklist::BlocklistReason;
use crate::download::{DownloadError, DownloadKind, FetchSpec};

/// A link straight to MediaFire's download servers.
static DIRECT_DOWNLOAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://download\d+\.mediafire\.com/")
        .unwrap_or_else(|e| panic!("invalid MediaFire pattern: {e}"))
});

/// The inline redirect some download pages carry.
static LOCATION_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)window.location.href\s?=\s?'(https://download\d+\.mediafire\.com/[^']*)'")
        .unwrap_or_else(|e| panic!("invalid MediaFire pattern: {e}"))
});

/// Resolves a fetched MediaFire response (redirects already followed).
///
/// # Errors
///
/// Returns [`DownloadError::LinkBroken`] for error pages and pages without
/// a recognizable download button.
pub(super) async fn resolve(response: reqwest::Response) -> Result<ResolvedLink, DownloadError> {
    let url = response.url().to_string();

    if url.contains("error.php") {
        return Err(DownloadError::link_broken(BlocklistReason::LinkBroken));
    }

    if url.contains("/folder/") {
        let folder_key = url
            .split("/folder/")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default()
            .to_string();
        if folder_key.is_empty() {
            return Err(DownloadError::link_broken(BlocklistReason::LinkBroken));
        }
        return Ok(ResolvedLink::Stream {
            pure_link: folder_key.clone(),
            kind: DownloadKind::MediaFireFolder,
            fetch: FetchSpec::MediaFireFolder { folder_key },
        });
    }

    if DIRECT_DOWNLOAD.is_match(&url) {
        // The page link already was the payload link.
        return Ok(ResolvedLink::Stream {
            pure_link: url.clone(),
            kind: DownloadKind::Direct,
            fetch: FetchSpec::Get { url },
        });
    }

    let body = response
        .text()
        .await
        .map_err(|_| DownloadError::link_broken(BlocklistReason::LinkBroken))?;

    if let Some(caps) = LOCATION_SCRIPT.captures(&body) {
        let direct = caps[1].to_string();
        return Ok(ResolvedLink::Stream {
            pure_link: direct.clone(),
            kind: DownloadKind::Direct,
            fetch: FetchSpec::Get { url: direct },
        });
    }

    let document = Html::parse_document(&body);
    let selector = Selector::parse("a#downloadButton")
        .map_err(|_| DownloadError::link_broken(BlocklistReason::LinkBroken))?;
    if let Some(href) = document
        .select(&selector)
        .next()
        .and_then(|a| a.value().attr("href"))
    {
        let href = href.to_string();
        return Ok(ResolvedLink::Stream {
            pure_link: href.clone(),
            kind: DownloadKind::MediaFire,
            fetch: FetchSpec::Get { url: href },
        });
    }

    // Not broken and not a folder, but no download button either.
    Err(DownloadError::link_broken(BlocklistReason::LinkBroken))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn fetch(server: &MockServer, route: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("{}{route}", server.uri()))
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_download_button_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><a id="downloadButton" href="https://download123.mediafire.com/x/file.cbz">Download</a></body></html>"#,
            ))
            .mount(&server)
            .await;

        let resolved = resolve(fetch(&server, "/file/abc").await).await.unwrap();
        assert_eq!(resolved.kind(), DownloadKind::MediaFire);
        assert_eq!(
            resolved.pure_link(""),
            "https://download123.mediafire.com/x/file.cbz"
        );
    }

    #[tokio::test]
    async fn test_location_script_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r"<script>window.location.href = 'https://download42.mediafire.com/y/file.cbz'</script>",
            ))
            .mount(&server)
            .await;

        let resolved = resolve(fetch(&server, "/file/xyz").await).await.unwrap();
        assert_eq!(resolved.kind(), DownloadKind::Direct);
    }

    #[tokio::test]
    async fn test_error_page_is_broken() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let result = resolve(fetch(&server, "/error.php?origin=download").await).await;
        assert!(matches!(
            result,
            Err(DownloadError::LinkBroken {
                reason: BlocklistReason::LinkBroken
            })
        ));
    }

    #[tokio::test]
    async fn test_folder_link_uses_zip_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let resolved = resolve(fetch(&server, "/folder/fkey123/name").await)
            .await
            .unwrap();
        assert_eq!(resolved.kind(), DownloadKind::MediaFireFolder);
        assert_eq!(
            resolved,
            ResolvedLink::Stream {
                pure_link: "fkey123".to_string(),
                kind: DownloadKind::MediaFireFolder,
                fetch: FetchSpec::MediaFireFolder {
                    folder_key: "fkey123".to_string()
                },
            }
        );
    }

    #[tokio::test]
    async fn test_page_without_button_is_broken() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>nope</body></html>"))
            .mount(&server)
            .await;

        let result = resolve(fetch(&server, "/file/abc").await).await;
        assert!(result.is_err());
    }
}
