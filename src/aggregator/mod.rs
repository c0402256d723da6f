//! Client for the release-aggregator site: search pages and article pages.
//!
//! # Overview
//!
//! - [`AggregatorClient`] - fetches and parses search results and articles,
//!   with transparent retries and challenge-solver support
//! - [`Release`] - one search result, fingerprinted for matching
//! - [`DownloadGroup`] - one set of equivalent links on an article page,
//!   filtered against the blocklist and ordered by service preference
//! - [`ChallengeSolver`] - pluggable Cloudflare-challenge service
//!
//! Search pagination fetches page 1, reads the page count (capped), and
//! fans out over the remaining pages: concurrently when a challenge solver
//! is available, sequentially otherwise.

mod challenge;
mod page;
mod paths;

pub use challenge::{ChallengeSolver, DEFAULT_USER_AGENT};
pub use page::{ArticleStub, RawGroup};
pub use paths::create_link_paths;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::blocklist::Blocklist;
use crate::download::{
    DownloadError, FailureType, RetryDecision, RetryPolicy, classify_error,
};
use crate::fingerprint::{ExtractOptions, Fingerprint, extract_filename_data};
use crate::settings::Settings;
use crate::source::DownloadSource;

/// Hard cap on search-result pages fetched per query.
const MAX_SEARCH_PAGES: usize = 10;

/// Why an article page could not be turned into downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFailure {
    /// The page itself could not be fetched or parsed.
    Broken,
    /// Links were found, but none of them worked.
    NoWorkingLinks,
    /// Links were found, but services refused due to transfer limits.
    LimitReached,
    /// Nothing on the page matches the volume.
    NoMatches,
}

/// Aggregator client errors.
#[derive(Error, Debug)]
pub enum AggregatorError {
    /// The page failed; the reason decides blocklisting.
    #[error("aggregator page failed: {reason:?}")]
    Page {
        /// Why the page failed.
        reason: PageFailure,
    },

    /// Database access (blocklist lookups) failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One search result from the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    /// Fingerprint extracted from the display title.
    pub fingerprint: Fingerprint,
    /// Link to the article page.
    pub link: String,
    /// The title as shown on the site.
    pub display_title: String,
    /// Source tag (the aggregator's host).
    pub source: String,
}

/// A download group from an article, filtered and preference-ordered.
#[derive(Debug, Clone)]
pub struct DownloadGroup {
    pub web_sub_title: String,
    pub fingerprint: Fingerprint,
    /// Ordered by the user's service preference.
    pub links: Vec<(DownloadSource, Vec<String>)>,
}

/// A fully parsed article page.
#[derive(Debug, Clone)]
pub struct ArticlePage {
    pub link: String,
    pub title: Option<String>,
    pub groups: Vec<DownloadGroup>,
}

/// Client for the aggregator site.
#[derive(Debug, Clone)]
pub struct AggregatorClient {
    http: reqwest::Client,
    base_url: String,
    solver: Arc<ChallengeSolver>,
    retry_policy: RetryPolicy,
}

impl AggregatorClient {
    /// Creates a client for the aggregator at `base_url`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, solver: Arc<ChallengeSolver>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            solver,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// The host name used as the source tag on releases.
    #[must_use]
    pub fn source_tag(&self) -> String {
        Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "aggregator".to_string())
    }

    async fn get_once(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, DownloadError> {
        let (user_agent, cookies) = self.solver.ua_cookies(url);
        let mut request = self.http.get(url).query(query).header("User-Agent", user_agent);
        if !cookies.is_empty() {
            let cookie_header = cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header("Cookie", cookie_header);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        if ChallengeSolver::is_challenge(response.headers()) {
            // One solve-and-retry per request.
            if self.solver.solve(url).await {
                let (user_agent, cookies) = self.solver.ua_cookies(url);
                let mut retry = self.http.get(url).query(query).header("User-Agent", user_agent);
                if !cookies.is_empty() {
                    let cookie_header = cookies
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join("; ");
                    retry = retry.header("Cookie", cookie_header);
                }
                return retry
                    .send()
                    .await
                    .map_err(|e| DownloadError::network(url, e));
            }
        }

        Ok(response)
    }

    /// Fetches a page as text, retrying transient failures and honoring
    /// `Retry-After`.
    async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, AggregatorError> {
        let mut attempt = 1u32;
        loop {
            let result = self.get_once(url, query).await;
            let error = match result {
                Ok(response) if response.status().is_success() => {
                    return response.text().await.map_err(|_| AggregatorError::Page {
                        reason: PageFailure::Broken,
                    });
                }
                Ok(response) => {
                    let retry_after = parse_retry_after(response.headers());
                    let error =
                        DownloadError::http_status(url, response.status().as_u16());
                    if let (Some(delay), FailureType::RateLimited | FailureType::Transient) =
                        (retry_after, classify_error(&error))
                    {
                        if attempt < self.retry_policy.max_attempts() {
                            debug!(url, delay_ms = delay.as_millis(), "honoring Retry-After");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                    }
                    error
                }
                Err(error) => error,
            };

            match self
                .retry_policy
                .should_retry(classify_error(&error), attempt)
            {
                RetryDecision::Retry { delay, attempt: next } => {
                    debug!(url, attempt, error = %error, "retrying aggregator request");
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(url, error = %error, reason, "aggregator request failed");
                    return Err(AggregatorError::Page {
                        reason: PageFailure::Broken,
                    });
                }
            }
        }
    }

    /// Runs one search query, following pagination.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Page`] with `Broken` when the site cannot
    /// be reached.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> Result<Vec<Release>, AggregatorError> {
        let first_page = self.get_text(&self.base_url, &[("s", query)]).await?;
        let max_page = page::parse_max_page(&first_page).min(MAX_SEARCH_PAGES);

        let mut pages = vec![first_page];
        let page_urls: Vec<String> = (2..=max_page)
            .map(|n| format!("{}/page/{n}", self.base_url))
            .collect();

        if self.solver.is_enabled() {
            // Full speed: the solver absorbs the challenge pressure.
            let query_params: Vec<[(&str, &str); 1]> =
                page_urls.iter().map(|_| [("s", query)]).collect();
            let fetches = page_urls
                .iter()
                .zip(query_params.iter())
                .map(|(url, params)| self.get_text(url, params));
            for result in join_all(fetches).await {
                pages.push(result?);
            }
        } else {
            for url in &page_urls {
                pages.push(self.get_text(url, &[("s", query)]).await?);
            }
        }

        let source = self.source_tag();
        let releases: Vec<Release> = pages
            .iter()
            .flat_map(|html| page::parse_search_results(html))
            .map(|stub| Release {
                fingerprint: extract_filename_data(&stub.title, ExtractOptions::release()),
                link: stub.link,
                display_title: stub.title,
                source: source.clone(),
            })
            .collect();

        info!(query, results = releases.len(), "aggregator search done");
        Ok(releases)
    }

    /// Fetches and parses an article page, filtering its links against the
    /// blocklist and client availability, and ordering them by service
    /// preference.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::Page`] with `Broken` when the article is
    /// unreachable, and [`AggregatorError::Database`] on blocklist
    /// failures.
    #[instrument(skip(self, settings, blocklist))]
    pub async fn fetch_article(
        &self,
        link: &str,
        settings: &Settings,
        blocklist: &Blocklist,
        torrent_available: bool,
        usenet_available: bool,
    ) -> Result<ArticlePage, AggregatorError> {
        let html = self.get_text(link, &[]).await?;
        let title = page::parse_article_title(&html);
        let raw_groups = page::parse_article_groups(&html);

        let mut groups = Vec::with_capacity(raw_groups.len());
        for raw in raw_groups {
            let mut links: Vec<(DownloadSource, Vec<String>)> = Vec::new();
            for (source, candidates) in raw.links {
                if source == DownloadSource::Torrent && !torrent_available {
                    continue;
                }
                if source == DownloadSource::Usenet && !usenet_available {
                    continue;
                }

                let mut kept = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    if blocklist.contains(&candidate).await? {
                        debug!(link = %candidate, "skipping blocklisted link");
                        continue;
                    }
                    kept.push(candidate);
                }
                if !kept.is_empty() {
                    links.push((source, kept));
                }
            }

            if links.is_empty() {
                continue;
            }
            links.sort_by_key(|(source, _)| settings.service_rank(*source));
            groups.push(DownloadGroup {
                web_sub_title: raw.web_sub_title,
                fingerprint: raw.fingerprint,
                links,
            });
        }

        Ok(ArticlePage {
            link: link.to_string(),
            title,
            groups,
        })
    }
}

/// Parses a `Retry-After` header: either delay seconds or an HTTP date.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = httpdate::parse_http_date(value).ok()?;
    date.duration_since(std::time::SystemTime::now()).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn search_page_body(titles: &[&str], server_uri: &str) -> String {
        let articles: String = titles
            .iter()
            .map(|t| {
                format!(
                    r#"<article class="post"><a href="{server_uri}/{slug}"><h1 class="post-title">{t}</h1></a></article>"#,
                    slug = t.replace(' ', "-"),
                )
            })
            .collect();
        format!("<html><body>{articles}</body></html>")
    }

    #[tokio::test]
    async fn test_search_single_page() {
        let server = MockServer::start().await;
        let body = search_page_body(&["Spawn #1 (1992)", "Spawn TPB (1992)"], &server.uri());
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("s", "Spawn"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = AggregatorClient::new(
            reqwest::Client::new(),
            server.uri(),
            Arc::new(ChallengeSolver::new()),
        );
        let releases = client.search("Spawn").await.unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].fingerprint.series, "Spawn");
        assert_eq!(releases[0].fingerprint.year, Some(1992));
    }

    #[tokio::test]
    async fn test_search_retries_transient_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        let body = search_page_body(&["Spawn #1 (1992)"], &server.uri());
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = AggregatorClient::new(
            reqwest::Client::new(),
            server.uri(),
            Arc::new(ChallengeSolver::new()),
        );
        let releases = client.search("Spawn").await.unwrap();
        assert_eq!(releases.len(), 1);
    }

    #[tokio::test]
    async fn test_search_gives_up_on_permanent_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = AggregatorClient::new(
            reqwest::Client::new(),
            server.uri(),
            Arc::new(ChallengeSolver::new()),
        );
        let result = client.search("Spawn").await;
        assert!(matches!(
            result,
            Err(AggregatorError::Page {
                reason: PageFailure::Broken
            })
        ));
    }

    #[tokio::test]
    async fn test_fetch_article_filters_and_orders() {
        let server = MockServer::start().await;
        let article = r#"
            <html><body><h1>Spawn #1-25 (1992)</h1>
            <section class="post-contents">
                <p>Spawn #1-25<br>Language : English</p>
                <div class="aio-button-center"><a href="https://host/direct">Main Download</a></div>
                <div class="aio-button-center"><a href="https://mega.nz/file/a#k">Mega</a></div>
                <div class="aio-button-center"><a href="magnet:?xt=urn:btih:feed">Torrent</a></div>
                <div class="aio-button-center"><a href="https://host/blocked">Mirror Server</a></div>
                <hr>
            </section></body></html>
        "#;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article))
            .mount(&server)
            .await;

        let db = Database::new_in_memory().await.unwrap();
        let blocklist = Blocklist::new(db);
        blocklist
            .add(
                crate::blocklist::NewBlocklistEntry {
                    download_link: Some("https://host/blocked".to_string()),
                    ..Default::default()
                },
                crate::blocklist::BlocklistReason::LinkBroken,
            )
            .await
            .unwrap();

        let client = AggregatorClient::new(
            reqwest::Client::new(),
            server.uri(),
            Arc::new(ChallengeSolver::new()),
        );
        let page = client
            .fetch_article(
                &format!("{}/article", server.uri()),
                &Settings::default(),
                &blocklist,
                false,
                false,
            )
            .await
            .unwrap();

        assert_eq!(page.groups.len(), 1);
        let group = &page.groups[0];
        // Mega ranks before the aggregator's own mirrors in the default
        // preference; the torrent link is dropped without a client, and the
        // blocklisted mirror is gone.
        assert_eq!(group.links[0].0, DownloadSource::Mega);
        assert_eq!(group.links[1].0, DownloadSource::Direct);
        assert_eq!(group.links[1].1, vec!["https://host/direct".to_string()]);
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
    }
}
