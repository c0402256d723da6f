//! Pluggable challenge-solver service for Cloudflare-style blocks.
//!
//! When the aggregator answers with a `cf-mitigated: challenge` header, the
//! request is routed through a FlareSolverr-compatible service which returns
//! a user agent and cookie jar for that URL. The mappings are read-mostly
//! and only updated on a challenge hit.

use std::collections::HashMap;
use std::sync::RwLock;

use dashmap::DashMap;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

/// Response header marking a challenge page.
pub const CHALLENGE_HEADER: (&str, &str) = ("cf-mitigated", "challenge");

/// User agent used when no solved session exists for a URL.
pub const DEFAULT_USER_AGENT: &str = "Longbox";

const API_BASE: &str = "/v1";

/// Client for the optional challenge-solver service.
#[derive(Debug, Default)]
pub struct ChallengeSolver {
    http: reqwest::Client,
    base_url: RwLock<Option<String>>,
    session_id: RwLock<Option<String>>,
    ua_mapping: DashMap<String, String>,
    cookie_mapping: DashMap<String, HashMap<String, String>>,
}

impl ChallengeSolver {
    /// Creates a disabled solver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a solver service is configured and has a session.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.session_id
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    /// Starts a solver session at `base_url`. Returns whether it worked.
    #[instrument(skip(self))]
    pub async fn enable(&self, base_url: &str) -> bool {
        let result: Result<Value, reqwest::Error> = async {
            self.http
                .post(format!("{base_url}{API_BASE}"))
                .json(&json!({"cmd": "sessions.create"}))
                .send()
                .await?
                .json()
                .await
        }
        .await;

        match result {
            Ok(body) => {
                let Some(session) = body.get("session").and_then(Value::as_str) else {
                    return false;
                };
                *self
                    .session_id
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) =
                    Some(session.to_string());
                *self
                    .base_url
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) =
                    Some(base_url.to_string());
                true
            }
            Err(e) => {
                warn!(error = %e, "could not reach challenge solver");
                false
            }
        }
    }

    /// Destroys the solver session.
    #[instrument(skip(self))]
    pub async fn disable(&self) {
        let (base_url, session_id) = {
            let base = self
                .base_url
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            let session = self
                .session_id
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            (base, session)
        };
        let (Some(base_url), Some(session_id)) = (base_url, session_id) else {
            return;
        };

        let _ = self
            .http
            .post(format!("{base_url}{API_BASE}"))
            .json(&json!({"cmd": "sessions.destroy", "session": session_id}))
            .send()
            .await;

        *self
            .base_url
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        *self
            .session_id
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    /// The user agent and cookies to use for a URL.
    #[must_use]
    pub fn ua_cookies(&self, url: &str) -> (String, HashMap<String, String>) {
        let ua = self
            .ua_mapping
            .get(url)
            .map_or_else(|| DEFAULT_USER_AGENT.to_string(), |v| v.value().clone());
        let cookies = self
            .cookie_mapping
            .get(url)
            .map(|v| v.value().clone())
            .unwrap_or_default();
        (ua, cookies)
    }

    /// Whether the response headers mark a challenge page.
    #[must_use]
    pub fn is_challenge(headers: &reqwest::header::HeaderMap) -> bool {
        headers
            .get(CHALLENGE_HEADER.0)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == CHALLENGE_HEADER.1)
    }

    /// Solves the challenge for `url`, storing the returned user agent and
    /// cookies. Returns whether a solution was obtained.
    #[instrument(skip(self))]
    pub async fn solve(&self, url: &str) -> bool {
        let (base_url, session_id) = {
            let base = self
                .base_url
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            let session = self
                .session_id
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            (base, session)
        };
        let (Some(base_url), Some(session_id)) = (base_url, session_id) else {
            return false;
        };

        let result: Result<Value, reqwest::Error> = async {
            self.http
                .post(format!("{base_url}{API_BASE}"))
                .json(&json!({
                    "cmd": "request.get",
                    "session": session_id,
                    "returnOnlyCookies": true,
                    "url": url,
                }))
                .send()
                .await?
                .json()
                .await
        }
        .await;

        let Ok(body) = result else {
            return false;
        };
        let Some(solution) = body.get("solution") else {
            return false;
        };

        if let Some(ua) = solution.get("userAgent").and_then(Value::as_str) {
            self.ua_mapping.insert(url.to_string(), ua.to_string());
        }
        let cookies: HashMap<String, String> = solution
            .get("cookies")
            .and_then(Value::as_array)
            .map(|cookies| {
                cookies
                    .iter()
                    .filter_map(|c| {
                        Some((
                            c.get("name")?.as_str()?.to_string(),
                            c.get("value")?.as_str()?.to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.cookie_mapping.insert(url.to_string(), cookies);

        debug!(url, "challenge solved");
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_enable_and_solve_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1"))
            .and(body_partial_json(json!({"cmd": "sessions.create"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session": "s1"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1"))
            .and(body_partial_json(json!({"cmd": "request.get"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "solution": {
                    "userAgent": "SolvedAgent/1.0",
                    "cookies": [{"name": "cf_clearance", "value": "token"}],
                }
            })))
            .mount(&server)
            .await;

        let solver = ChallengeSolver::new();
        assert!(!solver.is_enabled());
        assert!(solver.enable(&server.uri()).await);
        assert!(solver.is_enabled());

        assert!(solver.solve("https://example.com/page").await);
        let (ua, cookies) = solver.ua_cookies("https://example.com/page");
        assert_eq!(ua, "SolvedAgent/1.0");
        assert_eq!(cookies.get("cf_clearance").map(String::as_str), Some("token"));

        let (ua, cookies) = solver.ua_cookies("https://example.com/other");
        assert_eq!(ua, DEFAULT_USER_AGENT);
        assert!(cookies.is_empty());
    }

    #[test]
    fn test_challenge_header_detection() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert!(!ChallengeSolver::is_challenge(&headers));
        headers.insert("cf-mitigated", "challenge".parse().unwrap());
        assert!(ChallengeSolver::is_challenge(&headers));
    }
}
