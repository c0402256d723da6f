//! Structured error types for download operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::blocklist::BlocklistReason;
use crate::source::DownloadSource;

/// Errors that can occur while creating or running a download.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Server returned an unsuccessful HTTP status code.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code received.
        status: u16,
    },

    /// Network-level failure (DNS, connection, TLS).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that was requested.
        url: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Request did not complete within the timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that was requested.
        url: String,
    },

    /// Local filesystem failure.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path being written or read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The input could not be parsed as a URL.
    #[error("invalid URL: {input}")]
    InvalidUrl {
        /// The offending input.
        input: String,
    },

    /// The link is broken or its source unsupported; the article link
    /// should be blocklisted with the carried reason.
    #[error("link unusable: {}", reason.description())]
    LinkBroken {
        /// Why the link is unusable.
        reason: BlocklistReason,
    },

    /// The service's transfer quota is exhausted. The link itself is still
    /// valid, so this never leads to a blocklist entry.
    #[error("download limit reached on {source}")]
    LimitReached {
        /// The service that limited the transfer.
        source: DownloadSource,
    },

    /// An external client (torrent/usenet) rejected the request or cannot
    /// be reached.
    #[error("external client not working: {description}")]
    ClientNotWorking {
        /// What went wrong.
        description: String,
    },

    /// The payload failed verification after transfer.
    #[error("corrupt payload: {description}")]
    CorruptPayload {
        /// What failed to verify.
        description: String,
    },
}

impl DownloadError {
    /// Creates an `HttpStatus` error.
    #[must_use]
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a `Network` error from a reqwest error, classifying timeouts.
    #[must_use]
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an `Io` error.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an `InvalidUrl` error.
    #[must_use]
    pub fn invalid_url(input: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
        }
    }

    /// Creates a `LinkBroken` error.
    #[must_use]
    pub fn link_broken(reason: BlocklistReason) -> Self {
        Self::LinkBroken { reason }
    }

    /// Creates a `ClientNotWorking` error.
    #[must_use]
    pub fn client_not_working(description: impl Into<String>) -> Self {
        Self::ClientNotWorking {
            description: description.into(),
        }
    }
}
