//! Download clients: direct HTTP streaming, the Mega protocol, and
//! delegation to external torrent/usenet clients.
//!
//! # Overview
//!
//! - [`Download`] - The behavior surface every client implements
//!   (`run`, `stop`, `update_status`, `to_summary`)
//! - [`DirectDownload`] - Streaming HTTP download (also carries the
//!   MediaFire/WeTransfer/Pixeldrain variants after link resolution)
//! - [`MegaDownload`] - Mega's encrypted chunk protocol
//! - [`ExternalDownload`] - A transfer owned by qBittorrent or SABnzbd
//! - [`RetryPolicy`] / [`classify_error`] - Transparent retry layer
//!
//! A download is constructed in `Queued` state, driven by the queue's
//! worker through `run()`, and lands in a terminal state either by
//! finishing (state still `Downloading` means success), failing, or being
//! stopped with `Canceled`/`Shutdown`.

mod direct;
mod error;
mod external;
mod filename;
mod mega;
mod retry;

pub use direct::{DirectDownload, FetchSpec};
pub use error::DownloadError;
pub use external::{
    ExternalClientApi, ExternalClientConfig, ExternalClientKind, ExternalClients,
    ExternalDownload, ExternalPoll, ExternalStatus, QBittorrentClient, SabnzbdClient,
};
pub use filename::{
    build_download_path, extension_from_response, filename_body_from_disposition,
    filename_body_from_url,
};
pub use mega::{MegaDownload, MegaSessionCache};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
};

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use crate::fingerprint::NumberSpan;
use crate::source::DownloadSource;

/// Bytes per streamed chunk; progress and speed update at this cadence.
pub const DOWNLOAD_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Lifecycle state of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Queued,
    Downloading,
    /// Torrent finished transferring and is seeding.
    Seeding,
    /// Transfer done; post-processing is moving files into the library.
    Importing,
    /// Download was unsuccessful.
    Failed,
    /// Download was removed from the queue.
    Canceled,
    /// Download was stopped because the service is shutting down.
    Shutdown,
}

impl DownloadState {
    /// Stable string form used in summaries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Seeding => "seeding",
            Self::Importing => "importing",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Shutdown => "shutting down",
        }
    }

    /// Whether the download was stopped rather than completed.
    #[must_use]
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Failed | Self::Canceled | Self::Shutdown)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete client type of a download, persisted so the queue can rebuild
/// the right client on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    Direct,
    MediaFire,
    MediaFireFolder,
    WeTransfer,
    PixelDrain,
    PixelDrainFolder,
    Mega,
    MegaFolder,
    Torrent,
    Usenet,
}

impl DownloadKind {
    /// Stable tag used in summaries and the queue table.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::MediaFire => "mf",
            Self::MediaFireFolder => "mf_folder",
            Self::WeTransfer => "wt",
            Self::PixelDrain => "pd",
            Self::PixelDrainFolder => "pd_folder",
            Self::Mega => "mega",
            Self::MegaFolder => "mega_folder",
            Self::Torrent => "torrent",
            Self::Usenet => "usenet",
        }
    }

    /// Whether the transfer is owned by an external client.
    #[must_use]
    pub fn is_external(self) -> bool {
        matches!(self, Self::Torrent | Self::Usenet)
    }
}

/// Identity and target of a download; immutable once created.
#[derive(Debug, Clone)]
pub struct DownloadMeta {
    pub volume_id: i64,
    pub issue_id: Option<i64>,
    pub covered_issues: Option<NumberSpan<f64>>,
    pub source: DownloadSource,
    pub source_name: String,
    pub web_link: Option<String>,
    pub web_title: Option<String>,
    pub web_sub_title: Option<String>,
    pub download_link: String,
    pub pure_link: String,
    /// Filename body (no extension) the payload files under in the library.
    pub filename_body: String,
    pub title: String,
    pub download_folder: PathBuf,
}

/// Snapshot of a download's transfer status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadStatus {
    pub state: DownloadState,
    /// Percentage 0-100, or plain bytes when the size is unknown.
    pub progress: f64,
    /// Bytes per second over the last chunk.
    pub speed: f64,
    /// Total size in bytes, `-1` when unknown.
    pub size: i64,
}

/// Interior-mutable state shared between the queue and a running transfer.
#[derive(Debug)]
pub(crate) struct SharedState {
    state: Mutex<DownloadState>,
    progress: Mutex<(f64, f64)>,
    size: Mutex<i64>,
    files: Mutex<Vec<PathBuf>>,
    stop: Notify,
}

impl SharedState {
    pub(crate) fn new(size: i64, files: Vec<PathBuf>) -> Self {
        Self {
            state: Mutex::new(DownloadState::Queued),
            progress: Mutex::new((0.0, 0.0)),
            size: Mutex::new(size),
            files: Mutex::new(files),
            stop: Notify::new(),
        }
    }

    pub(crate) fn state(&self) -> DownloadState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: DownloadState) {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    pub(crate) fn set_progress(&self, progress: f64, speed: f64) {
        *self
            .progress
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = (progress, speed);
    }

    pub(crate) fn set_size(&self, size: i64) {
        *self
            .size
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = size;
    }

    pub(crate) fn status(&self) -> DownloadStatus {
        let (progress, speed) = *self
            .progress
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        DownloadStatus {
            state: self.state(),
            progress,
            speed,
            size: *self
                .size
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        }
    }

    pub(crate) fn files(&self) -> Vec<PathBuf> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_files(&self, files: Vec<PathBuf>) {
        *self
            .files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = files;
    }

    pub(crate) fn request_stop(&self, state: DownloadState) {
        self.set_state(state);
        self.stop.notify_waiters();
    }

    pub(crate) fn stop_signal(&self) -> &Notify {
        &self.stop
    }
}

/// The behavior surface of every download client.
#[async_trait]
pub trait Download: Send + Sync + fmt::Debug {
    /// The download's identity.
    fn meta(&self) -> &DownloadMeta;

    /// The persisted client type tag.
    fn kind(&self) -> DownloadKind;

    /// A snapshot of the transfer status.
    fn status(&self) -> DownloadStatus;

    /// Current state only.
    fn state(&self) -> DownloadState;

    /// Forces the state; used by the queue for importing/seeding moves.
    fn set_state(&self, state: DownloadState);

    /// The output files of the transfer.
    fn files(&self) -> Vec<PathBuf>;

    /// Replaces the output files (post-processing moves them around).
    fn set_files(&self, files: Vec<PathBuf>);

    /// Drives the transfer to completion or a stopped state. A state other
    /// than a stopped one after return means success.
    async fn run(&self);

    /// Interrupts the transfer, leaving the download in `state`.
    fn stop(&self, state: DownloadState);

    /// Refreshes status from the owning external client, for polled
    /// back-ends. No-op for in-process transfers.
    async fn update_status(&self) {}

    /// The external client's identifier for this transfer, if delegated.
    fn external_id(&self) -> Option<String> {
        None
    }

    /// Restores an external client's transfer ID after a restart.
    fn restore_external_id(&self, _external_id: String) {}

    /// The configured external client's row ID, if delegated.
    fn external_client_id(&self) -> Option<i64> {
        None
    }

    /// Removes the transfer from its external client, if delegated.
    async fn remove_from_client(&self, _delete_files: bool) {}

    /// A serializable summary for events and the CLI.
    fn to_summary(&self) -> serde_json::Value {
        let meta = self.meta();
        let status = self.status();
        json!({
            "volume_id": meta.volume_id,
            "issue_id": meta.issue_id,
            "web_link": meta.web_link,
            "web_title": meta.web_title,
            "web_sub_title": meta.web_sub_title,
            "download_link": meta.download_link,
            "pure_link": meta.pure_link,
            "source": meta.source.as_str(),
            "source_name": meta.source_name,
            "type": self.kind().as_str(),
            "file": self.files().first().map(|f| f.to_string_lossy().to_string()),
            "title": meta.title,
            "download_folder": meta.download_folder.to_string_lossy(),
            "size": status.size,
            "status": status.state.as_str(),
            "progress": status.progress,
            "speed": status.speed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings() {
        assert_eq!(DownloadState::Queued.as_str(), "queued");
        assert_eq!(DownloadState::Shutdown.as_str(), "shutting down");
        assert!(DownloadState::Failed.is_stopped());
        assert!(!DownloadState::Seeding.is_stopped());
    }

    #[test]
    fn test_kind_externality() {
        assert!(DownloadKind::Torrent.is_external());
        assert!(DownloadKind::Usenet.is_external());
        assert!(!DownloadKind::Mega.is_external());
    }

    #[test]
    fn test_shared_state_round_trip() {
        let shared = SharedState::new(-1, Vec::new());
        assert_eq!(shared.state(), DownloadState::Queued);

        shared.set_state(DownloadState::Downloading);
        shared.set_progress(42.0, 1024.0);
        shared.set_size(100);

        let status = shared.status();
        assert_eq!(status.state, DownloadState::Downloading);
        assert!((status.progress - 42.0).abs() < f64::EPSILON);
        assert_eq!(status.size, 100);

        shared.request_stop(DownloadState::Canceled);
        assert_eq!(shared.state(), DownloadState::Canceled);
    }
}
