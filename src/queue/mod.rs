//! The download queue: one ordered list of downloads, a single worker for
//! direct/cloud transfers, and a poller for external clients.
//!
//! # Overview
//!
//! - [`DownloadQueue`] - The queue actor: enqueue, cancel, shutdown,
//!   restart recovery
//! - [`QueueRow`] - The persisted form of a queued download
//! - [`history`] - The download history store
//!
//! # Concurrency model
//!
//! At most one direct/cloud download transfers at a time, in strict FIFO
//! order. Torrent and usenet downloads start eagerly, since their
//! bandwidth is owned by the external client, and are polled every five
//! seconds. All
//! queue state sits behind one mutex; long work happens on snapshots
//! outside of it. Post-processing of any download serializes through the
//! same actor, so external completions never interleave with the direct
//! worker's chains.

mod error;
mod grab;
pub mod history;
mod item;

pub use error::QueueError;
pub use item::QueueRow;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::context::Services;
use crate::download::{
    Download, DownloadKind, DownloadMeta, DownloadState, DownloadStatus,
};
use crate::events::QueueEvent;
use crate::postprocess::{ProcessChain, run_chain, success_chain};
use crate::settings::SeedingHandling;

/// How often external clients are polled.
const EXTERNAL_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How long the worker naps when no work is queued.
const WORKER_IDLE_WAIT: Duration = Duration::from_millis(500);

struct QueueEntry {
    id: i64,
    download: Arc<dyn Download>,
    /// Whether the copy-while-seeding chain already ran.
    seeding_processed: bool,
}

#[derive(Default)]
struct QueueInner {
    entries: Vec<QueueEntry>,
}

/// The queue actor.
#[derive(Clone)]
pub struct DownloadQueue {
    services: Services,
    inner: Arc<Mutex<QueueInner>>,
    work: Arc<Notify>,
    stopping: Arc<AtomicBool>,
}

impl DownloadQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            services,
            inner: Arc::new(Mutex::new(QueueInner::default())),
            work: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Starts the worker and the external-client poller.
    #[must_use]
    pub fn start(&self) -> (JoinHandle<()>, JoinHandle<()>) {
        let worker = {
            let queue = self.clone();
            tokio::spawn(async move { queue.worker_loop().await })
        };
        let poller = {
            let queue = self.clone();
            tokio::spawn(async move { queue.poll_loop().await })
        };
        (worker, poller)
    }

    /// Rebuilds the queue from the persisted rows. Rows whose links no
    /// longer resolve are marked failed and processed as such.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] when the rows cannot be read.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<(), QueueError> {
        for row in item::all_rows(&self.services.db).await? {
            match grab::download_from_row(&self.services, &row).await {
                Ok(download) => {
                    if let Some(external_id) = &row.external_id {
                        // The transfer survived the restart inside the
                        // external client.
                        download.restore_external_id(external_id.clone());
                    }
                    info!(id = row.id, link = %row.download_link, "restored queued download");
                    self.lock().entries.push(QueueEntry {
                        id: row.id,
                        download,
                        seeding_processed: false,
                    });
                }
                Err(e) => {
                    warn!(id = row.id, error = %e, "could not restore download; failing it");
                    let stub: Arc<dyn Download> = Arc::new(RowStub::from_row(&row));
                    stub.set_state(DownloadState::Failed);
                    if let Err(e) =
                        run_chain(&self.services, stub.as_ref(), row.id, ProcessChain::Failed)
                            .await
                    {
                        error!(id = row.id, error = %e, "failed chain errored");
                    }
                }
            }
        }
        self.work.notify_waiters();
        Ok(())
    }

    /// Fetches the article behind `web_link` and enqueues the downloads it
    /// yields for the volume (and optionally one issue). Returns the queue
    /// IDs.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Aggregator`] when the article yields nothing
    /// and store/database errors as-is.
    #[instrument(skip(self), fields(link = %web_link))]
    pub async fn grab_release(
        &self,
        web_link: &str,
        volume_id: i64,
        issue_id: Option<i64>,
        force_match: bool,
    ) -> Result<Vec<i64>, QueueError> {
        let downloads =
            grab::downloads_from_article(&self.services, web_link, volume_id, issue_id, force_match)
                .await?;

        let mut ids = Vec::with_capacity(downloads.len());
        for download in downloads {
            ids.push(self.add_download(download).await?);
        }
        Ok(ids)
    }

    /// Appends a download to the queue, persisting it first. External
    /// transfers start immediately.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] when persisting fails.
    pub async fn add_download(&self, download: Arc<dyn Download>) -> Result<i64, QueueError> {
        let external_client = download.external_client_id();
        let id = item::insert_row(&self.services.db, download.as_ref(), external_client).await?;

        self.lock().entries.push(QueueEntry {
            id,
            download: download.clone(),
            seeding_processed: false,
        });
        self.services
            .events
            .emit(QueueEvent::QueueAdded { download_id: id });
        info!(id, title = %download.meta().title, "download queued");

        if download.kind().is_external() {
            // External bandwidth is the client's own; start eagerly.
            let services = self.services.clone();
            let handed = download.clone();
            tokio::spawn(async move {
                handed.run().await;
                if let Some(external_id) = handed.external_id() {
                    if let Err(e) =
                        item::update_external_id(&services.db, id, &external_id).await
                    {
                        warn!(id, error = %e, "could not persist external id");
                    }
                }
            });
        }

        self.work.notify_waiters();
        Ok(id)
    }

    /// Summaries of everything in the queue, in order.
    #[must_use]
    pub fn list(&self) -> Vec<serde_json::Value> {
        self.lock()
            .entries
            .iter()
            .map(|entry| {
                let mut summary = entry.download.to_summary();
                if let Some(map) = summary.as_object_mut() {
                    map.insert("id".to_string(), serde_json::json!(entry.id));
                }
                summary
            })
            .collect()
    }

    /// The status of one download.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DownloadNotFound`] for an unknown ID.
    pub fn status(&self, id: i64) -> Result<DownloadStatus, QueueError> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.download.status())
            .ok_or(QueueError::DownloadNotFound(id))
    }

    /// Cancels a download: interrupts the transfer, removes it from its
    /// external client (deleting files), and runs the canceled chain.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DownloadNotFound`] for an unknown ID.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: i64) -> Result<(), QueueError> {
        let entry = {
            let inner = self.lock();
            inner
                .entries
                .iter()
                .find(|e| e.id == id)
                .map(|e| (e.download.clone(), e.download.state()))
        };
        let Some((download, state)) = entry else {
            return Err(QueueError::DownloadNotFound(id));
        };

        download.stop(DownloadState::Canceled);
        self.services
            .events
            .emit(QueueEvent::QueueStatus { download_id: id });

        if download.kind().is_external() {
            download.remove_from_client(true).await;
            self.finish_entry(id, &download, ProcessChain::Canceled).await;
        } else if state != DownloadState::Downloading {
            // Not in flight; the worker will never see it, process now.
            self.finish_entry(id, &download, ProcessChain::Canceled).await;
        }
        // An in-flight direct download is handled by the worker when the
        // stream notices the stop.
        Ok(())
    }

    /// Stops everything for process shutdown: streams are interrupted,
    /// external transfers are left running in their clients, and partial
    /// files of in-process transfers are removed.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.work.notify_waiters();

        let entries: Vec<(i64, Arc<dyn Download>)> = self
            .lock()
            .entries
            .iter()
            .map(|e| (e.id, e.download.clone()))
            .collect();

        for (id, download) in entries {
            download.stop(DownloadState::Shutdown);
            if !download.kind().is_external() && download.state() == DownloadState::Shutdown {
                if let Err(e) =
                    run_chain(&self.services, download.as_ref(), id, ProcessChain::Shutdown).await
                {
                    error!(id, error = %e, "shutdown chain errored");
                }
            }
        }
        info!("download queue shut down");
    }

    /// Runs a chain for an entry and removes it from the queue.
    async fn finish_entry(&self, id: i64, download: &Arc<dyn Download>, chain: ProcessChain) {
        if let Err(e) = run_chain(&self.services, download.as_ref(), id, chain).await {
            error!(id, error = %e, "post-processing chain errored");
        }
        self.lock().entries.retain(|e| e.id != id);
        self.services
            .events
            .emit(QueueEvent::QueueEnded { download_id: id });
    }

    fn next_direct(&self) -> Option<(i64, Arc<dyn Download>)> {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .find(|e| {
                !e.download.kind().is_external() && e.download.state() == DownloadState::Queued
            })
            .map(|e| (e.id, e.download.clone()))
    }

    async fn worker_loop(&self) {
        loop {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let Some((id, download)) = self.next_direct() else {
                tokio::select! {
                    () = self.work.notified() => {}
                    () = tokio::time::sleep(WORKER_IDLE_WAIT) => {}
                }
                continue;
            };

            debug!(id, "starting direct download");
            self.services
                .events
                .emit(QueueEvent::QueueStatus { download_id: id });

            download.run().await;

            let chain = match download.state() {
                DownloadState::Canceled => ProcessChain::Canceled,
                DownloadState::Shutdown => ProcessChain::Shutdown,
                DownloadState::Failed => ProcessChain::Failed,
                _ => {
                    download.set_state(DownloadState::Importing);
                    self.services
                        .events
                        .emit(QueueEvent::QueueStatus { download_id: id });
                    success_chain(false, self.services.settings.get().seeding_handling)
                }
            };
            self.finish_entry(id, &download, chain).await;
        }
    }

    async fn poll_loop(&self) {
        let mut ticker = tokio::time::interval(EXTERNAL_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let externals: Vec<(i64, Arc<dyn Download>, bool)> = self
                .lock()
                .entries
                .iter()
                .filter(|e| e.download.kind().is_external())
                .map(|e| (e.id, e.download.clone(), e.seeding_processed))
                .collect();

            for (id, download, seeding_processed) in externals {
                download.update_status().await;
                self.services
                    .events
                    .emit(QueueEvent::QueueStatus { download_id: id });

                let seeding_handling = self.services.settings.get().seeding_handling;
                match download.state() {
                    DownloadState::Seeding
                        if seeding_handling == SeedingHandling::Copy && !seeding_processed =>
                    {
                        // Copy into the library while the torrent seeds on.
                        if let Err(e) = run_chain(
                            &self.services,
                            download.as_ref(),
                            id,
                            ProcessChain::SeedingCopy,
                        )
                        .await
                        {
                            error!(id, error = %e, "seeding chain errored");
                        }
                        if let Some(entry) =
                            self.lock().entries.iter_mut().find(|e| e.id == id)
                        {
                            entry.seeding_processed = true;
                        }
                    }

                    DownloadState::Importing => {
                        if seeding_handling == SeedingHandling::Copy && !seeding_processed {
                            // Finished before the copy happened; copy first.
                            if let Err(e) = run_chain(
                                &self.services,
                                download.as_ref(),
                                id,
                                ProcessChain::SeedingCopy,
                            )
                            .await
                            {
                                error!(id, error = %e, "seeding chain errored");
                            }
                        }
                        let chain = success_chain(true, seeding_handling);
                        download.remove_from_client(false).await;
                        self.finish_entry(id, &download, chain).await;
                    }

                    DownloadState::Failed => {
                        download.remove_from_client(true).await;
                        self.finish_entry(id, &download, ProcessChain::Failed).await;
                    }

                    DownloadState::Canceled => {
                        self.finish_entry(id, &download, ProcessChain::Canceled).await;
                    }

                    _ => {}
                }
            }
        }
    }
}

/// Minimal stand-in for a download that could not be rebuilt; carries just
/// enough identity to run the failed chain.
#[derive(Debug)]
struct RowStub {
    meta: DownloadMeta,
    state: Mutex<DownloadState>,
}

impl RowStub {
    fn from_row(row: &QueueRow) -> Self {
        Self {
            meta: DownloadMeta {
                volume_id: row.volume_id,
                issue_id: row.issue_id,
                covered_issues: row.covered_issues(),
                source: crate::source::DownloadSource::from_str_opt(&row.source_kind)
                    .unwrap_or(crate::source::DownloadSource::Direct),
                source_name: row.source_name.clone(),
                web_link: row.web_link.clone(),
                web_title: row.web_title.clone(),
                web_sub_title: row.web_sub_title.clone(),
                download_link: row.download_link.clone(),
                pure_link: row.download_link.clone(),
                filename_body: String::new(),
                title: row.web_sub_title.clone().unwrap_or_default(),
                download_folder: PathBuf::new(),
            },
            state: Mutex::new(DownloadState::Failed),
        }
    }
}

#[async_trait]
impl Download for RowStub {
    fn meta(&self) -> &DownloadMeta {
        &self.meta
    }

    fn kind(&self) -> DownloadKind {
        DownloadKind::Direct
    }

    fn status(&self) -> DownloadStatus {
        DownloadStatus {
            state: self.state(),
            progress: 0.0,
            speed: 0.0,
            size: -1,
        }
    }

    fn state(&self) -> DownloadState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_state(&self, state: DownloadState) {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    fn files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn set_files(&self, _files: Vec<PathBuf>) {}

    async fn run(&self) {}

    fn stop(&self, state: DownloadState) {
        self.set_state(state);
    }
}
