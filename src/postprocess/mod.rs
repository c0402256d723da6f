//! Post-processing: the per-terminal-state action chains that turn a
//! finished download into correctly placed library files.
//!
//! Behavior is a dispatch table: each `(download shape, terminal state)`
//! pair maps to an ordered list of [`Action`]s. Actions are small and
//! composable; a chain runs them in order and stops on the first hard
//! failure.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::blocklist::{BlocklistReason, NewBlocklistEntry};
use crate::context::Services;
use crate::conversion;
use crate::db::Database;
use crate::download::Download;
use crate::fingerprint::is_scannable_file;
use crate::library::fsops::{copy_directory, delete_file_folder, rename_file};
use crate::library::{LibraryError, scan_files};
use crate::naming::mass_rename;
use crate::queue::history;
use crate::settings::SeedingHandling;

/// Post-processing errors.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("naming error: {0}")]
    Rename(#[from] crate::naming::RenameError),
}

/// One post-processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Delete the download's queue row.
    Dequeue,
    /// Record the download in history.
    History,
    /// Move the payload file into the volume folder.
    MoveToDest,
    /// Move a torrent/usenet payload, then pull the relevant files out of
    /// it and rename them.
    MoveTorrentToDest,
    /// Copy the payload into the library while the original keeps seeding.
    CopyTorrent,
    /// Point the download back at the original payload after a copy.
    ResetFileLink,
    /// Register and match the files in the library.
    Scan,
    /// Convert files to the preferred format (and unpack range archives).
    Convert,
    /// Delete the payload files from the download folder.
    DeleteFiles,
    /// Blocklist the download's link.
    Blocklist,
}

/// Which chain to run for a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessChain {
    /// Direct/cloud download finished.
    SuccessDirect,
    /// Torrent (complete strategy) or usenet payload finished.
    SuccessTorrentComplete,
    /// Torrent (copy strategy) finished downloading and started seeding.
    SeedingCopy,
    /// Torrent (copy strategy) finished seeding.
    SuccessTorrentCopy,
    Canceled,
    Shutdown,
    Failed,
    /// Failed with no alternative links left; the link gets blocklisted.
    PermanentlyFailed,
}

impl ProcessChain {
    /// The ordered actions of the chain.
    #[must_use]
    pub fn actions(self) -> &'static [Action] {
        use Action::{
            Blocklist, Convert, CopyTorrent, DeleteFiles, Dequeue, History, MoveToDest,
            MoveTorrentToDest, ResetFileLink, Scan,
        };
        match self {
            Self::SuccessDirect => &[Dequeue, History, MoveToDest, Scan, Convert, Scan],
            Self::SuccessTorrentComplete => {
                &[Dequeue, History, MoveTorrentToDest, Convert, Scan]
            }
            Self::SeedingCopy => &[History, CopyTorrent, Convert, Scan, ResetFileLink],
            Self::SuccessTorrentCopy => &[Dequeue, DeleteFiles],
            Self::Canceled => &[DeleteFiles, Dequeue],
            Self::Shutdown => &[DeleteFiles],
            Self::Failed => &[Dequeue, History, DeleteFiles],
            Self::PermanentlyFailed => &[Dequeue, History, Blocklist, DeleteFiles],
        }
    }
}

/// Picks the success chain fitting a download's shape and the seeding
/// strategy.
#[must_use]
pub fn success_chain(is_external: bool, seeding_handling: SeedingHandling) -> ProcessChain {
    if !is_external {
        ProcessChain::SuccessDirect
    } else if seeding_handling == SeedingHandling::Copy {
        ProcessChain::SuccessTorrentCopy
    } else {
        ProcessChain::SuccessTorrentComplete
    }
}

/// Runs a chain for a download. `queue_row_id` is the persisted queue row
/// the dequeue action removes.
///
/// # Errors
///
/// Returns [`ProcessError`] when an action fails hard; filesystem warnings
/// (e.g. attribute copies across filesystems) do not fail the chain.
#[instrument(skip(services, download), fields(chain = ?chain))]
pub async fn run_chain(
    services: &Services,
    download: &dyn Download,
    queue_row_id: i64,
    chain: ProcessChain,
) -> Result<(), ProcessError> {
    info!(
        download = %download.meta().title,
        state = %download.state(),
        "post-processing download"
    );

    let mut original_files: Option<Vec<PathBuf>> = None;

    for action in chain.actions() {
        debug!(?action, "running post-processing action");
        match action {
            Action::Dequeue => {
                sqlx::query("DELETE FROM download_queue WHERE id = ?")
                    .bind(queue_row_id)
                    .execute(services.db.pool())
                    .await?;
            }

            Action::History => {
                history::add_entry(&services.db, download).await?;
            }

            Action::MoveToDest => move_to_dest(services, download).await?,

            Action::MoveTorrentToDest => {
                move_to_dest(services, download).await?;
                let Some(payload) = download.files().into_iter().next() else {
                    continue;
                };
                if payload.is_dir() {
                    let extracted = conversion::extract_files_from_folder(
                        &services.volumes,
                        download.meta().volume_id,
                        &payload,
                    )
                    .await?;
                    download.set_files(extracted);
                }
                finish_payload_files(services, download).await?;
            }

            Action::CopyTorrent => {
                original_files = Some(download.files());
                copy_torrent(services, download).await?;
                finish_payload_files(services, download).await?;
            }

            Action::ResetFileLink => {
                if let Some(files) = original_files.take() {
                    download.set_files(files);
                }
            }

            Action::Scan => {
                let paths: Vec<String> = download
                    .files()
                    .iter()
                    .map(|f| f.to_string_lossy().to_string())
                    .collect();
                if !paths.is_empty() {
                    scan_files(
                        &services.volumes,
                        &services.files,
                        download.meta().volume_id,
                        Some(&paths),
                    )
                    .await?;
                }
            }

            Action::Convert => {
                let settings = services.settings.get();
                if !settings.convert {
                    continue;
                }
                let paths: Vec<String> = download
                    .files()
                    .iter()
                    .map(|f| f.to_string_lossy().to_string())
                    .collect();

                if settings.extract_issue_ranges {
                    let extracted = conversion::extract_issue_ranges(
                        &services.volumes,
                        &services.files,
                        download.meta().volume_id,
                        Some(&paths),
                    )
                    .await?;
                    if !extracted.is_empty() {
                        download.set_files(extracted);
                    }
                }

                let paths: Vec<String> = download
                    .files()
                    .iter()
                    .map(|f| f.to_string_lossy().to_string())
                    .collect();
                let converted = conversion::mass_convert(
                    &services.volumes,
                    &services.files,
                    &settings,
                    download.meta().volume_id,
                    download.meta().issue_id,
                    Some(&paths),
                )
                .await?;
                if !converted.is_empty() {
                    download.set_files(converted);
                }
            }

            Action::DeleteFiles => {
                let settings = services.settings.get();
                if chain == ProcessChain::SuccessTorrentCopy
                    && !settings.delete_completed_torrents
                {
                    continue;
                }
                for file in download.files() {
                    delete_file_folder(&file);
                }
            }

            Action::Blocklist => {
                let meta = download.meta();
                services
                    .blocklist
                    .add(
                        NewBlocklistEntry {
                            volume_id: Some(meta.volume_id),
                            issue_id: meta.issue_id,
                            web_link: meta.web_link.clone(),
                            web_title: meta.web_title.clone(),
                            web_sub_title: meta.web_sub_title.clone(),
                            download_link: Some(meta.download_link.clone()),
                            source: Some(meta.source),
                        },
                        BlocklistReason::LinkBroken,
                    )
                    .await?;
            }
        }
    }

    Ok(())
}

/// Moves the payload to its destination in the volume folder, replacing any
/// existing file. Commits nothing mid-move: the database is not touched
/// while the filesystem works.
async fn move_to_dest(services: &Services, download: &dyn Download) -> Result<(), ProcessError> {
    let Some(source) = download.files().into_iter().next() else {
        return Ok(());
    };
    if !source.exists() {
        return Ok(());
    }

    let volume = services
        .volumes
        .get_data(download.meta().volume_id)
        .await?;

    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .filter(|e| is_scannable_file(&format!("x{e}")))
        .unwrap_or_default();
    let dest = Path::new(&volume.folder).join(format!(
        "{}{}",
        download.meta().filename_body,
        extension
    ));

    debug!(source = %source.display(), dest = %dest.display(), "moving payload");
    if dest.exists() {
        warn!(dest = %dest.display(), "destination exists; replacing with downloaded file");
        delete_file_folder(&dest);
    }

    let move_source = source.clone();
    let move_dest = dest.clone();
    tokio::task::spawn_blocking(move || rename_file(&move_source, &move_dest))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))??;

    download.set_files(vec![dest]);
    Ok(())
}

/// Copies the torrent payload into the volume folder and extracts the
/// relevant files; the original stays behind for seeding.
async fn copy_torrent(services: &Services, download: &dyn Download) -> Result<(), ProcessError> {
    let Some(source) = download.files().into_iter().next() else {
        return Ok(());
    };
    if !source.exists() {
        return Ok(());
    }

    let volume = services
        .volumes
        .get_data(download.meta().volume_id)
        .await?;
    let basename = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let dest = Path::new(&volume.folder).join(basename);

    debug!(source = %source.display(), dest = %dest.display(), "copying payload");
    if dest.exists() {
        warn!(dest = %dest.display(), "destination exists; replacing with downloaded file");
        delete_file_folder(&dest);
    }

    let copy_source = source.clone();
    let copy_dest = dest.clone();
    tokio::task::spawn_blocking(move || copy_directory(&copy_source, &copy_dest))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))??;

    if dest.is_dir() {
        let extracted = conversion::extract_files_from_folder(
            &services.volumes,
            download.meta().volume_id,
            &dest,
        )
        .await?;
        download.set_files(extracted);
    } else {
        download.set_files(vec![dest]);
    }
    Ok(())
}

/// Scans and renames freshly placed payload files.
async fn finish_payload_files(
    services: &Services,
    download: &dyn Download,
) -> Result<(), ProcessError> {
    let paths: Vec<String> = download
        .files()
        .iter()
        .map(|f| f.to_string_lossy().to_string())
        .collect();
    if paths.is_empty() {
        return Ok(());
    }

    scan_files(
        &services.volumes,
        &services.files,
        download.meta().volume_id,
        Some(&paths),
    )
    .await?;

    let settings = services.settings.get();
    if settings.rename_downloaded_files {
        let renamed = mass_rename(
            &services.volumes,
            &services.files,
            &settings,
            download.meta().volume_id,
            Some(&paths),
        )
        .await?;
        if !renamed.is_empty() {
            let mut files = download.files();
            files.extend(renamed.iter().map(PathBuf::from));
            // Renamed paths replace their sources.
            files.retain(|f| f.exists());
            download.set_files(files);
        }
    }
    Ok(())
}

/// Records the current unix time; kept here so history entries and tests
/// agree on the clock.
#[must_use]
pub fn now() -> i64 {
    Database::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_tables_match_shapes() {
        assert_eq!(
            ProcessChain::SuccessDirect.actions().first(),
            Some(&Action::Dequeue)
        );
        assert_eq!(
            ProcessChain::SeedingCopy.actions().last(),
            Some(&Action::ResetFileLink)
        );
        assert!(
            ProcessChain::PermanentlyFailed
                .actions()
                .contains(&Action::Blocklist)
        );
        assert!(!ProcessChain::Failed.actions().contains(&Action::Blocklist));
        assert_eq!(ProcessChain::Shutdown.actions(), &[Action::DeleteFiles]);
    }

    #[test]
    fn test_success_chain_selection() {
        assert_eq!(
            success_chain(false, SeedingHandling::Complete),
            ProcessChain::SuccessDirect
        );
        assert_eq!(
            success_chain(true, SeedingHandling::Complete),
            ProcessChain::SuccessTorrentComplete
        );
        assert_eq!(
            success_chain(true, SeedingHandling::Copy),
            ProcessChain::SuccessTorrentCopy
        );
    }
}
