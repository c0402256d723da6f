//! Scanning a volume folder and mapping files to issues.

use std::path::Path;

use tracing::{debug, instrument, warn};

use super::files::{FilesStore, GeneralFileType};
use super::fsops::list_files;
use super::volume::{IssueYearIndex, VolumeStore};
use super::error::LibraryError;
use crate::fingerprint::{
    ExtractOptions, NumberSpan, SpecialVersion, extract_filename_data, is_scannable_file,
};
use crate::matching::{effective_issue_number, file_importing_filter};

/// Scans the volume's folder and (re)builds the file-to-issue links.
///
/// The scan is idempotent: running it twice produces the same links. With
/// `filepath_filter`, only the listed files are (re)considered and their
/// previous links dropped first. Files in the store that no longer exist on
/// disk are removed, and orphan rows are garbage collected.
///
/// # Errors
///
/// Returns [`LibraryError`] when the volume is unknown, the folder walk
/// fails, or a store operation fails.
#[instrument(skip(volumes, files_store, filepath_filter))]
pub async fn scan_files(
    volumes: &VolumeStore,
    files_store: &FilesStore,
    volume_id: i64,
    filepath_filter: Option<&[String]>,
) -> Result<(), LibraryError> {
    let volume = volumes.get_data(volume_id).await?;
    let issues = volumes.get_issues(volume_id).await?;
    let number_to_year = IssueYearIndex::from_issues(&issues);

    let folder = Path::new(&volume.folder);
    let on_disk: Vec<String> = if folder.is_dir() {
        list_files(folder, &|name| is_scannable_file(name))?
            .into_iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect()
    } else {
        Vec::new()
    };

    let candidates: Vec<String> = match filepath_filter {
        Some(filter) => on_disk
            .iter()
            .filter(|p| filter.contains(p))
            .cloned()
            .collect(),
        None => on_disk.clone(),
    };

    // Reconsidered files lose their previous links first, so the scan can't
    // accumulate stale rows.
    files_store.clear_links_for_paths(&candidates).await?;

    for filepath in &candidates {
        let fingerprint = extract_filename_data(filepath, ExtractOptions::default());
        if !file_importing_filter(&fingerprint, &volume, &issues, &number_to_year) {
            debug!(file = %filepath, "file does not match volume");
            continue;
        }

        let size = std::fs::metadata(filepath).map(|m| m.len() as i64).unwrap_or(0);

        match fingerprint.special_version {
            Some(SpecialVersion::Cover) => {
                let file_id = files_store.add_file(filepath, size).await?;
                files_store
                    .link_volume_file(file_id, volume_id, GeneralFileType::Cover)
                    .await?;
            }
            Some(SpecialVersion::Metadata) => {
                let file_id = files_store.add_file(filepath, size).await?;
                files_store
                    .link_volume_file(file_id, volume_id, GeneralFileType::Metadata)
                    .await?;
            }
            _ => match effective_issue_number(&fingerprint, &volume) {
                Some(NumberSpan::Single(number)) => {
                    match volumes.issue_by_calc_number(volume_id, number).await {
                        Ok(issue) => {
                            let file_id = files_store.add_file(filepath, size).await?;
                            files_store.link_issue(file_id, issue.id).await?;
                        }
                        Err(LibraryError::IssueNotFound(_)) => {
                            debug!(file = %filepath, number, "no issue with this number");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Some(NumberSpan::Range(start, end)) => {
                    let in_range = volumes.get_issues_in_range(volume_id, start, end).await?;
                    if in_range.is_empty() {
                        debug!(file = %filepath, start, end, "no issues in range");
                        continue;
                    }
                    let file_id = files_store.add_file(filepath, size).await?;
                    for issue in in_range {
                        files_store.link_issue(file_id, issue.id).await?;
                    }
                }
                None => {
                    // A special-version file covers the whole volume.
                    let file_id = files_store.add_file(filepath, size).await?;
                    for issue in issues.iter().filter(|i| i.monitored) {
                        files_store.link_issue(file_id, issue.id).await?;
                    }
                }
            },
        }
    }

    // Files the store knows but the disk no longer has.
    let known = files_store.files_for_volume(volume_id).await?;
    let mut vanished = Vec::new();
    for file in known {
        if !Path::new(&file.filepath).exists() {
            warn!(file = %file.filepath, "file vanished from disk; unlinking");
            vanished.push(file.filepath);
        }
    }
    if !vanished.is_empty() {
        files_store.clear_links_for_paths(&vanished).await?;
    }

    files_store.gc().await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::library::{NewIssue, NewVolume};

    async fn setup(special_version: Option<SpecialVersion>) -> (VolumeStore, FilesStore, tempfile::TempDir, i64) {
        let db = Database::new_in_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        sqlx::query("INSERT INTO root_folders (folder) VALUES (?)")
            .bind(tmp.path().to_string_lossy().to_string())
            .execute(db.pool())
            .await
            .unwrap();

        let volumes = VolumeStore::new(db.clone());
        let files = FilesStore::new(db);

        let folder = tmp.path().join("Paper Girls/Volume 01 (2015)");
        std::fs::create_dir_all(&folder).unwrap();
        let volume_id = volumes
            .add(&NewVolume {
                comicvine_id: 1,
                title: "Paper Girls".to_string(),
                alt_title: None,
                year: Some(2015),
                publisher: None,
                volume_number: 1,
                description: None,
                folder: folder.to_string_lossy().to_string(),
                root_folder: 1,
                special_version,
            })
            .await
            .unwrap();

        for n in 1..=10 {
            volumes
                .upsert_issue(
                    volume_id,
                    &NewIssue {
                        comicvine_id: n,
                        issue_number: n.to_string(),
                        calculated_issue_number: n as f64,
                        title: None,
                        date: Some(format!("2015-{:02}-01", n)),
                        description: None,
                        monitored: true,
                    },
                )
                .await
                .unwrap();
        }

        (volumes, files, tmp, volume_id)
    }

    #[tokio::test]
    async fn test_scan_links_single_and_range() {
        let (volumes, files, _tmp, volume_id) = setup(None).await;
        let volume = volumes.get_data(volume_id).await.unwrap();
        let folder = Path::new(&volume.folder);

        std::fs::write(folder.join("Paper Girls (2015) Issue 4.cbz"), b"x").unwrap();
        std::fs::write(folder.join("Paper Girls (2015) Issue 6-8.cbz"), b"x").unwrap();
        std::fs::write(folder.join("unrelated notes.txt"), b"x").unwrap();

        scan_files(&volumes, &files, volume_id, None).await.unwrap();

        let issue_4 = volumes.issue_by_calc_number(volume_id, 4.0).await.unwrap();
        assert_eq!(files.files_for_issue(issue_4.id).await.unwrap().len(), 1);
        let issue_7 = volumes.issue_by_calc_number(volume_id, 7.0).await.unwrap();
        assert_eq!(files.files_for_issue(issue_7.id).await.unwrap().len(), 1);
        let issue_9 = volumes.issue_by_calc_number(volume_id, 9.0).await.unwrap();
        assert!(files.files_for_issue(issue_9.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_is_idempotent() {
        let (volumes, files, _tmp, volume_id) = setup(None).await;
        let volume = volumes.get_data(volume_id).await.unwrap();
        std::fs::write(
            Path::new(&volume.folder).join("Paper Girls (2015) Issue 4.cbz"),
            b"x",
        )
        .unwrap();

        scan_files(&volumes, &files, volume_id, None).await.unwrap();
        scan_files(&volumes, &files, volume_id, None).await.unwrap();

        let issue_4 = volumes.issue_by_calc_number(volume_id, 4.0).await.unwrap();
        let linked = files.files_for_issue(issue_4.id).await.unwrap();
        assert_eq!(linked.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_removes_vanished_files() {
        let (volumes, files, _tmp, volume_id) = setup(None).await;
        let volume = volumes.get_data(volume_id).await.unwrap();
        let path = Path::new(&volume.folder).join("Paper Girls (2015) Issue 4.cbz");
        std::fs::write(&path, b"x").unwrap();

        scan_files(&volumes, &files, volume_id, None).await.unwrap();
        std::fs::remove_file(&path).unwrap();
        scan_files(&volumes, &files, volume_id, None).await.unwrap();

        assert!(files
            .get_by_path(&path.to_string_lossy())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_scan_links_tpb_to_all_monitored_issues() {
        let (volumes, files, _tmp, volume_id) = setup(Some(SpecialVersion::Tpb)).await;
        let volume = volumes.get_data(volume_id).await.unwrap();
        std::fs::write(
            Path::new(&volume.folder).join("Paper Girls (2015) TPB.cbz"),
            b"x",
        )
        .unwrap();

        scan_files(&volumes, &files, volume_id, None).await.unwrap();

        for n in 1..=10 {
            let issue = volumes
                .issue_by_calc_number(volume_id, f64::from(n))
                .await
                .unwrap();
            assert_eq!(files.files_for_issue(issue.id).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_scan_registers_metadata_as_general_file() {
        let (volumes, files, _tmp, volume_id) = setup(None).await;
        let volume = volumes.get_data(volume_id).await.unwrap();
        let path = Path::new(&volume.folder).join("comicinfo.xml");
        std::fs::write(&path, b"<ComicInfo/>").unwrap();

        scan_files(&volumes, &files, volume_id, None).await.unwrap();

        let file = files
            .get_by_path(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert!(files.issues_for_file(file.id).await.unwrap().is_empty());
        assert_eq!(files.files_for_volume(volume_id).await.unwrap().len(), 1);
    }
}
