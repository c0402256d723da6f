//! Renaming library files on disk to the configured naming scheme.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, instrument};

use super::{TemplateError, generate_issue_name};
use crate::fingerprint::{NumberSpan, file_extension, is_image_file};
use crate::library::fsops::{delete_empty_child_folders, rename_file};
use crate::library::{FilesStore, LibraryError, VolumeStore};
use crate::settings::Settings;

/// Errors from a mass rename.
#[derive(Error, Debug)]
pub enum RenameError {
    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("naming template error: {0}")]
    Template(#[from] TemplateError),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

/// Renames the files of a volume to their proper names under the volume
/// folder. With `filepath_filter`, only the listed files are considered.
/// Returns the new paths of the files that were actually renamed.
///
/// General (cover/metadata) files keep their basename but are pulled into
/// the volume folder root; image files linked to an issue land in a
/// subfolder named after the issue.
///
/// # Errors
///
/// Returns [`RenameError`] when store access, template rendering or the
/// filesystem move fails.
#[instrument(skip(volumes, files, settings, filepath_filter))]
pub async fn mass_rename(
    volumes: &VolumeStore,
    files: &FilesStore,
    settings: &Settings,
    volume_id: i64,
    filepath_filter: Option<&[String]>,
) -> Result<Vec<String>, RenameError> {
    let volume = volumes.get_data(volume_id).await?;
    let volume_folder = PathBuf::from(&volume.folder);

    let mut renamed = Vec::new();
    for file in files.files_for_volume(volume_id).await? {
        if let Some(filter) = filepath_filter {
            if !filter.contains(&file.filepath) {
                continue;
            }
        }

        let issue_ids = files.issues_for_file(file.id).await?;

        let target: PathBuf = if issue_ids.is_empty() {
            // General file: keep the name, normalize the location.
            let basename = Path::new(&file.filepath)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.filepath.clone());
            volume_folder.join(basename)
        } else {
            let mut covered_issues = Vec::with_capacity(issue_ids.len());
            for issue_id in &issue_ids {
                covered_issues.push(volumes.get_issue(*issue_id).await?);
            }
            covered_issues.sort_by(|a, b| {
                a.calculated_issue_number
                    .total_cmp(&b.calculated_issue_number)
            });

            let first = covered_issues[0].calculated_issue_number;
            let last = covered_issues[covered_issues.len() - 1].calculated_issue_number;
            let covered = if covered_issues.len() == 1 {
                NumberSpan::Single(first)
            } else {
                NumberSpan::Range(first, last)
            };

            let body = generate_issue_name(&volume, Some(covered), &covered_issues, settings)?;

            if is_image_file(&file.filepath) {
                // Pages keep their own name inside the issue's folder.
                let basename = Path::new(&file.filepath)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| file.filepath.clone());
                volume_folder.join(body).join(basename)
            } else {
                let extension = file_extension(&file.filepath)
                    .map(|e| format!(".{e}"))
                    .unwrap_or_default();
                volume_folder.join(format!("{body}{extension}"))
            }
        };

        let target_str = target.to_string_lossy().to_string();
        if target_str == file.filepath {
            continue;
        }

        info!(from = %file.filepath, to = %target_str, "renaming library file");
        rename_file(Path::new(&file.filepath), &target)?;
        files.update_filepath(&file.filepath, &target_str).await?;
        renamed.push(target_str);
    }

    delete_empty_child_folders(&volume_folder);
    Ok(renamed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::library::{NewIssue, NewVolume};

    async fn setup() -> (VolumeStore, FilesStore, tempfile::TempDir, i64, i64) {
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
                special_version: None,
            })
            .await
            .unwrap();
        let issue_id = volumes
            .upsert_issue(
                volume_id,
                &NewIssue {
                    comicvine_id: 10,
                    issue_number: "4".to_string(),
                    calculated_issue_number: 4.0,
                    title: None,
                    date: None,
                    description: None,
                    monitored: true,
                },
            )
            .await
            .unwrap();

        (volumes, files, tmp, volume_id, issue_id)
    }

    #[tokio::test]
    async fn test_mass_rename_moves_file_and_updates_row() {
        let (volumes, files, _tmp, volume_id, issue_id) = setup().await;
        let volume = volumes.get_data(volume_id).await.unwrap();

        let source = Path::new(&volume.folder).join("pg 4.cbz");
        std::fs::write(&source, b"x").unwrap();
        let file_id = files
            .add_file(&source.to_string_lossy(), 1)
            .await
            .unwrap();
        files.link_issue(file_id, issue_id).await.unwrap();

        let renamed = mass_rename(&volumes, &files, &Settings::default(), volume_id, None)
            .await
            .unwrap();
        assert_eq!(renamed.len(), 1);
        assert!(renamed[0].ends_with("Paper Girls (2015) Volume 01 Issue 004.cbz"));
        assert!(Path::new(&renamed[0]).exists());
        assert!(!source.exists());

        // Row follows the file.
        assert!(files.get_by_path(&renamed[0]).await.unwrap().is_some());

        // A second run is a no-op.
        let renamed_again = mass_rename(&volumes, &files, &Settings::default(), volume_id, None)
            .await
            .unwrap();
        assert!(renamed_again.is_empty());
    }

    #[tokio::test]
    async fn test_mass_rename_respects_filter() {
        let (volumes, files, _tmp, volume_id, issue_id) = setup().await;
        let volume = volumes.get_data(volume_id).await.unwrap();

        let source = Path::new(&volume.folder).join("pg 4.cbz");
        std::fs::write(&source, b"x").unwrap();
        let file_id = files.add_file(&source.to_string_lossy(), 1).await.unwrap();
        files.link_issue(file_id, issue_id).await.unwrap();

        let renamed = mass_rename(
            &volumes,
            &files,
            &Settings::default(),
            volume_id,
            Some(&["/elsewhere/other.cbz".to_string()]),
        )
        .await
        .unwrap();
        assert!(renamed.is_empty());
        assert!(source.exists());
    }
}
