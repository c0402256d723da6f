//! Converting files between formats and extracting archives into issues.
//!
//! # Overview
//!
//! - [`converter_for`] / [`available_target_formats`] - the converter
//!   registry the settings validate against
//! - [`mass_convert`] - converts a volume's files to the preferred format
//! - [`archive_contains_issues`] - whether an archive packs issue files
//!   (as opposed to being one issue itself)
//! - [`extract_files_from_folder`] - pulls the relevant files out of a
//!   downloaded folder into the volume folder
//! - [`extract_issue_ranges`] - unpacks archives that cover issue ranges

mod converters;

pub use converters::{CONVERTERS, FileConverter, converter_for, extract_archive, list_archive};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::fingerprint::{
    CONTAINER_EXTENSIONS, ExtractOptions, extract_filename_data, file_extension, is_image_file,
    is_scannable_file,
};
use crate::library::fsops::{delete_file_folder, list_files, rename_file};
use crate::library::{FilesStore, LibraryError, VolumeStore, scan_files};
use crate::matching::folder_extraction_filter;
use crate::settings::Settings;

/// Work folder name for in-place archive extraction.
const ARCHIVE_EXTRACT_FOLDER: &str = ".archive_extract";

/// All formats some converter can produce.
#[must_use]
pub fn available_target_formats() -> BTreeSet<&'static str> {
    CONVERTERS.iter().map(|c| c.target_format).collect()
}

/// Whether an archive contains full issues, or is a single issue itself.
///
/// # Errors
///
/// Returns an IO error when the archive cannot be read.
pub fn archive_contains_issues(archive_file: &Path) -> std::io::Result<bool> {
    let names = list_archive(archive_file)?;
    Ok(names.iter().any(|name| {
        file_extension(name).is_some_and(|e| CONTAINER_EXTENSIONS.contains(&e.as_str()))
    }))
}

/// Moves the files relevant to the volume out of `source_folder` into the
/// volume folder; everything else is deleted together with the folder.
/// Returns the new paths.
///
/// # Errors
///
/// Returns [`LibraryError`] when store access or the folder walk fails.
#[instrument(skip(volumes), fields(folder = %source_folder.display()))]
pub async fn extract_files_from_folder(
    volumes: &VolumeStore,
    volume_id: i64,
    source_folder: &Path,
) -> Result<Vec<PathBuf>, LibraryError> {
    let volume = volumes.get_data(volume_id).await?;
    let issues = volumes.get_issues(volume_id).await?;
    let end_year = volumes.get_ending_year(volume_id).await?.or(volume.year);

    let contents = list_files(source_folder, &|name| is_scannable_file(name))?;

    let mut relevant = Vec::new();
    for path in contents {
        let path_str = path.to_string_lossy().to_string();
        if path_str.to_lowercase().contains("variant cover") {
            continue;
        }
        let fingerprint = extract_filename_data(
            &path_str,
            ExtractOptions {
                assume_volume_number: false,
                ..ExtractOptions::default()
            },
        );
        if folder_extraction_filter(&fingerprint, &volume, &issues, end_year) {
            relevant.push(path);
        } else {
            debug!(file = %path.display(), "not relevant for volume");
        }
    }

    let volume_folder = PathBuf::from(&volume.folder);
    let mut moved = Vec::with_capacity(relevant.len());
    for path in relevant {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let dest = if is_image_file(&basename) {
            // Pages keep their issue folder.
            let parent = path
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            volume_folder.join(parent).join(basename)
        } else {
            volume_folder.join(basename)
        };

        rename_file(&path, &dest)?;
        moved.push(dest);
    }

    delete_file_folder(source_folder);
    Ok(moved)
}

/// Unpacks archives that cover a range of issues into their individual
/// files, when the archive actually contains issue files. Returns the new
/// paths.
///
/// # Errors
///
/// Returns [`LibraryError`] when store access or extraction fails.
#[instrument(skip(volumes, files))]
pub async fn extract_issue_ranges(
    volumes: &VolumeStore,
    files: &FilesStore,
    volume_id: i64,
    filepath_filter: Option<&[String]>,
) -> Result<Vec<PathBuf>, LibraryError> {
    let volume = volumes.get_data(volume_id).await?;
    let mut result = Vec::new();

    for file in files.files_for_volume(volume_id).await? {
        if let Some(filter) = filepath_filter {
            if !filter.contains(&file.filepath) {
                continue;
            }
        }
        // Only archives covering more than one issue are candidates.
        if files.issues_for_file(file.id).await?.len() < 2 {
            continue;
        }
        let path = PathBuf::from(&file.filepath);
        let extension = file_extension(&file.filepath).unwrap_or_default();
        if !matches!(extension.as_str(), "zip" | "cbz" | "rar" | "cbr") {
            continue;
        }
        if !archive_contains_issues(&path).unwrap_or(false) {
            // The archive IS one issue; keep it as is.
            continue;
        }

        info!(file = %file.filepath, "extracting issue-range archive");
        let work_folder = PathBuf::from(&volume.folder).join(ARCHIVE_EXTRACT_FOLDER);
        let extract_path = path.clone();
        let extract_dest = work_folder.clone();
        tokio::task::spawn_blocking(move || extract_archive(&extract_path, &extract_dest))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))??;

        let extracted = extract_files_from_folder(volumes, volume_id, &work_folder).await?;
        if extracted.is_empty() {
            continue;
        }

        delete_file_folder(&path);
        files.clear_links_for_paths(&[file.filepath.clone()]).await?;
        files.gc().await?;
        result.extend(extracted);
    }

    if !result.is_empty() {
        let new_paths: Vec<String> = result
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        scan_files(volumes, files, volume_id, Some(&new_paths)).await?;
    }
    Ok(result)
}

/// Converts the files of a volume (optionally restricted to one issue or a
/// path filter) to the first matching format preference. Returns the new
/// paths of the converted files.
///
/// # Errors
///
/// Returns [`LibraryError`] when store access fails; individual conversion
/// failures are logged and skipped.
#[instrument(skip(volumes, files, settings, filepath_filter))]
pub async fn mass_convert(
    volumes: &VolumeStore,
    files: &FilesStore,
    settings: &Settings,
    volume_id: i64,
    issue_id: Option<i64>,
    filepath_filter: Option<&[String]>,
) -> Result<Vec<PathBuf>, LibraryError> {
    let candidates = match issue_id {
        Some(issue_id) => files.files_for_issue(issue_id).await?,
        None => files.files_for_volume(volume_id).await?,
    };

    let mut converted = Vec::new();
    for file in candidates {
        if let Some(filter) = filepath_filter {
            if !filter.contains(&file.filepath) {
                continue;
            }
        }

        let Some(source_format) = file_extension(&file.filepath) else {
            continue;
        };
        let Some(converter) = settings.format_preference.iter().find_map(|target| {
            if *target == source_format {
                // Already in a preferred format.
                return None;
            }
            converter_for(&source_format, target)
        }) else {
            continue;
        };
        if settings
            .format_preference
            .iter()
            .position(|f| *f == source_format)
            .is_some_and(|current| {
                settings
                    .format_preference
                    .iter()
                    .position(|f| *f == converter.target_format)
                    .is_some_and(|target| target > current)
            })
        {
            // The file already sits higher in the preference list.
            continue;
        }

        let path = PathBuf::from(&file.filepath);
        let convert_result =
            tokio::task::spawn_blocking(move || converter.convert(&path)).await;
        match convert_result {
            Ok(Ok(new_path)) => {
                files
                    .update_filepath(&file.filepath, &new_path.to_string_lossy())
                    .await?;
                converted.push(new_path);
            }
            Ok(Err(e)) => warn!(file = %file.filepath, error = %e, "conversion failed"),
            Err(e) => warn!(file = %file.filepath, error = %e, "conversion task failed"),
        }
    }

    Ok(converted)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::library::{NewIssue, NewVolume};
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(name.to_string(), options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    async fn setup() -> (VolumeStore, FilesStore, tempfile::TempDir, i64) {
        let db = Database::new_in_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        sqlx::query("INSERT INTO root_folders (folder) VALUES (?)")
            .bind(tmp.path().to_string_lossy().to_string())
            .execute(db.pool())
            .await
            .unwrap();

        let volumes = VolumeStore::new(db.clone());
        let files = FilesStore::new(db);

        let folder = tmp.path().join("Spawn/Volume 01 (1992)");
        std::fs::create_dir_all(&folder).unwrap();
        let volume_id = volumes
            .add(&NewVolume {
                comicvine_id: 1,
                title: "Spawn".to_string(),
                alt_title: None,
                year: Some(1992),
                publisher: None,
                volume_number: 1,
                description: None,
                folder: folder.to_string_lossy().to_string(),
                root_folder: 1,
                special_version: None,
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
                        date: Some("1992-06-01".to_string()),
                        description: None,
                        monitored: true,
                    },
                )
                .await
                .unwrap();
        }
        (volumes, files, tmp, volume_id)
    }

    #[test]
    fn test_available_target_formats() {
        let targets = available_target_formats();
        assert!(targets.contains("cbz"));
        assert!(targets.contains("zip"));
        assert!(!targets.contains("pdf"));
    }

    #[test]
    fn test_archive_contains_issues() {
        let tmp = tempfile::tempdir().unwrap();

        let pages = tmp.path().join("one-issue.zip");
        write_zip(&pages, &[("p1.jpg", b"x"), ("p2.jpg", b"x")]);
        assert!(!archive_contains_issues(&pages).unwrap());

        let issues = tmp.path().join("many-issues.zip");
        write_zip(&issues, &[("Spawn 1.cbz", b"x"), ("Spawn 2.cbz", b"x")]);
        assert!(archive_contains_issues(&issues).unwrap());
    }

    #[tokio::test]
    async fn test_extract_files_from_folder_filters_and_moves() {
        let (volumes, _files, tmp, volume_id) = setup().await;
        let volume = volumes.get_data(volume_id).await.unwrap();

        let payload = tmp.path().join("payload");
        std::fs::create_dir_all(&payload).unwrap();
        std::fs::write(payload.join("Spawn (1992) Issue 3.cbz"), b"x").unwrap();
        std::fs::write(payload.join("Other Series 9.cbz"), b"x").unwrap();

        let moved = extract_files_from_folder(&volumes, volume_id, &payload)
            .await
            .unwrap();

        assert_eq!(moved.len(), 1);
        assert!(moved[0].starts_with(&volume.folder));
        assert!(!payload.exists());
    }

    #[tokio::test]
    async fn test_mass_convert_follows_preference() {
        let (volumes, files, _tmp, volume_id) = setup().await;
        let volume = volumes.get_data(volume_id).await.unwrap();
        let issue = volumes.issue_by_calc_number(volume_id, 1.0).await.unwrap();

        let source = Path::new(&volume.folder).join("Spawn (1992) Issue 1.zip");
        write_zip(&source, &[("p1.jpg", b"x")]);
        let file_id = files
            .add_file(&source.to_string_lossy(), 1)
            .await
            .unwrap();
        files.link_issue(file_id, issue.id).await.unwrap();

        let mut settings = Settings::default();
        settings.format_preference = vec!["cbz".to_string()];

        let converted = mass_convert(&volumes, &files, &settings, volume_id, None, None)
            .await
            .unwrap();
        assert_eq!(converted.len(), 1);
        assert!(converted[0].to_string_lossy().ends_with(".cbz"));
        assert!(!source.exists());
        assert!(files
            .get_by_path(&converted[0].to_string_lossy())
            .await
            .unwrap()
            .is_some());
    }
}
