//! Validated settings the core consumes.
//!
//! Settings live in a JSON file next to the database. Every mutation goes
//! through [`SettingsService::update`], which validates the whole document
//! before persisting: naming templates are rendered against mock data,
//! the service preference must be a permutation of the supported sources,
//! and format preferences must name registered converter targets.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::conversion;
use crate::naming;
use crate::source::DownloadSource;

/// What to do with a torrent that finished downloading but still seeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedingHandling {
    /// Let the torrent finish seeding, then move the files.
    Complete,
    /// Copy the files into the library while seeding continues.
    Copy,
}

/// Settings validation and IO errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("invalid naming template {key}: {0}", key = .0.key())]
    Template(#[from] naming::TemplateError),

    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Work area for in-flight downloads; must sit outside all root folders.
    pub download_folder: String,

    /// Order in which sources of a download group are tried.
    pub service_preference: Vec<DownloadSource>,

    /// Ordered target formats for conversion.
    pub format_preference: Vec<String>,

    /// Rename files to the configured naming scheme after download.
    pub rename_downloaded_files: bool,

    /// Template for volume folders, relative to the root folder.
    pub volume_folder_naming: String,
    /// Template for issue files.
    pub file_naming: String,
    /// Template for empty issue slots.
    pub file_naming_empty: String,
    /// Template for TPB/one-shot/hard-cover files.
    pub file_naming_special_version: String,
    /// Template for volume-as-issue files.
    pub file_naming_vai: String,

    /// Zero-pad width for volume numbers (1-3).
    pub volume_padding: u8,
    /// Zero-pad width for issue numbers (1-4).
    pub issue_padding: u8,

    /// Render special versions in full (`One-Shot`) instead of short (`OS`).
    pub long_special_version: bool,

    /// Convert files to the preferred format after download.
    pub convert: bool,
    /// Extract archives whose contents are individual issues.
    pub extract_issue_ranges: bool,

    /// Torrent seeding strategy.
    pub seeding_handling: SeedingHandling,
    /// Delete the original torrent payload once seeding completes (copy
    /// strategy only).
    pub delete_completed_torrents: bool,

    /// Base URL of the release aggregator.
    pub aggregator_base_url: String,

    /// Base URL of the challenge-solver service, when one is deployed.
    pub flaresolverr_base_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_folder: "downloads".to_string(),
            service_preference: DownloadSource::all().to_vec(),
            format_preference: Vec::new(),
            rename_downloaded_files: true,
            volume_folder_naming: "{series_name}/Volume {volume_number} ({year})".to_string(),
            file_naming: "{series_name} ({year}) Volume {volume_number} Issue {issue_number}"
                .to_string(),
            file_naming_empty: "{series_name} ({year}) Volume {volume_number} Issue {issue_number}"
                .to_string(),
            file_naming_special_version: "{series_name} ({year}) Volume {volume_number} {special_version}"
                .to_string(),
            file_naming_vai: "{series_name} ({year}) Volume {issue_number}".to_string(),
            volume_padding: 2,
            issue_padding: 3,
            long_special_version: false,
            convert: false,
            extract_issue_ranges: false,
            seeding_handling: SeedingHandling::Copy,
            delete_completed_torrents: true,
            aggregator_base_url: "https://getcomics.org".to_string(),
            flaresolverr_base_url: None,
        }
    }
}

impl Settings {
    /// Validates the whole document.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::InvalidValue`] or
    /// [`SettingsError::Template`] describing the first offending key.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(1..=3).contains(&self.volume_padding) {
            return Err(SettingsError::InvalidValue {
                key: "volume_padding",
                reason: format!("{} is outside 1-3", self.volume_padding),
            });
        }
        if !(1..=4).contains(&self.issue_padding) {
            return Err(SettingsError::InvalidValue {
                key: "issue_padding",
                reason: format!("{} is outside 1-4", self.issue_padding),
            });
        }

        let mut expected: Vec<DownloadSource> = DownloadSource::all().to_vec();
        let mut given = self.service_preference.clone();
        expected.sort();
        given.sort();
        if expected != given {
            return Err(SettingsError::InvalidValue {
                key: "service_preference",
                reason: "must be a permutation of all supported sources".to_string(),
            });
        }

        let targets = conversion::available_target_formats();
        for format in &self.format_preference {
            if !targets.contains(&format.as_str()) {
                return Err(SettingsError::InvalidValue {
                    key: "format_preference",
                    reason: format!("{format} is not a registered converter target"),
                });
            }
        }

        naming::validate_templates(self)?;
        Ok(())
    }

    /// Preference rank of a source; unlisted sources sort last.
    #[must_use]
    pub fn service_rank(&self, source: DownloadSource) -> usize {
        self.service_preference
            .iter()
            .position(|s| *s == source)
            .unwrap_or(usize::MAX)
    }
}

/// Checks the download folder against the filesystem and the registered
/// root folders: it must exist and must not contain or sit inside any of
/// them.
///
/// # Errors
///
/// Returns [`SettingsError::InvalidValue`] naming `download_folder`.
pub async fn validate_download_folder(
    settings: &Settings,
    root_folders: &crate::library::RootFolders,
) -> Result<(), SettingsError> {
    use crate::library::folder_is_inside_folder;

    if !Path::new(&settings.download_folder).is_dir() {
        return Err(SettingsError::InvalidValue {
            key: "download_folder",
            reason: format!("{} does not exist", settings.download_folder),
        });
    }

    let roots = root_folders
        .list()
        .await
        .map_err(|e| SettingsError::InvalidValue {
            key: "download_folder",
            reason: format!("could not check root folders: {e}"),
        })?;
    for root in roots {
        if folder_is_inside_folder(&root.folder, &settings.download_folder)
            || folder_is_inside_folder(&settings.download_folder, &root.folder)
        {
            return Err(SettingsError::InvalidValue {
                key: "download_folder",
                reason: format!("overlaps root folder {}", root.folder),
            });
        }
    }
    Ok(())
}

/// Process-scoped settings service: loads once, hands out snapshots, and
/// persists validated updates.
#[derive(Debug, Clone)]
pub struct SettingsService {
    path: PathBuf,
    inner: Arc<RwLock<Settings>>,
}

impl SettingsService {
    /// Loads settings from `path`, falling back to defaults when the file
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Io`]/[`SettingsError::Parse`] for an
    /// unreadable or malformed file, and validation errors for a readable
    /// but invalid one.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let settings = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let settings: Settings = serde_json::from_str(&raw)?;
            settings.validate()?;
            settings
        } else {
            info!("no settings file yet; starting with defaults");
            Settings::default()
        };

        Ok(Self {
            path,
            inner: Arc::new(RwLock::new(settings)),
        })
    }

    /// An in-memory service for tests.
    #[must_use]
    pub fn ephemeral(settings: Settings) -> Self {
        Self {
            path: PathBuf::new(),
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// A snapshot of the current settings.
    ///
    /// # Panics
    ///
    /// Panics if the settings lock was poisoned.
    #[must_use]
    pub fn get(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(|e| panic!("settings lock poisoned: {e}"))
            .clone()
    }

    /// Applies a mutation, validates the result, and persists it.
    ///
    /// # Errors
    ///
    /// Returns validation errors without changing the stored settings, or
    /// [`SettingsError::Io`] when persisting fails.
    pub fn update(&self, mutate: impl FnOnce(&mut Settings)) -> Result<Settings, SettingsError> {
        let mut candidate = self.get();
        mutate(&mut candidate);
        candidate.validate()?;

        if !self.path.as_os_str().is_empty() {
            let raw = serde_json::to_string_pretty(&candidate)?;
            fs::write(&self.path, raw)?;
        }

        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|e| panic!("settings lock poisoned: {e}"));
        *guard = candidate.clone();
        Ok(candidate)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_padding_bounds() {
        let mut settings = Settings::default();
        settings.volume_padding = 4;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue {
                key: "volume_padding",
                ..
            })
        ));
    }

    #[test]
    fn test_service_preference_must_be_permutation() {
        let mut settings = Settings::default();
        settings.service_preference.pop();
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue {
                key: "service_preference",
                ..
            })
        ));
    }

    #[test]
    fn test_format_preference_must_be_registered() {
        let mut settings = Settings::default();
        settings.format_preference = vec!["cbz".to_string()];
        settings.validate().unwrap();

        settings.format_preference = vec!["docx".to_string()];
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue {
                key: "format_preference",
                ..
            })
        ));
    }

    #[test]
    fn test_update_round_trips_through_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");

        let service = SettingsService::load(&path).unwrap();
        service
            .update(|s| s.issue_padding = 4)
            .unwrap();

        let reloaded = SettingsService::load(&path).unwrap();
        assert_eq!(reloaded.get().issue_padding, 4);
    }

    #[test]
    fn test_update_rejects_invalid_without_applying() {
        let service = SettingsService::ephemeral(Settings::default());
        let result = service.update(|s| s.issue_padding = 9);
        assert!(result.is_err());
        assert_eq!(service.get().issue_padding, 3);
    }

    #[test]
    fn test_service_rank_follows_preference() {
        let settings = Settings::default();
        assert_eq!(settings.service_rank(DownloadSource::Mega), 0);
        assert!(
            settings.service_rank(DownloadSource::Torrent)
                > settings.service_rank(DownloadSource::Direct)
        );
    }
}
