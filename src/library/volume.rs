//! Volume and issue entities and their store.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

use super::error::LibraryError;
use crate::db::Database;
use crate::fingerprint::{SpecialVersion, extract_year_from_date};

/// A volume as stored in the library.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeData {
    pub id: i64,
    pub comicvine_id: i64,
    pub title: String,
    pub alt_title: Option<String>,
    pub year: Option<i32>,
    pub publisher: Option<String>,
    pub volume_number: i32,
    pub description: Option<String>,
    pub folder: String,
    pub root_folder: i64,
    pub monitored: bool,
    pub special_version: Option<SpecialVersion>,
    pub special_version_locked: bool,
    pub last_cv_fetch: i64,
}

impl sqlx::FromRow<'_, SqliteRow> for VolumeData {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            comicvine_id: row.try_get("comicvine_id")?,
            title: row.try_get("title")?,
            alt_title: row.try_get("alt_title")?,
            year: row.try_get("year")?,
            publisher: row.try_get("publisher")?,
            volume_number: row.try_get("volume_number")?,
            description: row.try_get("description")?,
            folder: row.try_get("folder")?,
            root_folder: row.try_get("root_folder")?,
            monitored: row.try_get("monitored")?,
            special_version: row
                .try_get::<Option<String>, _>("special_version")?
                .as_deref()
                .and_then(SpecialVersion::from_str_opt),
            special_version_locked: row.try_get("special_version_locked")?,
            last_cv_fetch: row.try_get("last_cv_fetch")?,
        })
    }
}

/// One numbered unit within a volume.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct IssueData {
    pub id: i64,
    pub volume_id: i64,
    pub comicvine_id: i64,
    pub issue_number: String,
    pub calculated_issue_number: f64,
    pub title: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub monitored: bool,
}

/// Fields for registering a new volume.
#[derive(Debug, Clone)]
pub struct NewVolume {
    pub comicvine_id: i64,
    pub title: String,
    pub alt_title: Option<String>,
    pub year: Option<i32>,
    pub publisher: Option<String>,
    pub volume_number: i32,
    pub description: Option<String>,
    pub folder: String,
    pub root_folder: i64,
    pub special_version: Option<SpecialVersion>,
}

/// Fields for registering a new issue of a volume.
#[derive(Debug, Clone)]
pub struct NewIssue {
    pub comicvine_id: i64,
    pub issue_number: String,
    pub calculated_issue_number: f64,
    pub title: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub monitored: bool,
}

/// Lookup from calculated issue number to release year, for all issues of a
/// volume. Calculated numbers come out of the same conversion everywhere, so
/// near-equality is exact enough for membership.
#[derive(Debug, Default, Clone)]
pub struct IssueYearIndex {
    entries: Vec<(f64, Option<i32>)>,
}

impl IssueYearIndex {
    /// Builds the index from a volume's issues.
    #[must_use]
    pub fn from_issues(issues: &[IssueData]) -> Self {
        Self {
            entries: issues
                .iter()
                .map(|i| {
                    (
                        i.calculated_issue_number,
                        extract_year_from_date(i.date.as_deref()),
                    )
                })
                .collect(),
        }
    }

    /// Whether an issue with this calculated number exists.
    #[must_use]
    pub fn contains(&self, number: f64) -> bool {
        self.entries.iter().any(|(n, _)| approx_eq(*n, number))
    }

    /// The release year of the issue with this calculated number.
    #[must_use]
    pub fn year_of(&self, number: Option<f64>) -> Option<i32> {
        let number = number?;
        self.entries
            .iter()
            .find(|(n, _)| approx_eq(*n, number))
            .and_then(|(_, y)| *y)
    }
}

/// Near-equality for calculated issue numbers.
#[must_use]
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Store for volumes and their issues.
#[derive(Debug, Clone)]
pub struct VolumeStore {
    db: Database,
}

impl VolumeStore {
    /// Creates a new store over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers a volume.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the insert fails.
    #[instrument(skip(self, volume), fields(cv_id = volume.comicvine_id, title = %volume.title))]
    pub async fn add(&self, volume: &NewVolume) -> Result<i64, LibraryError> {
        let result = sqlx::query(
            r"INSERT INTO volumes (
                comicvine_id, title, alt_title, year, publisher, volume_number,
                description, folder, root_folder, monitored, special_version,
                special_version_locked, last_cv_fetch
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, 0, 0)
              RETURNING id",
        )
        .bind(volume.comicvine_id)
        .bind(&volume.title)
        .bind(&volume.alt_title)
        .bind(volume.year)
        .bind(&volume.publisher)
        .bind(volume.volume_number)
        .bind(&volume.description)
        .bind(&volume.folder)
        .bind(volume.root_folder)
        .bind(volume.special_version.map(SpecialVersion::as_str))
        .fetch_one(self.db.pool())
        .await?;

        Ok(result.get("id"))
    }

    /// Gets a volume by ID.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::VolumeNotFound`] if no volume exists with the
    /// given ID, [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_data(&self, volume_id: i64) -> Result<VolumeData, LibraryError> {
        sqlx::query_as::<_, VolumeData>(r"SELECT * FROM volumes WHERE id = ?")
            .bind(volume_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(LibraryError::VolumeNotFound(volume_id))
    }

    /// Lists all volumes ordered by title, year and volume number.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<VolumeData>, LibraryError> {
        Ok(sqlx::query_as::<_, VolumeData>(
            r"SELECT * FROM volumes ORDER BY title, year, volume_number",
        )
        .fetch_all(self.db.pool())
        .await?)
    }

    /// Updates the monitored flag of a volume.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::VolumeNotFound`] if no volume exists with the
    /// given ID, [`LibraryError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn set_monitored(&self, volume_id: i64, monitored: bool) -> Result<(), LibraryError> {
        let result = sqlx::query(r"UPDATE volumes SET monitored = ? WHERE id = ?")
            .bind(monitored)
            .bind(volume_id)
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(LibraryError::VolumeNotFound(volume_id));
        }
        Ok(())
    }

    /// Updates the folder of a volume after a move.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::VolumeNotFound`] if no volume exists with the
    /// given ID, [`LibraryError::Database`] if the update fails.
    #[instrument(skip(self), fields(folder = %folder))]
    pub async fn set_folder(&self, volume_id: i64, folder: &str) -> Result<(), LibraryError> {
        let result = sqlx::query(r"UPDATE volumes SET folder = ? WHERE id = ?")
            .bind(folder)
            .bind(volume_id)
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(LibraryError::VolumeNotFound(volume_id));
        }
        Ok(())
    }

    /// Registers an issue of a volume, updating it if the external ID is
    /// already known.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the upsert fails.
    #[instrument(skip(self, issue), fields(cv_id = issue.comicvine_id))]
    pub async fn upsert_issue(&self, volume_id: i64, issue: &NewIssue) -> Result<i64, LibraryError> {
        let result = sqlx::query(
            r"INSERT INTO issues (
                volume_id, comicvine_id, issue_number, calculated_issue_number,
                title, date, description, monitored
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(comicvine_id) DO UPDATE SET
                issue_number = excluded.issue_number,
                calculated_issue_number = excluded.calculated_issue_number,
                title = excluded.title,
                date = excluded.date,
                description = excluded.description
              RETURNING id",
        )
        .bind(volume_id)
        .bind(issue.comicvine_id)
        .bind(&issue.issue_number)
        .bind(issue.calculated_issue_number)
        .bind(&issue.title)
        .bind(&issue.date)
        .bind(&issue.description)
        .bind(issue.monitored)
        .fetch_one(self.db.pool())
        .await?;

        Ok(result.get("id"))
    }

    /// All issues of a volume, ordered by calculated number.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_issues(&self, volume_id: i64) -> Result<Vec<IssueData>, LibraryError> {
        Ok(sqlx::query_as::<_, IssueData>(
            r"SELECT * FROM issues
              WHERE volume_id = ?
              ORDER BY calculated_issue_number",
        )
        .bind(volume_id)
        .fetch_all(self.db.pool())
        .await?)
    }

    /// Gets an issue by ID.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::IssueNotFound`] if no issue exists with the
    /// given ID, [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_issue(&self, issue_id: i64) -> Result<IssueData, LibraryError> {
        sqlx::query_as::<_, IssueData>(r"SELECT * FROM issues WHERE id = ?")
            .bind(issue_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| LibraryError::IssueNotFound(issue_id.to_string()))
    }

    /// Gets the issue of a volume with the given calculated number.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::IssueNotFound`] if the volume has no issue
    /// with that number, [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn issue_by_calc_number(
        &self,
        volume_id: i64,
        calculated_issue_number: f64,
    ) -> Result<IssueData, LibraryError> {
        sqlx::query_as::<_, IssueData>(
            r"SELECT * FROM issues
              WHERE volume_id = ? AND calculated_issue_number BETWEEN ? AND ?",
        )
        .bind(volume_id)
        .bind(calculated_issue_number - 1e-9)
        .bind(calculated_issue_number + 1e-9)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| {
            LibraryError::IssueNotFound(format!("{volume_id}:#{calculated_issue_number}"))
        })
    }

    /// All issues of a volume whose calculated number falls in the inclusive
    /// range.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_issues_in_range(
        &self,
        volume_id: i64,
        start: f64,
        end: f64,
    ) -> Result<Vec<IssueData>, LibraryError> {
        Ok(sqlx::query_as::<_, IssueData>(
            r"SELECT * FROM issues
              WHERE volume_id = ? AND calculated_issue_number BETWEEN ? AND ?
              ORDER BY calculated_issue_number",
        )
        .bind(volume_id)
        .bind(start - 1e-9)
        .bind(end + 1e-9)
        .fetch_all(self.db.pool())
        .await?)
    }

    /// Issues of a volume that are monitored and have no file yet.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_open_issues(&self, volume_id: i64) -> Result<Vec<IssueData>, LibraryError> {
        Ok(sqlx::query_as::<_, IssueData>(
            r"SELECT issues.* FROM issues
              LEFT JOIN issues_files ON issues.id = issues_files.issue_id
              WHERE issues.volume_id = ?
                AND issues.monitored = 1
                AND issues_files.file_id IS NULL
              ORDER BY issues.calculated_issue_number",
        )
        .bind(volume_id)
        .fetch_all(self.db.pool())
        .await?)
    }

    /// The date of the last released issue of a volume.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_last_issue_date(&self, volume_id: i64) -> Result<Option<String>, LibraryError> {
        Ok(sqlx::query_scalar(
            r"SELECT MAX(date) FROM issues WHERE volume_id = ? AND date IS NOT NULL",
        )
        .bind(volume_id)
        .fetch_one(self.db.pool())
        .await?)
    }

    /// The year of the last released issue. Returns `None` when no issue has
    /// a date, leaving the decision to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_ending_year(&self, volume_id: i64) -> Result<Option<i32>, LibraryError> {
        let date = self.get_last_issue_date(volume_id).await?;
        Ok(extract_year_from_date(date.as_deref()))
    }
}
