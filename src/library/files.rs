//! File rows and their links to issues and volumes.

use sqlx::Row;
use tracing::instrument;

use super::error::LibraryError;
use crate::db::Database;

/// A media or metadata file known to the library.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FileData {
    pub id: i64,
    pub filepath: String,
    pub size: i64,
}

/// Kind of a general (volume-level) file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralFileType {
    Cover,
    Metadata,
}

impl GeneralFileType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cover => "cover",
            Self::Metadata => "metadata",
        }
    }
}

/// Store for file rows and the `issues_files` / `volume_files` link tables.
///
/// All mutation paths funnel orphan cleanup through [`FilesStore::gc`], so a
/// file row without any link never survives a scan.
#[derive(Debug, Clone)]
pub struct FilesStore {
    db: Database,
}

impl FilesStore {
    /// Creates a new store over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Adds a file row, or updates its size if the path is already known.
    /// Returns the row ID.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the upsert fails.
    #[instrument(skip(self), fields(filepath = %filepath))]
    pub async fn add_file(&self, filepath: &str, size: i64) -> Result<i64, LibraryError> {
        let result = sqlx::query(
            r"INSERT INTO files (filepath, size)
              VALUES (?, ?)
              ON CONFLICT(filepath) DO UPDATE SET size = excluded.size
              RETURNING id",
        )
        .bind(filepath)
        .bind(size)
        .fetch_one(self.db.pool())
        .await?;

        Ok(result.get("id"))
    }

    /// Gets a file row by path.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self), fields(filepath = %filepath))]
    pub async fn get_by_path(&self, filepath: &str) -> Result<Option<FileData>, LibraryError> {
        Ok(
            sqlx::query_as::<_, FileData>(r"SELECT * FROM files WHERE filepath = ?")
                .bind(filepath)
                .fetch_optional(self.db.pool())
                .await?,
        )
    }

    /// Updates the path of a file row after a rename.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the update fails.
    #[instrument(skip(self), fields(old = %old_path, new = %new_path))]
    pub async fn update_filepath(&self, old_path: &str, new_path: &str) -> Result<(), LibraryError> {
        sqlx::query(r"UPDATE files SET filepath = ? WHERE filepath = ?")
            .bind(new_path)
            .bind(old_path)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Links a file to an issue.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the insert fails.
    #[instrument(skip(self))]
    pub async fn link_issue(&self, file_id: i64, issue_id: i64) -> Result<(), LibraryError> {
        sqlx::query(
            r"INSERT OR IGNORE INTO issues_files (file_id, issue_id)
              VALUES (?, ?)",
        )
        .bind(file_id)
        .bind(issue_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Links a general (cover/metadata) file to a volume.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the insert fails.
    #[instrument(skip(self))]
    pub async fn link_volume_file(
        &self,
        file_id: i64,
        volume_id: i64,
        file_type: GeneralFileType,
    ) -> Result<(), LibraryError> {
        sqlx::query(
            r"INSERT OR REPLACE INTO volume_files (file_id, volume_id, file_type)
              VALUES (?, ?, ?)",
        )
        .bind(file_id)
        .bind(volume_id)
        .bind(file_type.as_str())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Files linked to any issue of the volume, plus its general files.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn files_for_volume(&self, volume_id: i64) -> Result<Vec<FileData>, LibraryError> {
        Ok(sqlx::query_as::<_, FileData>(
            r"SELECT DISTINCT files.* FROM files
              LEFT JOIN issues_files ON files.id = issues_files.file_id
              LEFT JOIN issues ON issues_files.issue_id = issues.id
              LEFT JOIN volume_files ON files.id = volume_files.file_id
              WHERE issues.volume_id = ? OR volume_files.volume_id = ?
              ORDER BY files.filepath",
        )
        .bind(volume_id)
        .bind(volume_id)
        .fetch_all(self.db.pool())
        .await?)
    }

    /// Files linked to one issue.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn files_for_issue(&self, issue_id: i64) -> Result<Vec<FileData>, LibraryError> {
        Ok(sqlx::query_as::<_, FileData>(
            r"SELECT files.* FROM files
              INNER JOIN issues_files ON files.id = issues_files.file_id
              WHERE issues_files.issue_id = ?
              ORDER BY files.filepath",
        )
        .bind(issue_id)
        .fetch_all(self.db.pool())
        .await?)
    }

    /// Issue IDs a file is linked to.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn issues_for_file(&self, file_id: i64) -> Result<Vec<i64>, LibraryError> {
        Ok(sqlx::query_scalar(
            r"SELECT issue_id FROM issues_files WHERE file_id = ? ORDER BY issue_id",
        )
        .bind(file_id)
        .fetch_all(self.db.pool())
        .await?)
    }

    /// Removes all issue and volume links of the given file paths. Used when
    /// a scan reconsiders a specific set of files.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if a delete fails.
    #[instrument(skip(self, filepaths), fields(count = filepaths.len()))]
    pub async fn clear_links_for_paths(&self, filepaths: &[String]) -> Result<(), LibraryError> {
        for path in filepaths {
            sqlx::query(
                r"DELETE FROM issues_files
                  WHERE file_id IN (SELECT id FROM files WHERE filepath = ?)",
            )
            .bind(path)
            .execute(self.db.pool())
            .await?;
            sqlx::query(
                r"DELETE FROM volume_files
                  WHERE file_id IN (SELECT id FROM files WHERE filepath = ?)",
            )
            .bind(path)
            .execute(self.db.pool())
            .await?;
        }
        Ok(())
    }

    /// Deletes a file row and its links.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if a delete fails.
    #[instrument(skip(self))]
    pub async fn delete_file(&self, file_id: i64) -> Result<(), LibraryError> {
        sqlx::query(r"DELETE FROM issues_files WHERE file_id = ?")
            .bind(file_id)
            .execute(self.db.pool())
            .await?;
        sqlx::query(r"DELETE FROM volume_files WHERE file_id = ?")
            .bind(file_id)
            .execute(self.db.pool())
            .await?;
        sqlx::query(r"DELETE FROM files WHERE id = ?")
            .bind(file_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Deletes file rows that are linked to neither an issue nor a volume.
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn gc(&self) -> Result<u64, LibraryError> {
        let result = sqlx::query(
            r"DELETE FROM files
              WHERE id NOT IN (SELECT file_id FROM issues_files)
                AND id NOT IN (SELECT file_id FROM volume_files)",
        )
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn seeded() -> (FilesStore, i64) {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query("INSERT INTO root_folders (folder) VALUES ('/library')")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query(
            r"INSERT INTO volumes (
                comicvine_id, title, volume_number, folder, root_folder
              ) VALUES (1, 'Series', 1, '/library/Series', 1)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            r"INSERT INTO issues (
                volume_id, comicvine_id, issue_number, calculated_issue_number, monitored
              ) VALUES (1, 10, '1', 1.0, 1)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        (FilesStore::new(db), 1)
    }

    #[tokio::test]
    async fn test_add_file_is_idempotent_on_path() {
        let (store, _) = seeded().await;
        let a = store.add_file("/library/Series/1.cbz", 10).await.unwrap();
        let b = store.add_file("/library/Series/1.cbz", 20).await.unwrap();
        assert_eq!(a, b);

        let data = store
            .get_by_path("/library/Series/1.cbz")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data.size, 20);
    }

    #[tokio::test]
    async fn test_link_and_query_issue_files() {
        let (store, issue_id) = seeded().await;
        let file_id = store.add_file("/library/Series/1.cbz", 10).await.unwrap();
        store.link_issue(file_id, issue_id).await.unwrap();
        store.link_issue(file_id, issue_id).await.unwrap();

        assert_eq!(store.files_for_issue(issue_id).await.unwrap().len(), 1);
        assert_eq!(store.issues_for_file(file_id).await.unwrap(), vec![issue_id]);
        assert_eq!(store.files_for_volume(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gc_removes_orphans_only() {
        let (store, issue_id) = seeded().await;
        let linked = store.add_file("/library/Series/1.cbz", 10).await.unwrap();
        store.link_issue(linked, issue_id).await.unwrap();
        let cover = store.add_file("/library/Series/cover.jpg", 5).await.unwrap();
        store
            .link_volume_file(cover, 1, GeneralFileType::Cover)
            .await
            .unwrap();
        store.add_file("/library/Series/orphan.cbz", 1).await.unwrap();

        assert_eq!(store.gc().await.unwrap(), 1);
        assert!(store
            .get_by_path("/library/Series/orphan.cbz")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_by_path("/library/Series/cover.jpg")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_clear_links_then_gc_drops_file() {
        let (store, issue_id) = seeded().await;
        let file_id = store.add_file("/library/Series/1.cbz", 10).await.unwrap();
        store.link_issue(file_id, issue_id).await.unwrap();

        store
            .clear_links_for_paths(&["/library/Series/1.cbz".to_string()])
            .await
            .unwrap();
        assert_eq!(store.gc().await.unwrap(), 1);
    }
}
