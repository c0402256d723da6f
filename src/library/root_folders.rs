//! Root folders: the base directories the library lives under.

use sqlx::Row;
use tracing::instrument;

use super::error::LibraryError;
use crate::db::Database;

/// A registered root folder.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RootFolder {
    pub id: i64,
    pub folder: String,
}

/// Appends a trailing `/` if the path doesn't end in one, so prefix checks
/// can't match partial component names.
#[must_use]
pub fn force_suffix(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Whether `folder` equals or sits inside `base_folder`.
#[must_use]
pub fn folder_is_inside_folder(base_folder: &str, folder: &str) -> bool {
    force_suffix(folder).starts_with(&force_suffix(base_folder))
}

/// Store for root folders.
#[derive(Debug, Clone)]
pub struct RootFolders {
    db: Database,
}

impl RootFolders {
    /// Creates a new store over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers a root folder. The folder must exist on disk and must not
    /// overlap an already registered root folder.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::InvalidFolder`] for a missing or overlapping
    /// folder, [`LibraryError::Database`] if the insert fails.
    #[instrument(skip(self), fields(folder = %folder))]
    pub async fn add(&self, folder: &str) -> Result<i64, LibraryError> {
        if !std::path::Path::new(folder).is_dir() {
            return Err(LibraryError::InvalidFolder(
                folder.to_string(),
                "folder does not exist".to_string(),
            ));
        }

        for existing in self.list().await? {
            if folder_is_inside_folder(&existing.folder, folder)
                || folder_is_inside_folder(folder, &existing.folder)
            {
                return Err(LibraryError::InvalidFolder(
                    folder.to_string(),
                    format!("overlaps root folder {}", existing.folder),
                ));
            }
        }

        let result = sqlx::query(r"INSERT INTO root_folders (folder) VALUES (?) RETURNING id")
            .bind(folder)
            .fetch_one(self.db.pool())
            .await?;
        Ok(result.get("id"))
    }

    /// Lists all root folders.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<RootFolder>, LibraryError> {
        Ok(
            sqlx::query_as::<_, RootFolder>(r"SELECT * FROM root_folders ORDER BY id")
                .fetch_all(self.db.pool())
                .await?,
        )
    }

    /// Gets a root folder by ID.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::RootFolderNotFound`] if no folder exists with
    /// the given ID, [`LibraryError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<RootFolder, LibraryError> {
        sqlx::query_as::<_, RootFolder>(r"SELECT * FROM root_folders WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(LibraryError::RootFolderNotFound(id))
    }

    /// Deletes a root folder, refusing while volumes still use it.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::RootFolderInUse`] when volumes reference the
    /// folder, [`LibraryError::RootFolderNotFound`] for an unknown ID,
    /// [`LibraryError::Database`] if a query fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<(), LibraryError> {
        let in_use: i64 = sqlx::query_scalar(r"SELECT COUNT(*) FROM volumes WHERE root_folder = ?")
            .bind(id)
            .fetch_one(self.db.pool())
            .await?;
        if in_use > 0 {
            return Err(LibraryError::RootFolderInUse(id, in_use));
        }

        let result = sqlx::query(r"DELETE FROM root_folders WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(LibraryError::RootFolderNotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_containment() {
        assert!(folder_is_inside_folder("/library", "/library/Series"));
        assert!(folder_is_inside_folder("/library", "/library"));
        assert!(!folder_is_inside_folder("/library", "/library2"));
        assert!(!folder_is_inside_folder("/library/Series", "/library"));
    }

    #[tokio::test]
    async fn test_add_rejects_overlapping_roots() {
        let db = Database::new_in_memory().await.unwrap();
        let store = RootFolders::new(db);
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_string_lossy().to_string();

        store.add(&root).await.unwrap();
        let nested = tmp.path().join("inner");
        std::fs::create_dir(&nested).unwrap();
        let result = store.add(&nested.to_string_lossy()).await;
        assert!(matches!(result, Err(LibraryError::InvalidFolder(_, _))));
    }

    #[tokio::test]
    async fn test_delete_refuses_in_use() {
        let db = Database::new_in_memory().await.unwrap();
        let store = RootFolders::new(db.clone());
        let tmp = tempfile::tempdir().unwrap();
        let id = store.add(&tmp.path().to_string_lossy()).await.unwrap();

        sqlx::query(
            r"INSERT INTO volumes (comicvine_id, title, volume_number, folder, root_folder)
              VALUES (1, 'Series', 1, ?, ?)",
        )
        .bind(tmp.path().join("Series").to_string_lossy().to_string())
        .bind(id)
        .execute(db.pool())
        .await
        .unwrap();

        assert!(matches!(
            store.delete(id).await,
            Err(LibraryError::RootFolderInUse(_, 1))
        ));
    }
}
