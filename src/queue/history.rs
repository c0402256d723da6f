//! Download history: what was fetched, from where, for which issue.

use tracing::instrument;

use crate::db::Database;
use crate::download::Download;

/// One history record.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct HistoryEntry {
    pub id: i64,
    pub web_link: Option<String>,
    pub web_title: Option<String>,
    pub web_sub_title: Option<String>,
    pub file_title: Option<String>,
    pub volume_id: Option<i64>,
    pub issue_id: Option<i64>,
    pub source: Option<String>,
    pub downloaded_at: i64,
}

/// Records a download in history.
///
/// # Errors
///
/// Returns `sqlx::Error` if the insert fails.
#[instrument(skip(db, download), fields(title = %download.meta().title))]
pub async fn add_entry(db: &Database, download: &dyn Download) -> Result<(), sqlx::Error> {
    let meta = download.meta();
    sqlx::query(
        r"INSERT INTO download_history (
            web_link, web_title, web_sub_title, file_title,
            volume_id, issue_id, source, downloaded_at
          )
          VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&meta.web_link)
    .bind(&meta.web_title)
    .bind(&meta.web_sub_title)
    .bind(&meta.title)
    .bind(meta.volume_id)
    .bind(meta.issue_id)
    .bind(meta.source.as_str())
    .bind(Database::now())
    .execute(db.pool())
    .await?;
    Ok(())
}

/// History of one volume, newest first.
///
/// # Errors
///
/// Returns `sqlx::Error` if the query fails.
pub async fn for_volume(db: &Database, volume_id: i64) -> Result<Vec<HistoryEntry>, sqlx::Error> {
    sqlx::query_as::<_, HistoryEntry>(
        r"SELECT * FROM download_history
          WHERE volume_id = ?
          ORDER BY downloaded_at DESC",
    )
    .bind(volume_id)
    .fetch_all(db.pool())
    .await
}

/// All history, newest first, paged.
///
/// # Errors
///
/// Returns `sqlx::Error` if the query fails.
pub async fn list(db: &Database, offset: i64, limit: i64) -> Result<Vec<HistoryEntry>, sqlx::Error> {
    sqlx::query_as::<_, HistoryEntry>(
        r"SELECT * FROM download_history
          ORDER BY downloaded_at DESC
          LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(db.pool())
    .await
}

/// Empties the history.
///
/// # Errors
///
/// Returns `sqlx::Error` if the delete fails.
pub async fn clear(db: &Database) -> Result<(), sqlx::Error> {
    sqlx::query(r"DELETE FROM download_history")
        .execute(db.pool())
        .await?;
    Ok(())
}
