//! Persisted queue rows: enough to reconstruct a download on restart.

use sqlx::Row;

use crate::db::Database;
use crate::download::Download;
use crate::fingerprint::NumberSpan;

/// One persisted queue row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct QueueRow {
    pub id: i64,
    pub volume_id: i64,
    pub issue_id: Option<i64>,
    pub covered_start: Option<f64>,
    pub covered_end: Option<f64>,
    pub source_kind: String,
    pub source_name: String,
    pub web_link: Option<String>,
    pub web_title: Option<String>,
    pub web_sub_title: Option<String>,
    pub download_link: String,
    pub external_client: Option<i64>,
    pub external_id: Option<String>,
    pub created_at: i64,
}

impl QueueRow {
    /// The covered issues as a span.
    #[must_use]
    pub fn covered_issues(&self) -> Option<NumberSpan<f64>> {
        match (self.covered_start, self.covered_end) {
            (Some(start), Some(end)) if (start - end).abs() > f64::EPSILON => {
                Some(NumberSpan::Range(start, end))
            }
            (Some(start), _) => Some(NumberSpan::Single(start)),
            _ => None,
        }
    }
}

/// Persists a download and returns its queue row ID.
///
/// # Errors
///
/// Returns `sqlx::Error` if the insert fails.
pub async fn insert_row(
    db: &Database,
    download: &dyn Download,
    external_client: Option<i64>,
) -> Result<i64, sqlx::Error> {
    let meta = download.meta();
    let (covered_start, covered_end) = match meta.covered_issues {
        Some(span) => {
            let (a, b) = span.bounds();
            (Some(a), Some(b))
        }
        None => (None, None),
    };

    let id = sqlx::query(
        r"INSERT INTO download_queue (
            volume_id, issue_id, covered_start, covered_end,
            source_kind, source_name,
            web_link, web_title, web_sub_title,
            download_link, external_client, external_id, created_at
          )
          VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
          RETURNING id",
    )
    .bind(meta.volume_id)
    .bind(meta.issue_id)
    .bind(covered_start)
    .bind(covered_end)
    .bind(meta.source.as_str())
    .bind(&meta.source_name)
    .bind(&meta.web_link)
    .bind(&meta.web_title)
    .bind(&meta.web_sub_title)
    .bind(&meta.download_link)
    .bind(external_client)
    .bind(download.external_id())
    .bind(Database::now())
    .fetch_one(db.pool())
    .await?
    .get("id");

    Ok(id)
}

/// Stores the external client's transfer ID once the handoff happened.
///
/// # Errors
///
/// Returns `sqlx::Error` if the update fails.
pub async fn update_external_id(
    db: &Database,
    id: i64,
    external_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(r"UPDATE download_queue SET external_id = ? WHERE id = ?")
        .bind(external_id)
        .bind(id)
        .execute(db.pool())
        .await?;
    Ok(())
}

/// All persisted rows, oldest first.
///
/// # Errors
///
/// Returns `sqlx::Error` if the query fails.
pub async fn all_rows(db: &Database) -> Result<Vec<QueueRow>, sqlx::Error> {
    sqlx::query_as::<_, QueueRow>(r"SELECT * FROM download_queue ORDER BY id")
        .fetch_all(db.pool())
        .await
}

/// Deletes a persisted row.
///
/// # Errors
///
/// Returns `sqlx::Error` if the delete fails.
pub async fn delete_row(db: &Database, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(r"DELETE FROM download_queue WHERE id = ?")
        .bind(id)
        .execute(db.pool())
        .await?;
    Ok(())
}
