//! The blocklist: links that are known broken or unsupported.
//!
//! Uniqueness is on the download link when one is present, else on the web
//! link; adding a known link again is a no-op that returns the original
//! entry.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{info, instrument};

use crate::db::Database;
use crate::source::DownloadSource;

/// Why a link was blocklisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlocklistReason {
    LinkBroken,
    SourceNotSupported,
    NoWorkingLinks,
    AddedByUser,
}

impl BlocklistReason {
    /// Stable numeric ID used in the database.
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::LinkBroken => 1,
            Self::SourceNotSupported => 2,
            Self::NoWorkingLinks => 3,
            Self::AddedByUser => 4,
        }
    }

    /// Parses the stable numeric ID.
    #[must_use]
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::LinkBroken),
            2 => Some(Self::SourceNotSupported),
            3 => Some(Self::NoWorkingLinks),
            4 => Some(Self::AddedByUser),
            _ => None,
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::LinkBroken => "Link broken",
            Self::SourceNotSupported => "Source not supported",
            Self::NoWorkingLinks => "No supported or working links",
            Self::AddedByUser => "Added by user",
        }
    }
}

/// One blocklisted link.
#[derive(Debug, Clone, PartialEq)]
pub struct BlocklistEntry {
    pub id: i64,
    pub volume_id: Option<i64>,
    pub issue_id: Option<i64>,
    pub web_link: Option<String>,
    pub web_title: Option<String>,
    pub web_sub_title: Option<String>,
    pub download_link: Option<String>,
    pub source: Option<DownloadSource>,
    pub reason: BlocklistReason,
    pub added_at: i64,
}

impl sqlx::FromRow<'_, SqliteRow> for BlocklistEntry {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            volume_id: row.try_get("volume_id")?,
            issue_id: row.try_get("issue_id")?,
            web_link: row.try_get("web_link")?,
            web_title: row.try_get("web_title")?,
            web_sub_title: row.try_get("web_sub_title")?,
            download_link: row.try_get("download_link")?,
            source: row
                .try_get::<Option<String>, _>("source")?
                .as_deref()
                .and_then(DownloadSource::from_str_opt),
            reason: BlocklistReason::from_id(row.try_get("reason")?)
                .unwrap_or(BlocklistReason::AddedByUser),
            added_at: row.try_get("added_at")?,
        })
    }
}

/// Fields for a new blocklist entry.
#[derive(Debug, Clone, Default)]
pub struct NewBlocklistEntry {
    pub volume_id: Option<i64>,
    pub issue_id: Option<i64>,
    pub web_link: Option<String>,
    pub web_title: Option<String>,
    pub web_sub_title: Option<String>,
    pub download_link: Option<String>,
    pub source: Option<DownloadSource>,
}

/// Store for blocklist entries.
#[derive(Debug, Clone)]
pub struct Blocklist {
    db: Database,
}

impl Blocklist {
    /// Creates a new store over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Adds an entry, returning the existing one when the link is already
    /// blocklisted.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if a query fails.
    #[instrument(skip(self, entry), fields(link = entry.download_link.as_deref().or(entry.web_link.as_deref()).unwrap_or("")))]
    pub async fn add(
        &self,
        entry: NewBlocklistEntry,
        reason: BlocklistReason,
    ) -> Result<BlocklistEntry, sqlx::Error> {
        let identity = entry
            .download_link
            .as_deref()
            .or(entry.web_link.as_deref())
            .unwrap_or_default()
            .to_string();
        if let Some(existing) = self.find_by_link(&identity).await? {
            return Ok(existing);
        }

        info!(reason = reason.description(), "adding link to blocklist");
        let id: i64 = sqlx::query(
            r"INSERT INTO blocklist (
                volume_id, issue_id, web_link, web_title, web_sub_title,
                download_link, source, reason, added_at
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(entry.volume_id)
        .bind(entry.issue_id)
        .bind(&entry.web_link)
        .bind(&entry.web_title)
        .bind(&entry.web_sub_title)
        .bind(&entry.download_link)
        .bind(entry.source.map(DownloadSource::as_str))
        .bind(reason.id())
        .bind(Database::now())
        .fetch_one(self.db.pool())
        .await?
        .get("id");

        self.get(id).await.map(|e| {
            e.unwrap_or(BlocklistEntry {
                id,
                volume_id: entry.volume_id,
                issue_id: entry.issue_id,
                web_link: entry.web_link,
                web_title: entry.web_title,
                web_sub_title: entry.web_sub_title,
                download_link: entry.download_link,
                source: entry.source,
                reason,
                added_at: Database::now(),
            })
        })
    }

    /// Looks up an entry by download link or web link.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the query fails.
    #[instrument(skip(self), fields(link = %link))]
    pub async fn find_by_link(&self, link: &str) -> Result<Option<BlocklistEntry>, sqlx::Error> {
        sqlx::query_as::<_, BlocklistEntry>(
            r"SELECT * FROM blocklist
              WHERE download_link = ?
                 OR (download_link IS NULL AND web_link = ?)",
        )
        .bind(link)
        .bind(link)
        .fetch_optional(self.db.pool())
        .await
    }

    /// Whether the link is blocklisted.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the query fails.
    pub async fn contains(&self, link: &str) -> Result<bool, sqlx::Error> {
        Ok(self.find_by_link(link).await?.is_some())
    }

    /// Gets an entry by ID.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<BlocklistEntry>, sqlx::Error> {
        sqlx::query_as::<_, BlocklistEntry>(r"SELECT * FROM blocklist WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
    }

    /// Lists entries, newest first, paged.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the query fails.
    #[instrument(skip(self))]
    pub async fn list(&self, offset: i64, limit: i64) -> Result<Vec<BlocklistEntry>, sqlx::Error> {
        sqlx::query_as::<_, BlocklistEntry>(
            r"SELECT * FROM blocklist ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await
    }

    /// Deletes one entry.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(r"DELETE FROM blocklist WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Empties the blocklist.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the delete fails.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), sqlx::Error> {
        sqlx::query(r"DELETE FROM blocklist")
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}
