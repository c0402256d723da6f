//! Per-source credentials (Mega accounts, Pixeldrain API keys).

use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

use crate::db::Database;

/// Which service a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialSource {
    Mega,
    PixelDrain,
}

impl CredentialSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mega => "mega",
            Self::PixelDrain => "pixeldrain",
        }
    }

    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "mega" => Some(Self::Mega),
            "pixeldrain" => Some(Self::PixelDrain),
            _ => None,
        }
    }
}

/// One stored credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialData {
    pub id: i64,
    pub source: CredentialSource,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
}

impl sqlx::FromRow<'_, SqliteRow> for CredentialData {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let source: String = row.try_get("source")?;
        Ok(Self {
            id: row.try_get("id")?,
            source: CredentialSource::from_str_opt(&source).ok_or_else(|| {
                sqlx::Error::ColumnDecode {
                    index: "source".to_string(),
                    source: format!("unknown credential source {source}").into(),
                }
            })?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password: row.try_get("password")?,
            api_key: row.try_get("api_key")?,
        })
    }
}

/// Store for credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    db: Database,
}

impl Credentials {
    /// Creates a new store over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Adds a credential and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the insert fails.
    #[instrument(skip(self, credential), fields(source = credential.source.as_str()))]
    pub async fn add(&self, credential: &CredentialData) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r"INSERT INTO credentials (source, username, email, password, api_key)
              VALUES (?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(credential.source.as_str())
        .bind(&credential.username)
        .bind(&credential.email)
        .bind(&credential.password)
        .bind(&credential.api_key)
        .fetch_one(self.db.pool())
        .await?;
        Ok(result.get("id"))
    }

    /// All credentials for one service.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the query fails.
    #[instrument(skip(self))]
    pub async fn get_from_source(
        &self,
        source: CredentialSource,
    ) -> Result<Vec<CredentialData>, sqlx::Error> {
        sqlx::query_as::<_, CredentialData>(
            r"SELECT * FROM credentials WHERE source = ? ORDER BY id",
        )
        .bind(source.as_str())
        .fetch_all(self.db.pool())
        .await
    }

    /// Lists all credentials.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the query fails.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<CredentialData>, sqlx::Error> {
        sqlx::query_as::<_, CredentialData>(r"SELECT * FROM credentials ORDER BY id")
            .fetch_all(self.db.pool())
            .await
    }

    /// Deletes a credential.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(r"DELETE FROM credentials WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}
