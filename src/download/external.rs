//! External download clients: qBittorrent for torrents, SABnzbd for usenet.
//!
//! The core never moves torrent/usenet payload bytes itself; it hands the
//! link to an external client and polls it for size, progress, speed and
//! state on the queue's cadence.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, instrument, warn};

use super::{
    Download, DownloadError, DownloadKind, DownloadMeta, DownloadState, DownloadStatus,
    SharedState,
};
use crate::db::Database;

/// Category tag under which transfers are filed in the external client.
const CLIENT_CATEGORY: &str = "longbox";

/// The kind of transfers an external client handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalClientKind {
    Torrent,
    Usenet,
}

impl ExternalClientKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Torrent => "qBittorrent",
            Self::Usenet => "SABnzbd",
        }
    }

    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "qBittorrent" => Some(Self::Torrent),
            "SABnzbd" => Some(Self::Usenet),
            _ => None,
        }
    }
}

/// A configured external client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalClientConfig {
    pub id: i64,
    pub kind: ExternalClientKind,
    pub title: String,
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_token: Option<String>,
}

impl sqlx::FromRow<'_, SqliteRow> for ExternalClientConfig {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let client_type: String = row.try_get("client_type")?;
        Ok(Self {
            id: row.try_get("id")?,
            kind: ExternalClientKind::from_str_opt(&client_type).ok_or_else(|| {
                sqlx::Error::ColumnDecode {
                    index: "client_type".to_string(),
                    source: format!("unknown client type {client_type}").into(),
                }
            })?,
            title: row.try_get("title")?,
            base_url: row.try_get("base_url")?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            api_token: row.try_get("api_token")?,
        })
    }
}

/// Transfer status as reported by an external client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExternalStatus {
    pub size: i64,
    pub progress: f64,
    pub speed: f64,
    pub state: DownloadState,
}

/// One poll result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExternalPoll {
    /// The client does not list the transfer yet.
    NotFoundYet,
    /// The transfer was removed on the client's side.
    Gone,
    /// Current status.
    Status(ExternalStatus),
}

/// The minimal interface the queue needs from an external client.
#[async_trait]
pub trait ExternalClientApi: Send + Sync + std::fmt::Debug {
    /// Which transfers this client handles.
    fn kind(&self) -> ExternalClientKind;

    /// The configuration row ID.
    fn id(&self) -> i64;

    /// Hands a link to the client. Returns the client's identifier for the
    /// transfer.
    async fn add(
        &self,
        link: &str,
        target_folder: &str,
        name: Option<&str>,
    ) -> Result<String, DownloadError>;

    /// Polls the transfer.
    async fn get_status(&self, external_id: &str) -> Result<ExternalPoll, DownloadError>;

    /// Removes the transfer, optionally deleting its files.
    async fn remove(&self, external_id: &str, delete_files: bool) -> Result<(), DownloadError>;
}

// region qBittorrent

/// qBittorrent over its WebUI API (v4.1+). Authenticates with a session
/// cookie; torrents are identified by magnet info-hash.
#[derive(Debug)]
pub struct QBittorrentClient {
    config: ExternalClientConfig,
    http: reqwest::Client,
    seen: Mutex<HashSet<String>>,
}

impl QBittorrentClient {
    /// Connects and authenticates.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientNotWorking`] when the instance is
    /// unreachable or rejects the credentials.
    #[instrument(skip(config), fields(base_url = %config.base_url))]
    pub async fn connect(config: ExternalClientConfig) -> Result<Self, DownloadError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| DownloadError::client_not_working(e.to_string()))?;

        let client = Self {
            config,
            http,
            seen: Mutex::new(HashSet::new()),
        };
        client.login().await?;
        Ok(client)
    }

    async fn login(&self) -> Result<(), DownloadError> {
        let mut form: Vec<(&str, String)> = Vec::new();
        if let (Some(username), Some(password)) =
            (&self.config.username, &self.config.password)
        {
            form.push(("username", username.clone()));
            form.push(("password", password.clone()));
        }

        let url = format!("{}/api/v2/auth/login", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|_| {
                DownloadError::client_not_working("can't connect; invalid base URL")
            })?;

        match response.status().as_u16() {
            404 => Err(DownloadError::client_not_working(
                "invalid base URL or version too low; at least v4.1",
            )),
            status if status >= 400 => Err(DownloadError::client_not_working(
                "invalid instance; not qBittorrent",
            )),
            _ => Ok(()),
        }
    }

    fn info_hash(link: &str) -> Result<String, DownloadError> {
        link.split("urn:btih:")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .map(str::to_lowercase)
            .ok_or_else(|| {
                DownloadError::client_not_working("magnet link carries no info-hash")
            })
    }
}

#[async_trait]
impl ExternalClientApi for QBittorrentClient {
    fn kind(&self) -> ExternalClientKind {
        ExternalClientKind::Torrent
    }

    fn id(&self) -> i64 {
        self.config.id
    }

    async fn add(
        &self,
        link: &str,
        target_folder: &str,
        name: Option<&str>,
    ) -> Result<String, DownloadError> {
        // Renaming happens through the magnet's dn parameter.
        let link = match name {
            Some(name) => rename_magnet(link, name),
            None => link.to_string(),
        };

        let url = format!("{}/api/v2/torrents/add", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("urls", link.as_str()),
                ("savepath", target_folder),
                ("category", CLIENT_CATEGORY),
            ])
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        if !response.status().is_success() {
            return Err(DownloadError::client_not_working(format!(
                "qBittorrent rejected the torrent: HTTP {}",
                response.status()
            )));
        }

        Self::info_hash(&link)
    }

    async fn get_status(&self, external_id: &str) -> Result<ExternalPoll, DownloadError> {
        let url = format!("{}/api/v2/torrents/properties", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("hash", external_id)])
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        if response.status().as_u16() == 404 {
            let seen = self
                .seen
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .contains(external_id);
            return Ok(if seen {
                ExternalPoll::Gone
            } else {
                ExternalPoll::NotFoundYet
            });
        }

        let properties: Value = response.json().await.map_err(|_| {
            DownloadError::client_not_working("unexpected response from qBittorrent")
        })?;
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(external_id.to_string());

        let total_size = properties
            .get("total_size")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        let pieces_have = properties
            .get("pieces_have")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let completion_date = properties
            .get("completion_date")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        let eta = properties.get("eta").and_then(Value::as_i64).unwrap_or(0);

        let state = if pieces_have <= 0 {
            DownloadState::Queued
        } else if completion_date == -1 {
            DownloadState::Downloading
        } else if eta != 8_640_000 {
            DownloadState::Seeding
        } else {
            DownloadState::Importing
        };

        let downloaded = properties
            .get("total_downloaded")
            .and_then(Value::as_i64)
            .unwrap_or(0)
            - properties
                .get("total_wasted")
                .and_then(Value::as_i64)
                .unwrap_or(0);
        let progress = if total_size > 0 {
            ((downloaded as f64 / total_size as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(ExternalPoll::Status(ExternalStatus {
            size: total_size,
            progress: progress.min(100.0),
            speed: properties
                .get("dl_speed")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            state,
        }))
    }

    async fn remove(&self, external_id: &str, delete_files: bool) -> Result<(), DownloadError> {
        let url = format!("{}/api/v2/torrents/delete", self.config.base_url);
        self.http
            .post(&url)
            .form(&[
                ("hashes", external_id),
                ("deleteFiles", if delete_files { "true" } else { "false" }),
            ])
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        Ok(())
    }
}

/// Replaces (or inserts) the display-name parameter of a magnet link.
fn rename_magnet(link: &str, name: &str) -> String {
    let encoded = urlencoding::encode(name).into_owned();
    if link.contains("&dn=") {
        let mut out = String::with_capacity(link.len());
        let mut parts = link.split("&dn=");
        out.push_str(parts.next().unwrap_or_default());
        for part in parts {
            out.push_str("&dn=");
            out.push_str(&encoded);
            if let Some(rest) = part.find('&') {
                out.push_str(&part[rest..]);
            }
        }
        out
    } else {
        format!("{link}&dn={encoded}")
    }
}

// region SABnzbd

/// SABnzbd over its JSON API. Authentication is an API key query parameter;
/// transfers are identified by `nzo_id`.
#[derive(Debug)]
pub struct SabnzbdClient {
    config: ExternalClientConfig,
    http: reqwest::Client,
    seen: Mutex<HashSet<String>>,
}

impl SabnzbdClient {
    /// Connects and verifies the API key.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientNotWorking`] when the instance is
    /// unreachable or the key is rejected.
    #[instrument(skip(config), fields(base_url = %config.base_url))]
    pub async fn connect(config: ExternalClientConfig) -> Result<Self, DownloadError> {
        let client = Self {
            config,
            http: reqwest::Client::new(),
            seen: Mutex::new(HashSet::new()),
        };

        let version: Value = client.api(&[("mode", "version")]).await?;
        if version.get("version").is_none() {
            return Err(DownloadError::client_not_working(
                "invalid instance; not SABnzbd",
            ));
        }
        Ok(client)
    }

    async fn api(&self, params: &[(&str, &str)]) -> Result<Value, DownloadError> {
        let url = format!("{}/api", self.config.base_url);
        let mut query: Vec<(&str, &str)> = vec![
            ("output", "json"),
            ("apikey", self.config.api_token.as_deref().unwrap_or_default()),
        ];
        query.extend_from_slice(params);

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|_| DownloadError::client_not_working("can't connect; invalid base URL"))?;
        if !response.status().is_success() {
            return Err(DownloadError::client_not_working(format!(
                "SABnzbd returned HTTP {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|_| DownloadError::client_not_working("unexpected response from SABnzbd"))?;
        if body.get("error").is_some() {
            return Err(DownloadError::client_not_working(format!(
                "SABnzbd error: {}",
                body.get("error").and_then(Value::as_str).unwrap_or("?")
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl ExternalClientApi for SabnzbdClient {
    fn kind(&self) -> ExternalClientKind {
        ExternalClientKind::Usenet
    }

    fn id(&self) -> i64 {
        self.config.id
    }

    async fn add(
        &self,
        link: &str,
        _target_folder: &str,
        name: Option<&str>,
    ) -> Result<String, DownloadError> {
        let mut params = vec![
            ("mode", "addurl"),
            ("name", link),
            ("cat", CLIENT_CATEGORY),
        ];
        if let Some(job_name) = name {
            params.push(("nzbname", job_name));
        }

        let response = self.api(&params).await?;
        response
            .get("nzo_ids")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DownloadError::client_not_working("SABnzbd did not accept the NZB"))
    }

    async fn get_status(&self, external_id: &str) -> Result<ExternalPoll, DownloadError> {
        // The job is either in the queue, in history, or gone.
        let queue = self
            .api(&[("mode", "queue"), ("search", ""), ("nzo_ids", external_id)])
            .await?;
        if let Some(slot) = queue
            .get("queue")
            .and_then(|q| q.get("slots"))
            .and_then(Value::as_array)
            .and_then(|slots| {
                slots
                    .iter()
                    .find(|s| s.get("nzo_id").and_then(Value::as_str) == Some(external_id))
            })
        {
            self.seen
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(external_id.to_string());

            let size_mb = slot
                .get("mb")
                .and_then(Value::as_str)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0);
            let left_mb = slot
                .get("mbleft")
                .and_then(Value::as_str)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0);
            let status = slot.get("status").and_then(Value::as_str).unwrap_or("");

            let state = match status {
                "Queued" | "Paused" => DownloadState::Queued,
                _ => DownloadState::Downloading,
            };
            let progress = if size_mb > 0.0 {
                ((size_mb - left_mb) / size_mb * 10_000.0).round() / 100.0
            } else {
                0.0
            };

            return Ok(ExternalPoll::Status(ExternalStatus {
                size: (size_mb * 1024.0 * 1024.0) as i64,
                progress,
                speed: queue
                    .get("queue")
                    .and_then(|q| q.get("kbpersec"))
                    .and_then(Value::as_str)
                    .and_then(|v| v.parse::<f64>().ok())
                    .map_or(0.0, |kb| kb * 1024.0),
                state,
            }));
        }

        let history = self
            .api(&[("mode", "history"), ("nzo_ids", external_id)])
            .await?;
        if let Some(slot) = history
            .get("history")
            .and_then(|h| h.get("slots"))
            .and_then(Value::as_array)
            .and_then(|slots| {
                slots
                    .iter()
                    .find(|s| s.get("nzo_id").and_then(Value::as_str) == Some(external_id))
            })
        {
            let status = slot.get("status").and_then(Value::as_str).unwrap_or("");
            let size = slot.get("bytes").and_then(Value::as_i64).unwrap_or(-1);
            let state = if status == "Failed" {
                DownloadState::Failed
            } else {
                DownloadState::Importing
            };
            return Ok(ExternalPoll::Status(ExternalStatus {
                size,
                progress: 100.0,
                speed: 0.0,
                state,
            }));
        }

        let seen = self
            .seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(external_id);
        Ok(if seen {
            ExternalPoll::Gone
        } else {
            ExternalPoll::NotFoundYet
        })
    }

    async fn remove(&self, external_id: &str, delete_files: bool) -> Result<(), DownloadError> {
        self.api(&[
            ("mode", "queue"),
            ("name", "delete"),
            ("value", external_id),
            ("del_files", if delete_files { "1" } else { "0" }),
        ])
        .await?;
        Ok(())
    }
}

// region Registry

/// Access to the configured external clients.
#[derive(Debug, Clone)]
pub struct ExternalClients {
    db: Database,
}

impl ExternalClients {
    /// Creates a new registry over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers a client configuration after a connection test.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientNotWorking`] when the test fails and
    /// the database error when persisting does.
    #[instrument(skip(self, config), fields(kind = config.kind.as_str(), base_url = %config.base_url))]
    pub async fn add(&self, config: ExternalClientConfig) -> Result<i64, DownloadError> {
        self.test(&config).await?;

        let id: i64 = sqlx::query(
            r"INSERT INTO external_clients (
                client_type, title, base_url, username, password, api_token
              )
              VALUES (?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(config.kind.as_str())
        .bind(&config.title)
        .bind(&config.base_url)
        .bind(&config.username)
        .bind(&config.password)
        .bind(&config.api_token)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| DownloadError::client_not_working(e.to_string()))?
        .get("id");
        Ok(id)
    }

    /// Tests a configuration by connecting once.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientNotWorking`] describing the failure.
    pub async fn test(&self, config: &ExternalClientConfig) -> Result<(), DownloadError> {
        match config.kind {
            ExternalClientKind::Torrent => {
                QBittorrentClient::connect(config.clone()).await?;
            }
            ExternalClientKind::Usenet => {
                SabnzbdClient::connect(config.clone()).await?;
            }
        }
        Ok(())
    }

    /// Lists all configured clients.
    ///
    /// # Errors
    ///
    /// Returns the database error when the query fails.
    pub async fn list(&self) -> Result<Vec<ExternalClientConfig>, sqlx::Error> {
        sqlx::query_as::<_, ExternalClientConfig>(r"SELECT * FROM external_clients ORDER BY id")
            .fetch_all(self.db.pool())
            .await
    }

    /// Deletes a client configuration.
    ///
    /// # Errors
    ///
    /// Returns the database error when the delete fails.
    pub async fn delete(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(r"DELETE FROM external_clients WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Whether any client of the given kind is configured. The aggregator
    /// skips torrent links entirely when no torrent client exists.
    ///
    /// # Errors
    ///
    /// Returns the database error when the query fails.
    pub async fn any_of_kind(&self, kind: ExternalClientKind) -> Result<bool, sqlx::Error> {
        let count: i64 =
            sqlx::query_scalar(r"SELECT COUNT(*) FROM external_clients WHERE client_type = ?")
                .bind(kind.as_str())
                .fetch_one(self.db.pool())
                .await?;
        Ok(count > 0)
    }

    /// Connects to the first configured client of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientNotWorking`] when none is configured
    /// or the connection fails.
    pub async fn connect_for(
        &self,
        kind: ExternalClientKind,
    ) -> Result<std::sync::Arc<dyn ExternalClientApi>, DownloadError> {
        let configs = self
            .list()
            .await
            .map_err(|e| DownloadError::client_not_working(e.to_string()))?;
        let config = configs
            .into_iter()
            .find(|c| c.kind == kind)
            .ok_or_else(|| {
                DownloadError::client_not_working(format!(
                    "no {} client configured",
                    kind.as_str()
                ))
            })?;

        Ok(match kind {
            ExternalClientKind::Torrent => {
                std::sync::Arc::new(QBittorrentClient::connect(config).await?)
            }
            ExternalClientKind::Usenet => {
                std::sync::Arc::new(SabnzbdClient::connect(config).await?)
            }
        })
    }

    /// Connects to a specific configured client by row ID.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientNotWorking`] when the row is missing
    /// or the connection fails.
    pub async fn connect_by_id(
        &self,
        id: i64,
    ) -> Result<std::sync::Arc<dyn ExternalClientApi>, DownloadError> {
        let config = sqlx::query_as::<_, ExternalClientConfig>(
            r"SELECT * FROM external_clients WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| DownloadError::client_not_working(e.to_string()))?
        .ok_or_else(|| DownloadError::client_not_working(format!("no client with id {id}")))?;

        Ok(match config.kind {
            ExternalClientKind::Torrent => {
                std::sync::Arc::new(QBittorrentClient::connect(config).await?)
            }
            ExternalClientKind::Usenet => {
                std::sync::Arc::new(SabnzbdClient::connect(config).await?)
            }
        })
    }
}

// region External download

/// A download whose transfer is owned by an external client.
#[derive(Debug)]
pub struct ExternalDownload {
    meta: DownloadMeta,
    kind: DownloadKind,
    shared: SharedState,
    client: std::sync::Arc<dyn ExternalClientApi>,
    external_id: Mutex<Option<String>>,
}

impl ExternalDownload {
    /// Creates the download around an already connected client. The target
    /// payload folder is the client's working area under the download
    /// folder.
    #[must_use]
    pub fn new(
        client: std::sync::Arc<dyn ExternalClientApi>,
        kind: DownloadKind,
        meta: DownloadMeta,
        payload_name: &str,
    ) -> Self {
        let payload = meta.download_folder.join(payload_name);
        Self {
            meta,
            kind,
            shared: SharedState::new(-1, vec![payload]),
            client,
            external_id: Mutex::new(None),
        }
    }

}

#[async_trait]
impl Download for ExternalDownload {
    fn meta(&self) -> &DownloadMeta {
        &self.meta
    }

    fn kind(&self) -> DownloadKind {
        self.kind
    }

    fn status(&self) -> DownloadStatus {
        self.shared.status()
    }

    fn state(&self) -> DownloadState {
        self.shared.state()
    }

    fn set_state(&self, state: DownloadState) {
        self.shared.set_state(state);
    }

    fn files(&self) -> Vec<PathBuf> {
        self.shared.files()
    }

    fn set_files(&self, files: Vec<PathBuf>) {
        self.shared.set_files(files);
    }

    /// Hands the link to the external client. The actual transfer is
    /// tracked through [`Download::update_status`] polling.
    async fn run(&self) {
        let folder = self.meta.download_folder.to_string_lossy().to_string();
        match self
            .client
            .add(&self.meta.download_link, &folder, Some(&self.meta.title))
            .await
        {
            Ok(external_id) => {
                debug!(external_id = %external_id, "transfer handed to external client");
                *self
                    .external_id
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(external_id);
                self.shared.set_state(DownloadState::Queued);
            }
            Err(e) => {
                warn!(error = %e, "external client refused the transfer");
                self.shared.set_state(DownloadState::Failed);
            }
        }
    }

    fn stop(&self, state: DownloadState) {
        self.shared.request_stop(state);
    }

    async fn update_status(&self) {
        let Some(external_id) = self.external_id() else {
            return;
        };

        match self.client.get_status(&external_id).await {
            Ok(ExternalPoll::Status(status)) => {
                self.shared.set_size(status.size);
                self.shared.set_progress(status.progress, status.speed);
                if !self.shared.state().is_stopped() {
                    self.shared.set_state(status.state);
                }
            }
            Ok(ExternalPoll::Gone) => {
                if !self.shared.state().is_stopped() {
                    self.shared.set_state(DownloadState::Canceled);
                }
            }
            Ok(ExternalPoll::NotFoundYet) => {}
            Err(e) => {
                warn!(error = %e, "polling external client failed");
            }
        }
    }

    fn external_id(&self) -> Option<String> {
        self.external_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn restore_external_id(&self, external_id: String) {
        *self
            .external_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(external_id);
    }

    fn external_client_id(&self) -> Option<i64> {
        Some(self.client.id())
    }

    async fn remove_from_client(&self, delete_files: bool) {
        if let Some(external_id) = self.external_id() {
            if let Err(e) = self.client.remove(&external_id, delete_files).await {
                warn!(error = %e, "removing transfer from external client failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hash_extraction() {
        let link = "magnet:?xt=urn:btih:ABCDEF0123456789&dn=Name&tr=udp://t";
        assert_eq!(
            QBittorrentClient::info_hash(link).unwrap(),
            "abcdef0123456789"
        );
        assert!(QBittorrentClient::info_hash("magnet:?dn=Name").is_err());
    }

    #[test]
    fn test_rename_magnet_replaces_and_inserts() {
        let link = "magnet:?xt=urn:btih:ABC&dn=Old+Name&tr=udp://t";
        let renamed = rename_magnet(link, "New Name");
        assert!(renamed.contains("&dn=New%20Name"));
        assert!(renamed.contains("&tr=udp://t"));
        assert!(!renamed.contains("Old+Name"));

        let bare = "magnet:?xt=urn:btih:ABC";
        assert!(rename_magnet(bare, "X").ends_with("&dn=X"));
    }

    #[test]
    fn test_client_kind_round_trip() {
        for kind in [ExternalClientKind::Torrent, ExternalClientKind::Usenet] {
            assert_eq!(ExternalClientKind::from_str_opt(kind.as_str()), Some(kind));
        }
    }

    #[tokio::test]
    async fn test_qbittorrent_connect_and_add() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/add"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = QBittorrentClient::connect(ExternalClientConfig {
            id: 1,
            kind: ExternalClientKind::Torrent,
            title: "qb".to_string(),
            base_url: server.uri(),
            username: Some("admin".to_string()),
            password: Some("pass".to_string()),
            api_token: None,
        })
        .await
        .unwrap();

        let id = client
            .add("magnet:?xt=urn:btih:FEED&tr=x", "/downloads", Some("Comic"))
            .await
            .unwrap();
        assert_eq!(id, "feed");
    }

    #[tokio::test]
    async fn test_qbittorrent_status_mapping() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/properties"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total_size": 1000,
                "total_downloaded": 500,
                "total_wasted": 0,
                "pieces_have": 10,
                "completion_date": -1,
                "eta": 120,
                "dl_speed": 2048,
            })))
            .mount(&server)
            .await;

        let client = QBittorrentClient::connect(ExternalClientConfig {
            id: 1,
            kind: ExternalClientKind::Torrent,
            title: "qb".to_string(),
            base_url: server.uri(),
            username: None,
            password: None,
            api_token: None,
        })
        .await
        .unwrap();

        let poll = client.get_status("feed").await.unwrap();
        let ExternalPoll::Status(status) = poll else {
            panic!("expected a status");
        };
        assert_eq!(status.state, DownloadState::Downloading);
        assert!((status.progress - 50.0).abs() < f64::EPSILON);
        assert_eq!(status.size, 1000);
    }

    #[tokio::test]
    async fn test_qbittorrent_gone_only_after_seen() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/properties"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = QBittorrentClient::connect(ExternalClientConfig {
            id: 1,
            kind: ExternalClientKind::Torrent,
            title: "qb".to_string(),
            base_url: server.uri(),
            username: None,
            password: None,
            api_token: None,
        })
        .await
        .unwrap();

        assert_eq!(
            client.get_status("feed").await.unwrap(),
            ExternalPoll::NotFoundYet
        );
    }
}
