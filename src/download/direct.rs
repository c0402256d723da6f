//! Streaming HTTP downloads.
//!
//! One client covers every source that resolves to a plain HTTP payload:
//! aggregator-hosted files, resolved MediaFire/WeTransfer links, MediaFire
//! folder zips and Pixeldrain files. The variants differ only in how the
//! request is built, captured by [`FetchSpec`].

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use super::{
    DOWNLOAD_CHUNK_SIZE, Download, DownloadError, DownloadKind, DownloadMeta, DownloadState,
    DownloadStatus, SharedState, filename,
};
use crate::blocklist::BlocklistReason;
use crate::source::DownloadSource;

/// MediaFire's bulk-download endpoint for folders.
const MEDIAFIRE_FOLDER_URL: &str = "https://www.mediafire.com/api/1.5/file/zip.php";

/// How the payload request is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSpec {
    /// Plain GET of the pure link.
    Get { url: String },
    /// POST to MediaFire's zip endpoint with the folder key.
    MediaFireFolder { folder_key: String },
    /// GET with optional Pixeldrain API-key authentication.
    PixelDrain { url: String, api_key: Option<String> },
}

impl FetchSpec {
    fn url(&self) -> String {
        match self {
            Self::Get { url } | Self::PixelDrain { url, .. } => url.clone(),
            Self::MediaFireFolder { .. } => MEDIAFIRE_FOLDER_URL.to_string(),
        }
    }

    async fn send(&self, client: &reqwest::Client) -> Result<reqwest::Response, DownloadError> {
        let request = match self {
            Self::Get { url } => client.get(url),
            Self::MediaFireFolder { folder_key } => client.post(MEDIAFIRE_FOLDER_URL).form(&[
                ("keys", folder_key.as_str()),
                ("meta_only", "no"),
                ("allow_large_download", "yes"),
                ("response_format", "json"),
            ]),
            Self::PixelDrain { url, api_key } => {
                let mut request = client.get(url);
                if let Some(key) = api_key {
                    use base64::Engine;
                    let token =
                        base64::engine::general_purpose::STANDARD.encode(format!(":{key}"));
                    request = request.header("Authorization", format!("Basic {token}"));
                }
                request
            }
        };

        request
            .send()
            .await
            .map_err(|e| DownloadError::network(self.url(), e))
    }
}

/// A download streamed directly over HTTP.
#[derive(Debug)]
pub struct DirectDownload {
    meta: DownloadMeta,
    kind: DownloadKind,
    shared: SharedState,
    client: reqwest::Client,
    fetch: FetchSpec,
}

impl DirectDownload {
    /// Creates the download: fetches the pure link once to validate it,
    /// learn the payload size, and settle the target filename.
    ///
    /// The preferred filename body (from the naming engine) wins over the
    /// `Content-Disposition` header, which wins over the URL path.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::LimitReached`] for Pixeldrain hotlink
    /// refusals (HTTP 403 on the API host) and
    /// [`DownloadError::LinkBroken`] for everything else that fails.
    #[instrument(skip(client, meta, fetch, preferred_filename_body), fields(link = %meta.pure_link))]
    pub async fn create(
        client: reqwest::Client,
        kind: DownloadKind,
        fetch: FetchSpec,
        meta: DownloadMeta,
        preferred_filename_body: Option<String>,
    ) -> Result<Self, DownloadError> {
        let response = fetch
            .send(&client)
            .await
            .map_err(|_| DownloadError::link_broken(BlocklistReason::LinkBroken))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 403 && matches!(fetch, FetchSpec::PixelDrain { .. }) {
                // Hotlink refusal; the link itself is fine.
                return Err(DownloadError::LimitReached {
                    source: DownloadSource::PixelDrain,
                });
            }
            return Err(DownloadError::link_broken(BlocklistReason::LinkBroken));
        }

        let size = response
            .content_length()
            .map_or(-1, |l| l as i64);
        let content_disposition = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let final_url = response.url().to_string();

        let filename_body = preferred_filename_body
            .filter(|b| !b.is_empty())
            .or_else(|| {
                content_disposition
                    .as_deref()
                    .and_then(filename::filename_body_from_disposition)
            })
            .unwrap_or_else(|| filename::filename_body_from_url(&final_url));

        let extension = filename::extension_from_response(
            content_disposition.as_deref(),
            content_type.as_deref(),
            &final_url,
        );

        let file = filename::build_download_path(&meta.download_folder, &filename_body, &extension);
        let title = filename_body
            .rsplit('/')
            .next()
            .unwrap_or(&filename_body)
            .to_string();

        let meta = DownloadMeta {
            title,
            filename_body,
            ..meta
        };
        debug!(file = %file.display(), size, "direct download created");

        Ok(Self {
            meta,
            kind,
            shared: SharedState::new(size, vec![file]),
            client,
            fetch,
        })
    }

    async fn stream_to_file(&self) -> Result<(), DownloadError> {
        let target = self
            .shared
            .files()
            .into_iter()
            .next()
            .unwrap_or_else(|| self.meta.download_folder.join("download.part"));

        let response = tokio::select! {
            () = self.shared.stop_signal().notified() => return Ok(()),
            response = self.fetch.send(&self.client) => response?,
        };
        if !response.status().is_success() {
            return Err(DownloadError::http_status(
                self.meta.pure_link.clone(),
                response.status().as_u16(),
            ));
        }

        let mut file = tokio::fs::File::create(&target)
            .await
            .map_err(|e| DownloadError::io(target.clone(), e))?;
        let mut stream = response.bytes_stream();

        let total_size = self.shared.status().size;
        let mut downloaded: u64 = 0;
        let mut window: usize = 0;
        let mut window_start = Instant::now();

        loop {
            let chunk = tokio::select! {
                () = self.shared.stop_signal().notified() => break,
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            let bytes = chunk.map_err(|e| DownloadError::network(self.meta.pure_link.clone(), e))?;

            if self.shared.state().is_stopped() {
                break;
            }

            file.write_all(&bytes)
                .await
                .map_err(|e| DownloadError::io(target.clone(), e))?;

            downloaded += bytes.len() as u64;
            window += bytes.len();
            if window >= DOWNLOAD_CHUNK_SIZE {
                let elapsed = window_start.elapsed().as_secs_f64().max(1e-6);
                let speed = (window as f64 / elapsed * 100.0).round() / 100.0;
                let progress = if total_size <= 0 {
                    downloaded as f64
                } else {
                    (downloaded as f64 / total_size as f64 * 10_000.0).round() / 100.0
                };
                self.shared.set_progress(progress, speed);
                window = 0;
                window_start = Instant::now();
            }
        }

        file.flush()
            .await
            .map_err(|e| DownloadError::io(target.clone(), e))?;

        if !self.shared.state().is_stopped() {
            let progress = if total_size <= 0 { downloaded as f64 } else { 100.0 };
            self.shared.set_progress(progress, 0.0);
        }
        Ok(())
    }
}

#[async_trait]
impl Download for DirectDownload {
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

    async fn run(&self) {
        self.shared.set_state(DownloadState::Downloading);
        if let Err(e) = self.stream_to_file().await {
            if !self.shared.state().is_stopped() {
                warn!(error = %e, link = %self.meta.pure_link, "direct download failed");
                self.shared.set_state(DownloadState::Failed);
            }
        }
    }

    fn stop(&self, state: DownloadState) {
        self.shared.request_stop(state);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn meta(download_folder: PathBuf, url: &str) -> DownloadMeta {
        DownloadMeta {
            volume_id: 1,
            issue_id: None,
            covered_issues: None,
            source: DownloadSource::Direct,
            source_name: "GetComics".to_string(),
            web_link: None,
            web_title: None,
            web_sub_title: None,
            download_link: url.to_string(),
            pure_link: url.to_string(),
            filename_body: String::new(),
            title: String::new(),
            download_folder,
        }
    }

    #[tokio::test]
    async fn test_create_reads_size_and_disposition_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "Content-Disposition",
                        r#"attachment; filename="Series Issue 4.cbz""#,
                    )
                    .set_body_bytes(vec![0u8; 128]),
            )
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let url = format!("{}/file", server.uri());
        let download = DirectDownload::create(
            reqwest::Client::new(),
            DownloadKind::Direct,
            FetchSpec::Get { url: url.clone() },
            meta(tmp.path().to_path_buf(), &url),
            None,
        )
        .await
        .unwrap();

        assert_eq!(download.status().size, 128);
        let file = download.files()[0].clone();
        assert!(file.to_string_lossy().ends_with("Series Issue 4.cbz"));
        assert_eq!(download.meta().title, "Series Issue 4");
    }

    #[tokio::test]
    async fn test_create_broken_link_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let url = format!("{}/gone", server.uri());
        let result = DirectDownload::create(
            reqwest::Client::new(),
            DownloadKind::Direct,
            FetchSpec::Get { url: url.clone() },
            meta(tmp.path().to_path_buf(), &url),
            None,
        )
        .await;

        assert!(matches!(
            result,
            Err(DownloadError::LinkBroken {
                reason: BlocklistReason::LinkBroken
            })
        ));
    }

    #[tokio::test]
    async fn test_pixeldrain_403_is_limit_not_broken() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let url = format!("{}/api/file/x", server.uri());
        let result = DirectDownload::create(
            reqwest::Client::new(),
            DownloadKind::PixelDrain,
            FetchSpec::PixelDrain {
                url: url.clone(),
                api_key: None,
            },
            meta(tmp.path().to_path_buf(), &url),
            None,
        )
        .await;

        assert!(matches!(
            result,
            Err(DownloadError::LimitReached {
                source: DownloadSource::PixelDrain
            })
        ));
    }

    #[tokio::test]
    async fn test_run_downloads_payload() {
        let payload = vec![7u8; 4096];
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.cbz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let url = format!("{}/file.cbz", server.uri());
        let download = DirectDownload::create(
            reqwest::Client::new(),
            DownloadKind::Direct,
            FetchSpec::Get { url: url.clone() },
            meta(tmp.path().to_path_buf(), &url),
            Some("Series Issue 4".to_string()),
        )
        .await
        .unwrap();

        download.run().await;

        assert_eq!(download.state(), DownloadState::Downloading);
        let file = download.files()[0].clone();
        assert_eq!(std::fs::read(&file).unwrap(), payload);
        assert!((download.status().progress - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_stop_interrupts_and_keeps_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 1024])
                    .set_delay(std::time::Duration::from_secs(1)),
            )
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let url = format!("{}/slow", server.uri());
        let download = std::sync::Arc::new(
            DirectDownload::create(
                reqwest::Client::new(),
                DownloadKind::Direct,
                FetchSpec::Get { url: url.clone() },
                meta(tmp.path().to_path_buf(), &url),
                Some("slow".to_string()),
            )
            .await
            .unwrap(),
        );

        let runner = {
            let download = download.clone();
            tokio::spawn(async move { download.run().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        download.stop(DownloadState::Canceled);
        runner.await.unwrap();

        assert_eq!(download.state(), DownloadState::Canceled);
    }
}
