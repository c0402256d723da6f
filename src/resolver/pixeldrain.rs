//! Pixeldrain link purification: file and list endpoints, credential
//! probing.

use base64::Engine;

use super::ResolvedLink;
use crate::download::{DownloadError, DownloadKind, FetchSpec};

const PIXELDRAIN_API_URL: &str = "https://pixeldrain.com/api";

/// Maps a Pixeldrain share URL onto the API endpoint for its payload:
/// `/l/` lists become zip downloads, plain IDs become file downloads.
pub(super) fn resolve(url: &str) -> ResolvedLink {
    let id = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();

    if url.contains("/l/") {
        let pure = format!("{PIXELDRAIN_API_URL}/list/{id}/zip");
        ResolvedLink::Stream {
            pure_link: pure.clone(),
            kind: DownloadKind::PixelDrainFolder,
            fetch: FetchSpec::PixelDrain {
                url: pure,
                api_key: None,
            },
        }
    } else {
        let pure = format!("{PIXELDRAIN_API_URL}/file/{id}");
        ResolvedLink::Stream {
            pure_link: pure.clone(),
            kind: DownloadKind::PixelDrain,
            fetch: FetchSpec::PixelDrain {
                url: pure,
                api_key: None,
            },
        }
    }
}

/// Checks whether a Pixeldrain API key authenticates successfully, so the
/// queue can attach it to the transfer.
///
/// # Errors
///
/// Returns [`DownloadError::ClientNotWorking`] when Pixeldrain cannot be
/// reached at all.
pub async fn pixeldrain_key_usable(
    client: &reqwest::Client,
    api_key: &str,
) -> Result<bool, DownloadError> {
    pixeldrain_key_usable_at(client, api_key, PIXELDRAIN_API_URL).await
}

pub(crate) async fn pixeldrain_key_usable_at(
    client: &reqwest::Client,
    api_key: &str,
    api_base: &str,
) -> Result<bool, DownloadError> {
    let token = base64::engine::general_purpose::STANDARD.encode(format!(":{api_key}"));
    let response = client
        .get(format!("{api_base}/user/lists"))
        .header("Authorization", format!("Basic {token}"))
        .send()
        .await
        .map_err(|_| {
            DownloadError::client_not_working(
                "an unexpected error occurred when making contact with Pixeldrain",
            )
        })?;

    Ok(response.status().as_u16() != 401)
}
