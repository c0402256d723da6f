//! WeTransfer link purification through the transfers API.

use serde_json::{Value, json};

use super::ResolvedLink;
use crate::blocklist::BlocklistReason;
use crate::download::{DownloadError, DownloadKind, FetchSpec};

const TRANSFER_API: &str = "https://wetransfer.com/api/v4/transfers";

/// Resolves a WeTransfer share URL into its direct link.
///
/// The last two path segments are the transfer ID and security hash; the
/// API returns a `direct_link` for the whole transfer.
///
/// # Errors
///
/// Returns [`DownloadError::LinkBroken`] for malformed URLs and API
/// refusals.
pub(super) async fn resolve(
    client: &reqwest::Client,
    url: &str,
) -> Result<ResolvedLink, DownloadError> {
    resolve_with_api(client, url, TRANSFER_API).await
}

pub(super) async fn resolve_with_api(
    client: &reqwest::Client,
    url: &str,
    api_base: &str,
) -> Result<ResolvedLink, DownloadError> {
    let mut segments: Vec<&str> = url
        .trim_end_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let security_hash = segments
        .pop()
        .ok_or_else(|| DownloadError::link_broken(BlocklistReason::LinkBroken))?;
    let transfer_id = segments
        .pop()
        .ok_or_else(|| DownloadError::link_broken(BlocklistReason::LinkBroken))?;

    let response = client
        .post(format!("{api_base}/{transfer_id}/download"))
        .json(&json!({
            "intent": "entire_transfer",
            "security_hash": security_hash,
        }))
        .header("x-requested-with", "XMLHttpRequest")
        .send()
        .await
        .map_err(|_| DownloadError::link_broken(BlocklistReason::LinkBroken))?;
    if !response.status().is_success() {
        return Err(DownloadError::link_broken(BlocklistReason::LinkBroken));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|_| DownloadError::link_broken(BlocklistReason::LinkBroken))?;
    let direct_link = body
        .get("direct_link")
        .and_then(Value::as_str)
        .ok_or_else(|| DownloadError::link_broken(BlocklistReason::LinkBroken))?
        .to_string();

    Ok(ResolvedLink::Stream {
        pure_link: direct_link.clone(),
        kind: DownloadKind::WeTransfer,
        fetch: FetchSpec::Get { url: direct_link },
    })
}
