//! Converting `.torrent` payloads into magnet URIs.

use lava_torrent::torrent::v1::Torrent;

use super::ResolvedLink;
use crate::blocklist::BlocklistReason;
use crate::download::{DownloadError, DownloadKind};

/// Trackers appended to every constructed magnet URI.
const TRACKERS: [&str; 17] = [
    "udp://tracker.cyberia.is:6969/announce",
    "udp://tracker.port443.xyz:6969/announce",
    "http://tracker3.itzmx.com:6961/announce",
    "udp://tracker.moeking.me:6969/announce",
    "http://vps02.net.orel.ru:80/announce",
    "http://tracker.openzim.org:80/announce",
    "udp://tracker.skynetcloud.tk:6969/announce",
    "https://1.tracker.eu.org:443/announce",
    "https://3.tracker.eu.org:443/announce",
    "http://re-tracker.uz:80/announce",
    "https://tracker.parrotsec.org:443/announce",
    "udp://explodie.org:6969/announce",
    "udp://tracker.filemail.com:6969/announce",
    "udp://tracker.nyaa.uk:6969/announce",
    "udp://retracker.netbynet.ru:2710/announce",
    "http://tracker.gbitt.info:80/announce",
    "http://tracker2.dler.org:80/announce",
];

/// Builds a magnet URI for an info-hash with the fixed tracker list.
#[must_use]
pub(super) fn magnet_from_info_hash(info_hash: &str) -> String {
    let mut magnet = format!("magnet:?xt=urn:btih:{info_hash}");
    for tracker in TRACKERS {
        magnet.push_str("&tr=");
        magnet.push_str(tracker);
    }
    magnet
}

/// Resolves a response carrying a `.torrent` payload into a magnet link.
///
/// # Errors
///
/// Returns [`DownloadError::LinkBroken`] when the payload is not a valid
/// torrent file.
pub(super) async fn resolve(response: reqwest::Response) -> Result<ResolvedLink, DownloadError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|_| DownloadError::link_broken(BlocklistReason::LinkBroken))?;

    let torrent = Torrent::read_from_bytes(&bytes)
        .map_err(|_| DownloadError::link_broken(BlocklistReason::LinkBroken))?;
    let info_hash = torrent.info_hash();

    Ok(ResolvedLink::External {
        pure_link: magnet_from_info_hash(&info_hash),
        kind: DownloadKind::Torrent,
    })
}
