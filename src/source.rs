//! Download sources and the link-text mapping used on aggregator pages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The service a download link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DownloadSource {
    Mega,
    MediaFire,
    WeTransfer,
    PixelDrain,
    /// Direct download hosted by the aggregator itself.
    Direct,
    Torrent,
    Usenet,
}

/// Substrings of link button text per source, checked in declaration order.
const LINK_TEXT_VERSIONS: [(DownloadSource, &[&str]); 7] = [
    (DownloadSource::Mega, &["mega", "mega link"]),
    (DownloadSource::MediaFire, &["mediafire", "mediafire link"]),
    (
        DownloadSource::WeTransfer,
        &["wetransfer", "we transfer", "wetransfer link", "we transfer link"],
    ),
    (
        DownloadSource::PixelDrain,
        &["pixeldrain", "pixel drain", "pixeldrain link", "pixel drain link"],
    ),
    (
        DownloadSource::Direct,
        &[
            "getcomics",
            "download now",
            "main download",
            "main server",
            "main link",
            "mirror download",
            "mirror server",
            "mirror link",
            "link 1",
            "link 2",
        ],
    ),
    (
        DownloadSource::Torrent,
        &["torrent", "torrent link", "magnet", "magnet link"],
    ),
    (DownloadSource::Usenet, &["usenet", "nzb", "nzb link"]),
];

impl DownloadSource {
    /// Stable name used in the database, settings and summaries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mega => "Mega",
            Self::MediaFire => "MediaFire",
            Self::WeTransfer => "WeTransfer",
            Self::PixelDrain => "Pixeldrain",
            Self::Direct => "GetComics",
            Self::Torrent => "GetComics (torrent)",
            Self::Usenet => "Usenet",
        }
    }

    /// Parses the stable name.
    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        Self::all().into_iter().find(|s| s.as_str() == value)
    }

    /// All sources, in default preference order.
    #[must_use]
    pub fn all() -> [Self; 7] {
        [
            Self::Mega,
            Self::MediaFire,
            Self::WeTransfer,
            Self::PixelDrain,
            Self::Direct,
            Self::Torrent,
            Self::Usenet,
        ]
    }

    /// Maps the visible text of a download button to a source.
    #[must_use]
    pub fn from_link_text(text: &str) -> Option<Self> {
        let text = text.to_lowercase();
        LINK_TEXT_VERSIONS
            .iter()
            .find(|(_, versions)| versions.iter().any(|v| text.contains(v)))
            .map(|(source, _)| *source)
    }

    /// Whether transfers for this source are handed to an external client.
    #[must_use]
    pub fn is_external(self) -> bool {
        matches!(self, Self::Torrent | Self::Usenet)
    }
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for DownloadSource {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_text_mapping() {
        assert_eq!(
            DownloadSource::from_link_text("MEGA Link"),
            Some(DownloadSource::Mega)
        );
        assert_eq!(
            DownloadSource::from_link_text("Main Download"),
            Some(DownloadSource::Direct)
        );
        assert_eq!(
            DownloadSource::from_link_text("Mirror Server"),
            Some(DownloadSource::Direct)
        );
        assert_eq!(
            DownloadSource::from_link_text("Magnet"),
            Some(DownloadSource::Torrent)
        );
        assert_eq!(DownloadSource::from_link_text("Unrelated"), None);
    }

    #[test]
    fn test_name_round_trip() {
        for source in DownloadSource::all() {
            assert_eq!(DownloadSource::from_str_opt(source.as_str()), Some(source));
        }
    }
}
