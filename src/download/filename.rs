//! Deriving safe download filenames from headers, URLs and the naming
//! engine.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use fancy_regex::Regex as FancyRegex;

/// A 2-4 character extension trailing a dot or slash inside the joined
/// header/URL haystack.
static FILE_EXTENSION: LazyLock<FancyRegex> = LazyLock::new(|| {
    FancyRegex::new(r#"(?i)(?<=\.|\/)[\w\d]{2,4}(?=$|;|\s|\")"#)
        .unwrap_or_else(|e| panic!("invalid extension pattern: {e}"))
});

/// The filename inside a `Content-Disposition` header, plain or RFC 5987.
static DISPOSITION_FILENAME: LazyLock<FancyRegex> = LazyLock::new(|| {
    FancyRegex::new(r#"(?i)filename(?:=\"|\*=UTF-8\'\')(.*?)\.[a-z]{2,4}\"?$"#)
        .unwrap_or_else(|e| panic!("invalid disposition pattern: {e}"))
});

fn unquote_plus(value: &str) -> String {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .unwrap_or(spaced)
}

/// Extracts the filename body (no extension) from a `Content-Disposition`
/// header.
#[must_use]
pub fn filename_body_from_disposition(content_disposition: &str) -> Option<String> {
    let caps = DISPOSITION_FILENAME
        .captures(content_disposition)
        .ok()
        .flatten()?;
    Some(unquote_plus(caps.get(1)?.as_str()))
}

/// Extracts a filename body from the last path segment of a URL.
#[must_use]
pub fn filename_body_from_url(url: &str) -> String {
    let last = url
        .split('/')
        .next_back()
        .unwrap_or(url)
        .split('?')
        .next()
        .unwrap_or_default();
    let decoded = unquote_plus(last);
    match decoded.rfind('.') {
        Some(dot) if dot > 0 => decoded[..dot].to_string(),
        _ => decoded,
    }
}

/// Sniffs the file extension (with dot) from the response headers and URL,
/// in that order of trust.
#[must_use]
pub fn extension_from_response(
    content_disposition: Option<&str>,
    content_type: Option<&str>,
    url: &str,
) -> String {
    let haystack = format!(
        "{} {} {}",
        content_disposition.unwrap_or_default(),
        content_type.unwrap_or_default(),
        url
    );
    FILE_EXTENSION
        .find(&haystack)
        .ok()
        .flatten()
        .map(|m| format!(".{}", m.as_str()))
        .unwrap_or_default()
}

/// Builds the full target path in the download folder: the body with path
/// separators flattened to `_`, plus the extension.
#[must_use]
pub fn build_download_path(download_folder: &Path, filename_body: &str, extension: &str) -> PathBuf {
    let flat = filename_body
        .split('/')
        .collect::<Vec<_>>()
        .join("_");
    download_folder.join(format!("{flat}{extension}"))
}
