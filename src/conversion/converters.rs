//! Concrete format converters.
//!
//! The comic containers come in two families: zip-based (`zip`/`cbz`) and
//! rar-based (`rar`/`cbr`). Conversions inside a family are renames;
//! conversions across families re-pack the extracted pages.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::instrument;

/// A registered conversion from one format to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileConverter {
    pub source_format: &'static str,
    pub target_format: &'static str,
    kind: ConverterKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConverterKind {
    /// Same container, different extension.
    Rename,
    /// Unpack a rar archive and re-pack it as zip.
    RarToZip,
}

/// Every converter the system knows.
pub const CONVERTERS: [FileConverter; 6] = [
    FileConverter {
        source_format: "zip",
        target_format: "cbz",
        kind: ConverterKind::Rename,
    },
    FileConverter {
        source_format: "cbz",
        target_format: "zip",
        kind: ConverterKind::Rename,
    },
    FileConverter {
        source_format: "rar",
        target_format: "cbr",
        kind: ConverterKind::Rename,
    },
    FileConverter {
        source_format: "cbr",
        target_format: "rar",
        kind: ConverterKind::Rename,
    },
    FileConverter {
        source_format: "rar",
        target_format: "cbz",
        kind: ConverterKind::RarToZip,
    },
    FileConverter {
        source_format: "cbr",
        target_format: "cbz",
        kind: ConverterKind::RarToZip,
    },
];

/// The converter from `source_format` to `target_format`, if registered.
#[must_use]
pub fn converter_for(source_format: &str, target_format: &str) -> Option<FileConverter> {
    CONVERTERS
        .iter()
        .find(|c| c.source_format == source_format && c.target_format == target_format)
        .copied()
}

impl FileConverter {
    /// Converts `source` in place, returning the new path.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the conversion fails; the source file is
    /// left untouched in that case.
    #[instrument(skip(self, source), fields(source = %source.display(), target = self.target_format))]
    pub fn convert(&self, source: &Path) -> std::io::Result<PathBuf> {
        let target = source.with_extension(self.target_format);
        match self.kind {
            ConverterKind::Rename => {
                fs::rename(source, &target)?;
                Ok(target)
            }
            ConverterKind::RarToZip => {
                let staging = source.with_extension("unpack");
                fs::create_dir_all(&staging)?;

                let result = unpack_rar_then_zip(source, &staging, &target);
                let _ = fs::remove_dir_all(&staging);
                match result {
                    Ok(()) => {
                        fs::remove_file(source)?;
                        Ok(target)
                    }
                    Err(e) => {
                        let _ = fs::remove_file(&target);
                        Err(e)
                    }
                }
            }
        }
    }
}

fn unpack_rar_then_zip(source: &Path, staging: &Path, target: &Path) -> std::io::Result<()> {
    extract_rar(source, staging)?;

    let file = fs::File::create(target)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .large_file(true);

    let mut entries: Vec<PathBuf> = Vec::new();
    let mut stack = vec![staging.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                entries.push(path);
            }
        }
    }
    entries.sort();

    for path in entries {
        let name = path
            .strip_prefix(staging)
            .map_err(|_| std::io::Error::other("entry escaped staging folder"))?
            .to_string_lossy()
            .to_string();
        zip.start_file(name, options).map_err(std::io::Error::other)?;
        let mut source_file = fs::File::open(&path)?;
        std::io::copy(&mut source_file, &mut zip)?;
    }
    zip.finish().map_err(std::io::Error::other)?;
    Ok(())
}

/// Lists the entry names of a zip or rar archive.
///
/// # Errors
///
/// Returns an IO error for unreadable or unsupported archives.
pub fn list_archive(path: &Path) -> std::io::Result<Vec<String>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "zip" | "cbz" => {
            let file = fs::File::open(path)?;
            let archive = zip::ZipArchive::new(file).map_err(std::io::Error::other)?;
            Ok(archive.file_names().map(str::to_string).collect())
        }
        "rar" | "cbr" => {
            let archive = unrar::Archive::new(path)
                .open_for_listing()
                .map_err(std::io::Error::other)?;
            let mut names = Vec::new();
            for entry in archive {
                let entry = entry.map_err(std::io::Error::other)?;
                names.push(entry.filename.to_string_lossy().to_string());
            }
            Ok(names)
        }
        _ => Err(std::io::Error::other("not an archive")),
    }
}

/// Extracts a zip or rar archive into `dest`.
///
/// # Errors
///
/// Returns an IO error for unreadable or unsupported archives.
pub fn extract_archive(path: &Path, dest: &Path) -> std::io::Result<()> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    fs::create_dir_all(dest)?;

    match extension.as_str() {
        "zip" | "cbz" => {
            let file = fs::File::open(path)?;
            let mut archive = zip::ZipArchive::new(file).map_err(std::io::Error::other)?;
            archive.extract(dest).map_err(std::io::Error::other)
        }
        "rar" | "cbr" => extract_rar(path, dest),
        _ => Err(std::io::Error::other("not an archive")),
    }
}

fn extract_rar(path: &Path, dest: &Path) -> std::io::Result<()> {
    let mut archive = unrar::Archive::new(path)
        .open_for_processing()
        .map_err(std::io::Error::other)?;
    while let Some(header) = archive.read_header().map_err(std::io::Error::other)? {
        archive = if header.entry().is_file() {
            header
                .extract_with_base(dest)
                .map_err(std::io::Error::other)?
        } else {
            header.skip().map_err(std::io::Error::other)?
        };
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(name.to_string(), options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_converter_registry_lookup() {
        assert!(converter_for("zip", "cbz").is_some());
        assert!(converter_for("cbr", "cbz").is_some());
        assert!(converter_for("pdf", "cbz").is_none());
        assert!(converter_for("zip", "zip").is_none());
    }

    #[test]
    fn test_rename_conversion() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("issue.zip");
        write_zip(&source, &[("p1.jpg", b"x")]);

        let converter = converter_for("zip", "cbz").unwrap();
        let target = converter.convert(&source).unwrap();
        assert_eq!(target.extension().unwrap(), "cbz");
        assert!(!source.exists());
        assert!(target.exists());
    }

    #[test]
    fn test_list_and_extract_zip() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("issue.cbz");
        write_zip(&source, &[("p1.jpg", b"x"), ("p2.jpg", b"y")]);

        let names = list_archive(&source).unwrap();
        assert_eq!(names, vec!["p1.jpg", "p2.jpg"]);

        let dest = tmp.path().join("out");
        extract_archive(&source, &dest).unwrap();
        assert!(dest.join("p1.jpg").exists());
        assert!(dest.join("p2.jpg").exists());
    }
}
