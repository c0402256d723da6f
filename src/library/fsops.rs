//! Filesystem helpers for library folders and files.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::root_folders::folder_is_inside_folder;

/// Makes one path component safe for the filesystem: strips `<>"|?*` and
/// NUL, keeps `:` only as a first-character drive marker, and trims trailing
/// dots and spaces.
#[must_use]
pub fn make_filename_safe(unsafe_name: &str) -> String {
    let mut out = String::with_capacity(unsafe_name.len());
    for component in unsafe_name.split('/') {
        if !out.is_empty() {
            out.push('/');
        }
        let mut part = String::with_capacity(component.len());
        for (i, c) in component.chars().enumerate() {
            match c {
                '<' | '>' | '"' | '|' | '?' | '*' | '\x00' => {}
                ':' if i != 1 => {}
                _ => part.push(c),
            }
        }
        out.push_str(part.trim_end_matches([' ', '.']));
    }
    out
}

/// Lists all files in a folder recursively with absolute paths. Hidden files
/// (names starting with `.`) are skipped; `filter` decides per filename
/// whether to include it.
///
/// # Errors
///
/// Returns an IO error when the folder cannot be read.
pub fn list_files(
    folder: &Path,
    filter: &dyn Fn(&str) -> bool,
) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![folder.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                stack.push(path);
            } else if !name.starts_with('.') && filter(&name) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Moves a file or folder, creating the destination's parents. Falls back to
/// copy-and-delete when the rename crosses filesystems; permission errors on
/// attribute copies are demoted to warnings once the payload is transferred.
///
/// # Errors
///
/// Returns an IO error when the payload could not be transferred.
pub fn rename_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    debug!(source = %source.display(), dest = %dest.display(), "renaming");
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            if source.is_dir() {
                copy_directory(source, dest)?;
                fs::remove_dir_all(source)?;
            } else {
                fs::copy(source, dest)?;
                fs::remove_file(source)?;
            }
            Ok(())
        }
    }
}

/// Recursively copies a folder (or single file) to `dest`.
///
/// # Errors
///
/// Returns an IO error when the copy fails.
pub fn copy_directory(source: &Path, dest: &Path) -> std::io::Result<()> {
    if source.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest)?;
        return Ok(());
    }

    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.path().is_dir() {
            copy_directory(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Deletes a file or a whole folder; a missing target is not an error.
pub fn delete_file_folder(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = result {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to delete");
        }
    }
}

/// Deletes all empty folders below `base`, leaving `base` itself alone.
pub fn delete_empty_child_folders(base: &Path) {
    fn prune(dir: &Path) -> bool {
        let Ok(entries) = fs::read_dir(dir) else {
            return false;
        };
        let mut empty = true;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if prune(&path) {
                    let _ = fs::remove_dir(&path);
                } else {
                    empty = false;
                }
            } else {
                empty = false;
            }
        }
        empty
    }
    prune(base);
}

/// Deletes `folder` and its parents while they are empty, stopping at
/// `boundary` (exclusive).
pub fn delete_empty_parent_folders(folder: &Path, boundary: &Path) {
    let mut current = Some(folder.to_path_buf());
    while let Some(dir) = current {
        if !folder_is_inside_folder(&boundary.to_string_lossy(), &dir.to_string_lossy())
            || dir == boundary
        {
            break;
        }
        let is_empty = fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty {
            break;
        }
        let parent = dir.parent().map(Path::to_path_buf);
        let _ = fs::remove_dir(&dir);
        current = parent;
    }
}

/// The deepest folder shared by all the files.
#[must_use]
pub fn find_common_folder(files: &[PathBuf]) -> Option<PathBuf> {
    let first = files.first()?;
    if files.len() == 1 {
        return first.parent().map(Path::to_path_buf);
    }

    let mut common: Vec<std::path::Component<'_>> = first.components().collect();
    for file in &files[1..] {
        let components: Vec<_> = file.components().collect();
        let shared = common
            .iter()
            .zip(components.iter())
            .take_while(|(a, b)| a == b)
            .count();
        common.truncate(shared);
    }
    // For file paths the last common component may be a file itself.
    let path: PathBuf = common.iter().collect();
    if path.is_file() { path.parent().map(Path::to_path_buf) } else { Some(path) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_make_filename_safe_strips_illegal_chars() {
        assert_eq!(make_filename_safe("What if..?"), "What if");
        assert_eq!(make_filename_safe("a<b>c|d"), "abcd");
        assert_eq!(make_filename_safe("name. "), "name");
        assert_eq!(make_filename_safe("Series/Volume 1"), "Series/Volume 1");
    }

    #[test]
    fn test_list_files_skips_hidden_and_filters() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("a.cbz"), b"x").unwrap();
        std::fs::write(tmp.path().join(".hidden.cbz"), b"x").unwrap();
        std::fs::write(tmp.path().join("sub/b.txt"), b"x").unwrap();
        std::fs::write(tmp.path().join("sub/c.cbz"), b"x").unwrap();

        let files = list_files(tmp.path(), &|name| name.ends_with(".cbz")).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.cbz", "c.cbz"]);
    }

    #[test]
    fn test_rename_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("a.cbz");
        std::fs::write(&source, b"x").unwrap();
        let dest = tmp.path().join("deep/nested/b.cbz");

        rename_file(&source, &dest).unwrap();
        assert!(!source.exists());
        assert!(dest.exists());
    }

    #[test]
    fn test_delete_empty_parent_folders_stops_at_boundary() {
        let tmp = tempfile::tempdir().unwrap();
        let deep = tmp.path().join("a/b/c");
        std::fs::create_dir_all(&deep).unwrap();

        delete_empty_parent_folders(&deep, tmp.path());
        assert!(!tmp.path().join("a").exists());
        assert!(tmp.path().exists());
    }

    #[test]
    fn test_find_common_folder() {
        let files = vec![
            PathBuf::from("/lib/Series/Volume 1/a.cbz"),
            PathBuf::from("/lib/Series/Volume 1/sub/b.cbz"),
        ];
        assert_eq!(
            find_common_folder(&files),
            Some(PathBuf::from("/lib/Series/Volume 1"))
        );
    }
}
