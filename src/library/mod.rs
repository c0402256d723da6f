//! The library: volumes, issues, files and the folder scanner.
//!
//! # Overview
//!
//! - [`VolumeStore`] / [`FilesStore`] / [`RootFolders`] - SQLite-backed
//!   stores for the library entities
//! - [`scan_files`] - walks a volume folder and maps files to issues
//! - [`fsops`] - filesystem helpers (safe names, moves, folder cleanup)
//!
//! One file may cover many issues (ranges, TPBs) and one issue may have many
//! files; the links live in `issues_files`. Cover and metadata files attach
//! to the volume itself through `volume_files`.

mod error;
mod files;
pub mod fsops;
mod root_folders;
mod scanner;
mod volume;

pub use error::LibraryError;
pub use files::{FileData, FilesStore, GeneralFileType};
pub use root_folders::{RootFolder, RootFolders, folder_is_inside_folder};
pub use scanner::scan_files;
pub use volume::{
    IssueData, IssueYearIndex, NewIssue, NewVolume, VolumeData, VolumeStore, approx_eq,
};
