//! Longbox Core Library
//!
//! Comic-book library automation: given a curated set of volumes, discover
//! download sources on a release aggregator, drive heterogeneous download
//! back-ends to fetch the files, then match, rename, convert and file the
//! artifacts into a structured on-disk library.
//!
//! # Architecture
//!
//! The pipeline from *intent to acquire* to *files on disk*:
//!
//! - [`fingerprint`] - Parses filenames and release titles into structured
//!   fingerprints
//! - [`matching`] - Decides whether fingerprints fit volumes, issues,
//!   groups and search results
//! - [`naming`] - Renders folder and file names from templates
//! - [`library`] - Volume/issue/file stores and the folder scanner
//! - [`aggregator`] - Scrapes the release aggregator's pages
//! - [`search`] - Builds queries, ranks results, picks releases
//! - [`resolver`] - Purifies candidate links into concrete targets
//! - [`download`] - The per-backend download clients
//! - [`queue`] - The download queue actor
//! - [`postprocess`] - Terminal-state action chains
//! - [`conversion`] - Archive extraction and format conversion
//!
//! Supporting services: [`db`], [`settings`], [`blocklist`],
//! [`credentials`], [`events`], [`context`].

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::float_cmp)]

pub mod aggregator;
pub mod blocklist;
pub mod context;
pub mod conversion;
pub mod credentials;
pub mod db;
pub mod download;
pub mod events;
pub mod fingerprint;
pub mod library;
pub mod matching;
pub mod naming;
pub mod postprocess;
pub mod queue;
pub mod resolver;
pub mod search;
pub mod settings;
pub mod source;
pub mod tasks;

// Re-export commonly used types
pub use context::Services;
pub use db::Database;
pub use download::{Download, DownloadState, RetryPolicy};
pub use events::{EventBus, QueueEvent};
pub use fingerprint::{
    ExtractOptions, Fingerprint, NumberSpan, SpecialVersion, extract_filename_data,
};
pub use queue::{DownloadQueue, QueueError};
pub use settings::{Settings, SettingsService};
pub use source::DownloadSource;
