//! CLI argument definitions using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Comic-book library automation: search, download and file volumes.
#[derive(Parser, Debug)]
#[command(name = "longbox")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Data directory holding the database and settings
    #[arg(short = 'd', long, default_value = ".", global = true)]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search the aggregator for a volume or one of its issues
    Search {
        /// Volume ID to search for
        volume_id: i64,
        /// Issue ID to search for instead of the whole volume
        #[arg(short, long)]
        issue_id: Option<i64>,
        /// Automatically pick the releases instead of listing everything
        #[arg(short, long)]
        auto: bool,
    },

    /// Queue the downloads of an aggregator article for a volume
    Grab {
        /// Link to the article page
        web_link: String,
        /// Volume ID the download is for
        volume_id: i64,
        /// Issue ID the download is for
        #[arg(short, long)]
        issue_id: Option<i64>,
        /// Skip matching and take everything on the page
        #[arg(short, long)]
        force: bool,
    },

    /// Process the download queue until it is empty
    Process,

    /// Show the queue
    Queue,

    /// Cancel a queued or running download
    Cancel {
        /// Queue ID of the download
        id: i64,
    },

    /// Scan a volume's folder and (re)match its files
    Scan {
        /// Volume ID to scan
        volume_id: i64,
    },

    /// Rename a volume's files to the configured naming scheme
    Rename {
        /// Volume ID to rename
        volume_id: i64,
    },

    /// Show or change settings
    Config {
        /// Setting key to change (omit to print the whole document)
        key: Option<String>,
        /// New value for the key, JSON-encoded
        value: Option<String>,
    },

    /// Show or clear the blocklist
    Blocklist {
        /// Remove all entries
        #[arg(long)]
        clear: bool,
    },

    /// Manage root folders
    RootFolder {
        #[command(subcommand)]
        action: RootFolderAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum RootFolderAction {
    /// Register a root folder
    Add { folder: String },
    /// List root folders
    List,
    /// Delete a root folder
    Delete { id: i64 },
}
