//! CLI entry point for longbox.

use anyhow::Result;
use clap::Parser;
use longbox_core::{Database, Services, SettingsService};
use tracing::debug;

mod cli;
mod commands;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    std::fs::create_dir_all(&args.data_dir)?;
    let db = Database::new(&args.data_dir.join("longbox.db")).await?;
    let settings = SettingsService::load(args.data_dir.join("settings.json"))?;
    let services = Services::new(db, settings);

    // A configured challenge solver starts its session at boot.
    if let Some(base_url) = services.settings.get().flaresolverr_base_url.clone() {
        if !services.solver.enable(&base_url).await {
            tracing::warn!(base_url, "challenge solver not reachable; continuing without");
        }
    }

    match args.command {
        Command::Search {
            volume_id,
            issue_id,
            auto,
        } => commands::search(&services, volume_id, issue_id, auto).await,

        Command::Grab {
            web_link,
            volume_id,
            issue_id,
            force,
        } => commands::grab(&services, &web_link, volume_id, issue_id, force).await,

        Command::Process => commands::process(&services).await,

        Command::Queue => commands::show_queue(&services).await,

        Command::Cancel { id } => commands::cancel(&services, id).await,

        Command::Scan { volume_id } => commands::scan(&services, volume_id).await,

        Command::Rename { volume_id } => commands::rename(&services, volume_id).await,

        Command::Config { key, value } => commands::config(&services, key, value).await,

        Command::Blocklist { clear } => commands::blocklist(&services, clear).await,

        Command::RootFolder { action } => commands::root_folder(&services, action).await,
    }
}
