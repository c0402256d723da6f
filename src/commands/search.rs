//! The `search` command: manual and auto search against the aggregator.

use anyhow::Result;
use longbox_core::Services;
use longbox_core::search::{auto_search, manual_search};

/// Runs a search and prints the ranked results.
pub async fn search(
    services: &Services,
    volume_id: i64,
    issue_id: Option<i64>,
    auto: bool,
) -> Result<()> {
    let results = if auto {
        auto_search(services, volume_id, issue_id).await?
    } else {
        manual_search(services, volume_id, issue_id).await?
    };

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for result in results {
        let marker = if result.verdict.matched { "+" } else { "-" };
        let reason = result
            .verdict
            .reason
            .map(|r| format!(" ({r})"))
            .unwrap_or_default();
        let covered = result
            .covered_issues
            .map(|span| format!(" covers #{span}"))
            .unwrap_or_default();
        println!(
            "{marker} {}{reason}{covered}\n  {}",
            result.release.display_title, result.release.link
        );
    }
    Ok(())
}
