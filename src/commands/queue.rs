//! Queue commands: grab, process, list, cancel.

use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use longbox_core::{DownloadQueue, Services};

/// Queues the downloads of an article for a volume.
pub async fn grab(
    services: &Services,
    web_link: &str,
    volume_id: i64,
    issue_id: Option<i64>,
    force: bool,
) -> Result<()> {
    let queue = DownloadQueue::new(services.clone());
    queue.restore().await?;
    let ids = queue.grab_release(web_link, volume_id, issue_id, force).await?;
    println!("Queued {} download(s): {ids:?}", ids.len());
    Ok(())
}

/// Runs the queue until it is drained, rendering progress.
pub async fn process(services: &Services) -> Result<()> {
    let tasks = longbox_core::tasks::TaskIntervals::new(services.db.clone());
    tasks.register("process_queue", 0).await?;
    services.events.emit(longbox_core::QueueEvent::TaskAdded {
        name: "process_queue".to_string(),
    });

    let queue = DownloadQueue::new(services.clone());
    queue.restore().await?;
    let (worker, poller) = queue.start();

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    loop {
        let entries = queue.list();
        if entries.is_empty() {
            break;
        }
        let active: Vec<String> = entries
            .iter()
            .map(|e| {
                format!(
                    "{} [{} {:.1}%]",
                    e.get("title").and_then(|v| v.as_str()).unwrap_or("?"),
                    e.get("status").and_then(|v| v.as_str()).unwrap_or("?"),
                    e.get("progress").and_then(serde_json::Value::as_f64).unwrap_or(0.0),
                )
            })
            .collect();
        bar.set_message(active.join("  |  "));
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    bar.finish_with_message("queue drained");
    queue.shutdown().await;
    worker.abort();
    poller.abort();
    tasks.mark_run("process_queue").await?;
    services.events.emit(longbox_core::QueueEvent::TaskEnded {
        name: "process_queue".to_string(),
    });
    Ok(())
}

/// Prints the queue.
pub async fn show_queue(services: &Services) -> Result<()> {
    let queue = DownloadQueue::new(services.clone());
    queue.restore().await?;
    let entries = queue.list();
    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    for entry in entries {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    }
    Ok(())
}

/// Cancels one download.
pub async fn cancel(services: &Services, id: i64) -> Result<()> {
    let queue = DownloadQueue::new(services.clone());
    queue.restore().await?;
    queue.cancel(id).await?;
    println!("Canceled download {id}.");
    Ok(())
}
