//! End-to-end pipeline tests: article on a mock aggregator, direct HTTP
//! download, post-processing into the library.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use longbox_core::download::{
    DirectDownload, Download, DownloadKind, DownloadMeta, DownloadState, FetchSpec,
};
use longbox_core::library::{NewIssue, NewVolume};
use longbox_core::source::DownloadSource;
use longbox_core::{Database, DownloadQueue, Services, Settings, SettingsService};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    services: Services,
    server: MockServer,
    volume_id: i64,
    _root: tempfile::TempDir,
    downloads: tempfile::TempDir,
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    let root = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();

    let mut settings = Settings::default();
    settings.download_folder = downloads.path().to_string_lossy().to_string();
    settings.aggregator_base_url = server.uri();

    let db = Database::new_in_memory().await.unwrap();
    let services = Services::new(db, SettingsService::ephemeral(settings));

    sqlx::query("INSERT INTO root_folders (folder) VALUES (?)")
        .bind(root.path().to_string_lossy().to_string())
        .execute(services.db.pool())
        .await
        .unwrap();

    let folder = root.path().join("Spawn/Volume 01 (1992)");
    std::fs::create_dir_all(&folder).unwrap();
    let volume_id = services
        .volumes
        .add(&NewVolume {
            comicvine_id: 1,
            title: "Spawn".to_string(),
            alt_title: None,
            year: Some(1992),
            publisher: Some("Image".to_string()),
            volume_number: 1,
            description: None,
            folder: folder.to_string_lossy().to_string(),
            root_folder: 1,
            special_version: None,
        })
        .await
        .unwrap();
    for n in 1..=5 {
        services
            .volumes
            .upsert_issue(
                volume_id,
                &NewIssue {
                    comicvine_id: n,
                    issue_number: n.to_string(),
                    calculated_issue_number: n as f64,
                    title: None,
                    date: Some("1992-06-01".to_string()),
                    description: None,
                    monitored: true,
                },
            )
            .await
            .unwrap();
    }

    Harness {
        services,
        server,
        volume_id,
        _root: root,
        downloads,
    }
}

async fn drain(queue: &DownloadQueue) {
    for _ in 0..200 {
        if queue.list().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("queue did not drain: {:?}", queue.list());
}

async fn queue_rows(services: &Services) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM download_queue")
        .fetch_one(services.db.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn grab_article_download_and_import() {
    let h = harness().await;

    let payload = vec![0x5Au8; 64 * 1024];
    Mock::given(method("GET"))
        .and(path("/files/spawn-4.cbz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&h.server)
        .await;

    let article = format!(
        r#"<html><body><h1>Spawn #4 (1992)</h1>
        <section class="post-contents">
            <p>Spawn #4 (1992)<br>Language : English | Size : 25 MB</p>
            <div class="aio-button-center"><a href="{0}/files/spawn-4.cbz">Main Download</a></div>
            <hr>
        </section></body></html>"#,
        h.server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/spawn-4"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article))
        .mount(&h.server)
        .await;

    let queue = DownloadQueue::new(h.services.clone());
    let ids = queue
        .grab_release(
            &format!("{}/spawn-4", h.server.uri()),
            h.volume_id,
            None,
            false,
        )
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(queue_rows(&h.services).await, 1);

    let (worker, poller) = queue.start();
    drain(&queue).await;
    worker.abort();
    poller.abort();

    // The file sits renamed in the volume folder.
    let volume = h.services.volumes.get_data(h.volume_id).await.unwrap();
    let dest = Path::new(&volume.folder).join("Spawn (1992) Volume 01 Issue 004.cbz");
    assert!(dest.exists(), "expected {dest:?}");
    assert_eq!(std::fs::read(&dest).unwrap(), payload);

    // The issue link was created, the queue row removed, history written.
    let issue = h
        .services
        .volumes
        .issue_by_calc_number(h.volume_id, 4.0)
        .await
        .unwrap();
    let linked = h.services.files.files_for_issue(issue.id).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(queue_rows(&h.services).await, 0);

    let history = longbox_core::queue::history::for_volume(&h.services.db, h.volume_id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    // The download work area is empty again.
    assert!(
        std::fs::read_dir(h.downloads.path()).unwrap().next().is_none(),
        "download folder should be empty"
    );
}

#[tokio::test]
async fn broken_links_fall_through_to_working_mirror_and_blocklist() {
    let h = harness().await;

    Mock::given(method("GET"))
        .and(path("/files/dead.cbz"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/alive.cbz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 1024]))
        .mount(&h.server)
        .await;

    let article = format!(
        r#"<html><body><h1>Spawn #2 (1992)</h1>
        <section class="post-contents">
            <p>Spawn #2 (1992)<br>Language : English</p>
            <div class="aio-button-center"><a href="{0}/files/dead.cbz">Main Download</a></div>
            <div class="aio-button-center"><a href="{0}/files/alive.cbz">Mirror Server</a></div>
            <hr>
        </section></body></html>"#,
        h.server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/spawn-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article))
        .mount(&h.server)
        .await;

    let queue = DownloadQueue::new(h.services.clone());
    let ids = queue
        .grab_release(
            &format!("{}/spawn-2", h.server.uri()),
            h.volume_id,
            None,
            false,
        )
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    // The dead mirror went on the blocklist.
    let dead = format!("{}/files/dead.cbz", h.server.uri());
    assert!(h.services.blocklist.contains(&dead).await.unwrap());
    let alive = format!("{}/files/alive.cbz", h.server.uri());
    assert!(!h.services.blocklist.contains(&alive).await.unwrap());
}

#[tokio::test]
async fn article_without_matching_groups_reports_no_matches() {
    let h = harness().await;

    let article = format!(
        r#"<html><body><h1>Completely Different Series (2015)</h1>
        <section class="post-contents">
            <p>Completely Different Series (2015)<br>Language : English</p>
            <div class="aio-button-center"><a href="{0}/files/x.cbz">Main Download</a></div>
            <hr>
        </section></body></html>"#,
        h.server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/other"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article))
        .mount(&h.server)
        .await;

    let queue = DownloadQueue::new(h.services.clone());
    let result = queue
        .grab_release(&format!("{}/other", h.server.uri()), h.volume_id, None, false)
        .await;

    use longbox_core::aggregator::{AggregatorError, PageFailure};
    use longbox_core::queue::QueueError;
    assert!(matches!(
        result,
        Err(QueueError::Aggregator(AggregatorError::Page {
            reason: PageFailure::NoMatches
        }))
    ));
}

#[tokio::test]
async fn cancel_running_download_cleans_up_and_next_proceeds() {
    let h = harness().await;

    Mock::given(method("GET"))
        .and(path("/files/slow.cbz"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 256 * 1024])
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/fast.cbz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 2048]))
        .mount(&h.server)
        .await;

    let meta = |link: &str, issue: f64| DownloadMeta {
        volume_id: h.volume_id,
        issue_id: None,
        covered_issues: Some(longbox_core::NumberSpan::Single(issue)),
        source: DownloadSource::Direct,
        source_name: "GetComics".to_string(),
        web_link: None,
        web_title: None,
        web_sub_title: None,
        download_link: link.to_string(),
        pure_link: link.to_string(),
        filename_body: String::new(),
        title: String::new(),
        download_folder: h.downloads.path().to_path_buf(),
    };

    let slow_url = format!("{}/files/slow.cbz", h.server.uri());
    let slow: Arc<dyn Download> = Arc::new(
        DirectDownload::create(
            h.services.http.clone(),
            DownloadKind::Direct,
            FetchSpec::Get {
                url: slow_url.clone(),
            },
            meta(&slow_url, 1.0),
            Some("Spawn (1992) Volume 01 Issue 001".to_string()),
        )
        .await
        .unwrap(),
    );
    let fast_url = format!("{}/files/fast.cbz", h.server.uri());
    let fast: Arc<dyn Download> = Arc::new(
        DirectDownload::create(
            h.services.http.clone(),
            DownloadKind::Direct,
            FetchSpec::Get {
                url: fast_url.clone(),
            },
            meta(&fast_url, 2.0),
            Some("Spawn (1992) Volume 01 Issue 002".to_string()),
        )
        .await
        .unwrap(),
    );

    let queue = DownloadQueue::new(h.services.clone());
    let slow_id = queue.add_download(slow.clone()).await.unwrap();
    queue.add_download(fast.clone()).await.unwrap();
    assert_eq!(queue_rows(&h.services).await, 2);

    let (worker, poller) = queue.start();

    // Wait until the first download is actually in flight, then cancel it.
    for _ in 0..100 {
        if slow.state() == DownloadState::Downloading {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    queue.cancel(slow_id).await.unwrap();

    drain(&queue).await;
    worker.abort();
    poller.abort();

    // The canceled partial is gone, its row removed, no issue link exists.
    assert!(!slow.files()[0].exists());
    let issue_1 = h
        .services
        .volumes
        .issue_by_calc_number(h.volume_id, 1.0)
        .await
        .unwrap();
    assert!(h
        .services
        .files
        .files_for_issue(issue_1.id)
        .await
        .unwrap()
        .is_empty());

    // The second download went through.
    let volume = h.services.volumes.get_data(h.volume_id).await.unwrap();
    let dest = Path::new(&volume.folder).join("Spawn (1992) Volume 01 Issue 002.cbz");
    assert!(dest.exists());
    assert_eq!(queue_rows(&h.services).await, 0);
}

#[tokio::test]
async fn restart_restores_queue_rows() {
    let h = harness().await;

    Mock::given(method("GET"))
        .and(path("/files/spawn-3.cbz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![3u8; 1024]))
        .mount(&h.server)
        .await;

    // Simulate a persisted row from a previous run.
    sqlx::query(
        r"INSERT INTO download_queue (
            volume_id, issue_id, covered_start, covered_end,
            source_kind, source_name, download_link, created_at
          ) VALUES (?, NULL, 3.0, 3.0, 'GetComics', 'GetComics', ?, 0)",
    )
    .bind(h.volume_id)
    .bind(format!("{}/files/spawn-3.cbz", h.server.uri()))
    .execute(h.services.db.pool())
    .await
    .unwrap();

    let queue = DownloadQueue::new(h.services.clone());
    queue.restore().await.unwrap();
    assert_eq!(queue.list().len(), 1);

    let (worker, poller) = queue.start();
    drain(&queue).await;
    worker.abort();
    poller.abort();

    let issue = h
        .services
        .volumes
        .issue_by_calc_number(h.volume_id, 3.0)
        .await
        .unwrap();
    assert_eq!(
        h.services.files.files_for_issue(issue.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn restart_fails_rows_whose_links_are_gone() {
    let h = harness().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;

    sqlx::query(
        r"INSERT INTO download_queue (
            volume_id, issue_id, covered_start, covered_end,
            source_kind, source_name, download_link, created_at
          ) VALUES (?, NULL, NULL, NULL, 'GetComics', 'GetComics', ?, 0)",
    )
    .bind(h.volume_id)
    .bind(format!("{}/files/gone.cbz", h.server.uri()))
    .execute(h.services.db.pool())
    .await
    .unwrap();

    let queue = DownloadQueue::new(h.services.clone());
    queue.restore().await.unwrap();

    // The row was failed away, not restored.
    assert!(queue.list().is_empty());
    assert_eq!(queue_rows(&h.services).await, 0);
    let history = longbox_core::queue::history::list(&h.services.db, 0, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}
