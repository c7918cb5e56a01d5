mod common;

use bulksync::downloader::{DownloadError, sha256_checksum};
use bulksync::ledger::DownloadStatus;
use common::{ALL_HOOK, Behavior, harness, harness_with, wait_until};
use std::time::Duration;

#[tokio::test]
async fn test_download_writes_file_and_checksum() {
    let h = harness();
    h.listen_all();
    let product = h.seed_product("p1", false, "");
    let file = h.seed_file(&product, "d1", "f1");
    h.adapter.set_content("f1", b"the quick brown fox jumps over the lazy dog");

    let entry = h.app.downloader.download(&file.id).await.unwrap();

    let path = h.app.downloader.destination(&file).unwrap();
    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(on_disk, b"the quick brown fox jumps over the lazy dog");
    assert_eq!(entry.status, DownloadStatus::Completed);
    assert_eq!(entry.local_checksum, sha256_checksum(&on_disk));
    assert_eq!(entry.bytes_written, on_disk.len() as u64);
    assert_eq!(entry.local_path, path.display().to_string());
    assert!(!path.with_extension("zip.tmp").exists());

    let latest = h.app.store.latest_download(&file.id).unwrap().unwrap();
    assert_eq!(latest.status, DownloadStatus::Completed);
    assert!(!h.app.downloader.is_in_flight(&file.id));

    assert!(wait_until(|| h.transport.count(ALL_HOOK, "download.completed") == 1).await);
    assert_eq!(h.transport.count(ALL_HOOK, "download.started"), 1);

    let completed = &h.transport.bodies_for(ALL_HOOK, "download.completed")[0];
    assert_eq!(completed["source"], "mock");
    assert_eq!(completed["file"]["id"], file.id);
    assert_eq!(completed["file"]["checksum"], entry.local_checksum);
    assert_eq!(completed["product"]["id"], product.id);
    assert!(completed.get("alerts").is_none());
}

#[tokio::test]
async fn test_second_download_is_rejected_while_first_runs() {
    let h = harness();
    let product = h.seed_product("p1", false, "");
    let file = h.seed_file(&product, "d1", "f1");
    h.adapter.set_behavior("f1", Behavior::Gated);

    let downloader = h.app.downloader.clone();
    let id = file.id.clone();
    let first = tokio::spawn(async move { downloader.download(&id).await });

    assert!(wait_until(|| h.app.downloader.get_progress(&file.id).is_some()).await);
    let second = h.app.downloader.download(&file.id).await;
    assert!(matches!(second, Err(DownloadError::AlreadyInProgress(_))));

    h.adapter.release(1);
    let entry = first.await.unwrap().unwrap();
    assert_eq!(entry.status, DownloadStatus::Completed);

    // Only the accepted attempt was recorded
    assert_eq!(h.app.store.list_downloads(&file.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_leaves_no_files_behind() {
    let h = harness();
    h.listen_all();
    let product = h.seed_product("p1", false, "");
    let file = h.seed_file(&product, "d1", "f1");
    h.adapter.set_behavior("f1", Behavior::Block);

    let downloader = h.app.downloader.clone();
    let id = file.id.clone();
    let task = tokio::spawn(async move { downloader.download(&id).await });

    assert!(wait_until(|| h.adapter.active() == 1).await);
    h.app.downloader.cancel(&file.id).unwrap();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(ref e) if e.is_cancellation()));

    let path = h.app.downloader.destination(&file).unwrap();
    assert!(!path.exists());
    assert!(!path.with_extension("zip.tmp").exists());

    let latest = h.app.store.latest_download(&file.id).unwrap().unwrap();
    assert_eq!(latest.status, DownloadStatus::Cancelled);
    assert!(latest.completed_at.is_some());

    assert!(wait_until(|| h.transport.count(ALL_HOOK, "download.cancelled") == 1).await);
    let body = &h.transport.bodies_for(ALL_HOOK, "download.cancelled")[0];
    assert_eq!(body["error"]["code"], "CANCELLED");
}

#[tokio::test]
async fn test_cancel_unknown_download() {
    let h = harness();
    let err = h.app.downloader.cancel("mock:nope:current:x").unwrap_err();
    assert!(matches!(err, DownloadError::NotActive(_)));
}

#[tokio::test]
async fn test_adapter_failure_records_failed_entry() {
    let h = harness();
    h.listen_all();
    let product = h.seed_product("p1", false, "");
    let file = h.seed_file(&product, "d1", "f1");
    h.adapter
        .set_behavior("f1", Behavior::Fail("connection reset".to_string()));

    let err = h.app.downloader.download(&file.id).await.unwrap_err();
    assert!(matches!(err, DownloadError::Adapter(_)));

    let latest = h.app.store.latest_download(&file.id).unwrap().unwrap();
    assert_eq!(latest.status, DownloadStatus::Failed);
    assert!(latest.error_message.contains("connection reset"));
    assert!(!h.app.downloader.destination(&file).unwrap().exists());

    assert!(wait_until(|| h.transport.count(ALL_HOOK, "download.failed") == 1).await);
    let body = &h.transport.bodies_for(ALL_HOOK, "download.failed")[0];
    assert_eq!(body["error"]["code"], "NETWORK_ERROR");
    assert_eq!(h.app.metrics.snapshot().downloads_failed, 1);
}

#[tokio::test]
async fn test_mid_stream_failure_keeps_byte_count() {
    let h = harness();
    let product = h.seed_product("p1", false, "");
    let file = h.seed_file(&product, "d1", "f1");
    h.adapter.set_content("f1", b"0123456789abcdefghijklmnopqrstuv");
    h.adapter
        .set_behavior("f1", Behavior::FailAfter(12, "connection reset".to_string()));

    let err = h.app.downloader.download(&file.id).await.unwrap_err();
    assert!(matches!(err, DownloadError::Adapter(_)));

    let latest = h.app.store.latest_download(&file.id).unwrap().unwrap();
    assert_eq!(latest.status, DownloadStatus::Failed);
    assert_eq!(latest.bytes_written, 12);
    assert_eq!(latest.total_bytes, 32);
    assert!(latest.completed_at.is_some());
    assert!(!h.app.downloader.destination(&file).unwrap().exists());
}

#[tokio::test]
async fn test_cancelled_entry_keeps_byte_count() {
    let h = harness();
    let product = h.seed_product("p1", false, "");
    let file = h.seed_file(&product, "d1", "f1");
    h.adapter.set_content("f1", b"0123456789abcdefghijklmnopqrstuv");
    h.adapter.set_behavior("f1", Behavior::StallAfter(8));

    let downloader = h.app.downloader.clone();
    let id = file.id.clone();
    let task = tokio::spawn(async move { downloader.download(&id).await });

    assert!(
        wait_until(|| {
            h.app
                .downloader
                .get_progress(&file.id)
                .is_some_and(|p| p.bytes_written == 8)
        })
        .await
    );
    h.app.downloader.cancel(&file.id).unwrap();
    assert!(task.await.unwrap().is_err());

    let latest = h.app.store.latest_download(&file.id).unwrap().unwrap();
    assert_eq!(latest.status, DownloadStatus::Cancelled);
    assert_eq!(latest.bytes_written, 8);
}

#[tokio::test]
async fn test_progress_writes_never_overwrite_outcome() {
    let h = harness_with(|config| config.downloads.progress_persist_ms = 1);
    let product = h.seed_product("p1", false, "");
    let content: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();

    for name in ["a", "b", "c"] {
        let file = h.seed_file(&product, "d1", name);
        h.adapter.set_content(name, &content);

        let entry = h.app.downloader.download(&file.id).await.unwrap();
        assert_eq!(entry.bytes_written, 4096);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let latest = h.app.store.latest_download(&file.id).unwrap().unwrap();
        assert_eq!(latest.status, DownloadStatus::Completed);
        assert_eq!(latest.bytes_written, 4096);
        assert_eq!(latest.local_checksum, sha256_checksum(&content));
    }
}

#[tokio::test]
async fn test_timeout_is_recorded_as_cancelled() {
    let h = harness_with(|config| config.downloads.timeout_secs = 1);
    h.listen_all();
    let product = h.seed_product("p1", false, "");
    let file = h.seed_file(&product, "d1", "f1");
    h.adapter.set_behavior("f1", Behavior::Block);

    let err = h.app.downloader.download(&file.id).await.unwrap_err();
    assert!(matches!(err, DownloadError::TimedOut));

    let latest = h.app.store.latest_download(&file.id).unwrap().unwrap();
    assert_eq!(latest.status, DownloadStatus::Cancelled);

    assert!(wait_until(|| h.transport.count(ALL_HOOK, "download.cancelled") == 1).await);
    let body = &h.transport.bodies_for(ALL_HOOK, "download.cancelled")[0];
    assert_eq!(body["error"]["code"], "TIMEOUT");
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let h = harness_with(|config| config.downloads.max_concurrent = 2);
    let product = h.seed_product("p1", false, "");

    let mut tasks = Vec::new();
    for name in ["f1", "f2", "f3"] {
        let file = h.seed_file(&product, "d1", name);
        h.adapter.set_behavior(name, Behavior::Gated);
        let downloader = h.app.downloader.clone();
        tasks.push(tokio::spawn(async move { downloader.download(&file.id).await }));
    }

    assert!(wait_until(|| h.app.downloader.in_flight() == 3).await);
    assert!(wait_until(|| h.adapter.active() == 2).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.adapter.active(), 2);
    assert_eq!(h.app.downloader.active_downloads().len(), 2);

    h.adapter.release(3);
    for task in tasks {
        let entry = task.await.unwrap().unwrap();
        assert_eq!(entry.status, DownloadStatus::Completed);
    }
    assert_eq!(h.adapter.max_active(), 2);
    assert_eq!(h.app.downloader.in_flight(), 0);
}

#[tokio::test]
async fn test_checksum_mismatch_raises_alert() {
    let h = harness();
    h.listen_all();
    let product = h.seed_product("p1", false, "");
    let file = h.seed_file_with(&product, "d1", "f1", |f| {
        f.expected_checksum = "sha256:deadbeef".to_string();
        f.checksum_algorithm = "sha256".to_string();
    });

    let entry = h.app.downloader.download(&file.id).await.unwrap();
    assert_eq!(entry.status, DownloadStatus::Completed);

    assert!(wait_until(|| h.transport.count(ALL_HOOK, "checksum.mismatch") == 1).await);
    assert!(wait_until(|| h.transport.count(ALL_HOOK, "download.completed") == 1).await);
    let completed = &h.transport.bodies_for(ALL_HOOK, "download.completed")[0];
    let alerts = completed["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].as_str().unwrap().contains("deadbeef"));
}

#[tokio::test]
async fn test_matching_checksum_has_no_alert() {
    let h = harness();
    h.listen_all();
    let product = h.seed_product("p1", false, "");
    h.adapter.set_content("f1", b"payload");
    let file = h.seed_file_with(&product, "d1", "f1", |f| {
        f.expected_checksum = sha256_checksum(b"payload").to_uppercase();
        f.checksum_algorithm = "sha256".to_string();
    });

    h.app.downloader.download(&file.id).await.unwrap();

    assert!(wait_until(|| h.transport.count(ALL_HOOK, "download.completed") == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.count(ALL_HOOK, "checksum.mismatch"), 0);
}

#[tokio::test]
async fn test_unknown_file_and_source() {
    let h = harness();
    let err = h.app.downloader.download("mock:p1:d1:missing").await.unwrap_err();
    assert!(matches!(err, DownloadError::FileNotFound(_)));

    let product = h.seed_product("p1", false, "");
    let file = h.seed_file_with(&product, "d1", "f1", |f| {
        f.source_id = "unregistered".to_string();
    });

    let err = h.app.downloader.download(&file.id).await.unwrap_err();
    assert!(matches!(err, DownloadError::SourceNotFound(_)));
    assert!(h.app.store.list_downloads(&file.id).unwrap().is_empty());
    assert!(!h.app.downloader.is_in_flight(&file.id));
}

#[tokio::test]
async fn test_queue_runs_submitted_downloads() {
    let h = harness();
    let product = h.seed_product("p1", false, "");
    let file = h.seed_file(&product, "d1", "f1");

    h.app.queue.submit(&file.id).await.unwrap();

    assert!(
        wait_until(|| h.app.store.has_completed_download(&file.id).unwrap_or(false)).await
    );
    assert!(h.app.downloader.destination(&file).unwrap().exists());
}

#[tokio::test]
async fn test_progress_feed_reports_active_downloads() {
    let h = harness();
    let product = h.seed_product("p1", false, "");
    let file = h.seed_file(&product, "d1", "f1");
    h.adapter.set_behavior("f1", Behavior::Gated);

    let downloader = h.app.downloader.clone();
    let id = file.id.clone();
    let task = tokio::spawn(async move { downloader.download(&id).await });
    assert!(wait_until(|| h.adapter.active() == 1).await);

    let mut feed = h.app.downloader.progress_feed(Duration::from_millis(20));
    let snapshot = feed.recv().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].file_id, file.id);
    assert_eq!(snapshot[0].file_name, "f1.zip");

    h.adapter.release(1);
    task.await.unwrap().unwrap();
    assert!(h.app.downloader.active_downloads().is_empty());
}
