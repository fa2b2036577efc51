//! End-to-end exercise of `DownloadService` against the `local` protocol:
//! list, match, download, archive probe and mtime restoration, all through
//! the in-memory session store, without a live queue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use biomaj_download::domain::models::RetryPolicy;
use biomaj_download::domain::ports::queue::{Delivery, Queue};
use biomaj_download::domain::ports::session_store::SessionStore;
use biomaj_download::error::Result as BdResult;
use biomaj_download::message::{DownloadJob, HttpMethod, Operation, Protocol, RemoteFileSpec};
use biomaj_download::service::{DownloadService, MemorySessionStore};

struct NullQueue;

#[async_trait]
impl Queue for NullQueue {
    async fn publish(&self, _operation: &Operation) -> BdResult<()> {
        Ok(())
    }

    async fn next_delivery(&self) -> BdResult<Delivery> {
        Err(biomaj_download::DownloadError::Internal("no queue in this test".to_string()))
    }
}

fn local_job(bank: &str, session: &str, remote_dir: &str, local_dir: &str, matches: Vec<String>) -> DownloadJob {
    DownloadJob {
        bank: bank.to_string(),
        session: session.to_string(),
        local_dir: local_dir.to_string(),
        timeout_download: None,
        remote_file: RemoteFileSpec {
            protocol: Protocol::Local,
            server: remote_dir.to_string(),
            remote_dir: String::new(),
            save_as: None,
            files: Vec::new(),
            param: Vec::new(),
            matches,
            http_parse: None,
            credentials: None,
        },
        proxy: None,
        http_method: HttpMethod::Get,
        options: HashMap::new(),
    }
}

#[tokio::test]
async fn list_then_download_round_trip_over_local_protocol() {
    let remote = tempfile::tempdir().unwrap();
    std::fs::write(remote.path().join("data.txt"), b"payload").unwrap();
    std::fs::write(remote.path().join("ignore.bin"), b"nope").unwrap();
    let local = tempfile::tempdir().unwrap();

    let session_store = Arc::new(MemorySessionStore::new());
    let service = DownloadService::new(session_store.clone(), Arc::new(NullQueue), RetryPolicy::default());

    let session = service.create_session("testbank").await.unwrap();

    let list_job = local_job(
        "testbank",
        &session,
        remote.path().to_str().unwrap(),
        local.path().to_str().unwrap(),
        vec![r"^data\.txt$".to_string()],
    );
    service.list_op(&list_job).await.unwrap();

    let matched = session_store.files("testbank", &session).await.unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].name, "data.txt");

    let mut download_spec = list_job.remote_file.clone();
    download_spec.files = matched;
    download_spec.matches = Vec::new();
    let mut download_job = DownloadJob {
        remote_file: download_spec,
        ..list_job
    };
    // Plain-text fixture, not an archive: opt out of the archive probe,
    // which now runs unconditionally regardless of file extension.
    download_job.options.insert("skip_check_uncompress".to_string(), "true".to_string());

    let had_error = service
        .download_op(&download_job, None::<fn(&str, &[biomaj_download::domain::models::RemoteFile])>)
        .await
        .unwrap();
    assert!(!had_error);

    let saved = local.path().join("data.txt");
    assert!(saved.exists());
    assert_eq!(std::fs::read_to_string(&saved).unwrap(), "payload");
    assert_eq!(session_store.progress("testbank", &session).await.unwrap(), 2);
    assert_eq!(session_store.error_count("testbank", &session).await.unwrap(), 0);
}

#[tokio::test]
async fn download_op_records_error_when_source_is_missing() {
    let remote = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();

    let session_store = Arc::new(MemorySessionStore::new());
    let service = DownloadService::new(session_store.clone(), Arc::new(NullQueue), RetryPolicy::default());
    let session = service.create_session("testbank").await.unwrap();

    let mut job = local_job(
        "testbank",
        &session,
        remote.path().to_str().unwrap(),
        local.path().to_str().unwrap(),
        Vec::new(),
    );
    job.remote_file.files = vec![biomaj_download::domain::models::RemoteFile::new(
        "missing.txt",
        remote.path().to_string_lossy(),
    )];

    let had_error = service
        .download_op(&job, None::<fn(&str, &[biomaj_download::domain::models::RemoteFile])>)
        .await
        .unwrap();
    assert!(had_error);
    assert_eq!(session_store.error_count("testbank", &session).await.unwrap(), 1);
    assert_eq!(session_store.progress("testbank", &session).await.unwrap(), 1);
    assert_eq!(session_store.error_info("testbank", &session).await.unwrap().len(), 1);
}

#[tokio::test]
async fn jobs_for_dead_sessions_are_skipped_without_touching_counters() {
    let remote = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    std::fs::write(remote.path().join("data.txt"), b"payload").unwrap();

    let session_store = Arc::new(MemorySessionStore::new());
    let service = DownloadService::new(session_store.clone(), Arc::new(NullQueue), RetryPolicy::default());

    let mut job = local_job(
        "testbank",
        "never-created",
        remote.path().to_str().unwrap(),
        local.path().to_str().unwrap(),
        Vec::new(),
    );
    job.remote_file.files = vec![biomaj_download::domain::models::RemoteFile::new(
        "data.txt",
        remote.path().to_string_lossy(),
    )];

    let had_error = service
        .download_op(&job, None::<fn(&str, &[biomaj_download::domain::models::RemoteFile])>)
        .await
        .unwrap();
    assert!(!had_error);
    assert!(!local.path().join("data.txt").exists());
}

#[tokio::test]
async fn archive_probe_deletes_corrupt_download_and_surfaces_error() {
    let remote = tempfile::tempdir().unwrap();
    std::fs::write(remote.path().join("data.gz"), b"not actually gzip").unwrap();
    let local = tempfile::tempdir().unwrap();

    let session_store = Arc::new(MemorySessionStore::new());
    let policy = RetryPolicy {
        stop: biomaj_download::domain::models::StopCondition::AfterAttempt(1),
        wait: biomaj_download::domain::models::WaitPolicy::None,
    };
    let service = DownloadService::new(session_store.clone(), Arc::new(NullQueue), policy);
    let session = service.create_session("testbank").await.unwrap();

    let mut job = local_job(
        "testbank",
        &session,
        remote.path().to_str().unwrap(),
        local.path().to_str().unwrap(),
        Vec::new(),
    );
    job.remote_file.files = vec![biomaj_download::domain::models::RemoteFile::new(
        "data.gz",
        remote.path().to_string_lossy(),
    )];

    let had_error = service
        .download_op(&job, None::<fn(&str, &[biomaj_download::domain::models::RemoteFile])>)
        .await
        .unwrap();
    assert!(had_error);
    assert!(!local.path().join("data.gz").exists());
}

#[tokio::test]
async fn skip_check_uncompress_option_keeps_corrupt_archive() {
    let remote = tempfile::tempdir().unwrap();
    std::fs::write(remote.path().join("data.gz"), b"not actually gzip").unwrap();
    let local = tempfile::tempdir().unwrap();

    let session_store = Arc::new(MemorySessionStore::new());
    let service = DownloadService::new(session_store.clone(), Arc::new(NullQueue), RetryPolicy::default());
    let session = service.create_session("testbank").await.unwrap();

    let mut job = local_job(
        "testbank",
        &session,
        remote.path().to_str().unwrap(),
        local.path().to_str().unwrap(),
        Vec::new(),
    );
    job.remote_file.files = vec![biomaj_download::domain::models::RemoteFile::new(
        "data.gz",
        remote.path().to_string_lossy(),
    )];
    job.options.insert("skip_check_uncompress".to_string(), "true".to_string());

    let had_error = service
        .download_op(&job, None::<fn(&str, &[biomaj_download::domain::models::RemoteFile])>)
        .await
        .unwrap();
    assert!(!had_error);
    assert!(local.path().join("data.gz").exists());
}
