//! Exercises `HttpDownloader` against a real HTTP server (`httpmock`) so
//! the listing/transfer paths run without reaching the network.

use std::collections::HashMap;

use biomaj_download::domain::ports::downloader::Downloader;
use biomaj_download::downloaders::HttpDownloader;
use biomaj_download::message::HttpParse;
use httpmock::Method::GET;
use httpmock::MockServer;

fn http_parse() -> HttpParse {
    HttpParse {
        dir_line: Some(r#"<dir>(\S+)</dir>"#.to_string()),
        file_line: Some(r#"<file size="(\d+)" date="([\d-]+)">(\S+)</file>"#.to_string()),
        dir_name: Some(1),
        dir_date: None,
        file_name: Some(3),
        file_date: Some(2),
        file_date_format: Some("%Y-%m-%d".to_string()),
        file_size: Some(1),
    }
}

#[tokio::test]
async fn lists_files_and_subdirs_from_html_listing() {
    let server = MockServer::start_async().await;
    let listing = "<dir>archive</dir>\n<file size=\"42\" date=\"2021-03-04\">readme.txt</file>\n";
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/pub");
            then.status(200).body(listing);
        })
        .await;

    let mut downloader = HttpDownloader::new(server.base_url() + "/pub").with_http_parse(http_parse());
    let (files, dirs) = downloader.list("").await.unwrap();

    mock.assert_async().await;
    assert_eq!(dirs.len(), 1);
    assert_eq!(dirs[0].name, "archive");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "readme.txt");
    assert_eq!(files[0].size, Some(42));
    assert_eq!(files[0].year, Some(2021));
}

#[tokio::test]
async fn downloads_matched_file_to_local_dir() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/pub/data.txt");
            then.status(200).body("hello biomaj");
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut downloader = HttpDownloader::new(server.base_url() + "/pub").with_http_parse(http_parse());

    let mut file = biomaj_download::domain::models::RemoteFile::new("data.txt", server.base_url() + "/pub");
    file.url = Some(format!("{}/pub/data.txt", server.base_url()));
    downloader.set_files_to_download(vec![file]);

    let results = downloader.download(dir.path(), true).await.unwrap();
    mock.assert_async().await;

    assert_eq!(results.len(), 1);
    let saved = dir.path().join("data.txt");
    assert!(saved.exists());
    assert_eq!(tokio::fs::read_to_string(&saved).await.unwrap(), "hello biomaj");
    assert!(results[0].download_time.is_some());
}

#[tokio::test]
async fn missing_file_returns_network_error() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/pub/missing.txt");
            then.status(404);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut downloader = HttpDownloader::new(server.base_url() + "/pub").with_http_parse(http_parse());
    let mut file = biomaj_download::domain::models::RemoteFile::new("missing.txt", server.base_url() + "/pub");
    file.url = Some(format!("{}/pub/missing.txt", server.base_url()));
    downloader.set_files_to_download(vec![file]);

    let result = downloader.download(dir.path(), true).await;
    mock.assert_async().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn server_error_status_returns_network_error_not_a_success() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/pub/broken.txt");
            then.status(500).body("internal error page");
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut downloader = HttpDownloader::new(server.base_url() + "/pub").with_http_parse(http_parse());
    let mut file = biomaj_download::domain::models::RemoteFile::new("broken.txt", server.base_url() + "/pub");
    file.url = Some(format!("{}/pub/broken.txt", server.base_url()));
    downloader.set_files_to_download(vec![file]);

    let result = downloader.download(dir.path(), true).await;
    mock.assert_async().await;
    assert!(result.is_err());
    assert!(!dir.path().join("broken.txt").exists());
}

#[tokio::test]
async fn basic_auth_header_is_sent_when_credentials_set() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/pub/secret.txt").header_exists("authorization");
            then.status(200).body("shh");
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut downloader = HttpDownloader::new(server.base_url() + "/pub").with_http_parse(http_parse());
    downloader.set_credentials(Some("alice:wonderland".to_string()));
    let mut file = biomaj_download::domain::models::RemoteFile::new("secret.txt", server.base_url() + "/pub");
    file.url = Some(format!("{}/pub/secret.txt", server.base_url()));
    downloader.set_files_to_download(vec![file]);

    let _unused: HashMap<String, String> = HashMap::new();
    let results = downloader.download(dir.path(), true).await.unwrap();
    mock.assert_async().await;
    assert_eq!(results.len(), 1);
}
