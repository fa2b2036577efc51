//! HTTP/HTTPS downloader (spec §4.1 http/https row): HTML directory listing
//! via configurable regex row patterns, per-file GET/POST transfer through
//! the same retry-middleware `reqwest` stack the teacher builds its client
//! with.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use futures::StreamExt;
use regex::Regex;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use reqwest_tracing::TracingMiddleware;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use crate::domain::models::{RemoteFile, RetryPolicy};
use crate::domain::ports::downloader::{Downloader, HttpMethod};
use crate::domain::services::retry::run_with_retry;
use crate::downloaders::listing::{hash_http_entry, parse_human_size};
use crate::downloaders::local::ensure_dir_exists;
use crate::error::{DownloadError, Result};
use crate::message::HttpParse;

fn build_client(max_retries: u32) -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(Duration::from_secs(1), Duration::from_secs(30))
        .build_with_max_retries(max_retries);
    let client = Client::builder().build().expect("reqwest client builder");
    ClientBuilder::new(client)
        .with(TracingMiddleware::default())
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

pub struct HttpDownloader {
    base_url: String,
    client: ClientWithMiddleware,
    method: HttpMethod,
    param: HashMap<String, String>,
    save_as: Option<String>,
    http_parse: HttpParse,
    files: Vec<RemoteFile>,
    timeout: Duration,
    credentials: Option<String>,
    retry_policy: RetryPolicy,
}

impl HttpDownloader {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpDownloader {
            base_url: base_url.into(),
            client: build_client(3),
            method: HttpMethod::Get,
            param: HashMap::new(),
            save_as: None,
            http_parse: HttpParse::default(),
            files: Vec::new(),
            timeout: Duration::from_secs(300),
            credentials: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_http_parse(mut self, parse: HttpParse) -> Self {
        self.http_parse = parse;
        self
    }

    fn file_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name.trim_start_matches('/'))
    }

    fn dir_line_regex(&self) -> Option<Regex> {
        self.http_parse.dir_line.as_deref().and_then(|p| Regex::new(p).ok())
    }

    fn file_line_regex(&self) -> Option<Regex> {
        self.http_parse.file_line.as_deref().and_then(|p| Regex::new(p).ok())
    }

    /// Parses an HTML directory listing page with the configured row
    /// patterns. Missing date defaults to today (Open Question (b)).
    fn parse_html_listing(&self, html: &str) -> (Vec<RemoteFile>, Vec<RemoteFile>) {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let today = Local::now().date_naive();

        let file_re = self.file_line_regex();
        let dir_re = self.dir_line_regex();

        for line in html.lines() {
            if let Some(re) = &dir_re {
                if let Some(caps) = re.captures(line) {
                    if let Some(name) = capture_at(&caps, self.http_parse.dir_name) {
                        dirs.push(RemoteFile::new(name, self.base_url.clone()));
                        continue;
                    }
                }
            }
            if let Some(re) = &file_re {
                if let Some(caps) = re.captures(line) {
                    if let Some(name) = capture_at(&caps, self.http_parse.file_name) {
                        let size = capture_at(&caps, self.http_parse.file_size).and_then(|s| parse_human_size(&s));
                        let date_str = capture_at(&caps, self.http_parse.file_date).unwrap_or_default();
                        let date = parse_file_date(&date_str, self.http_parse.file_date_format.as_deref());

                        let mut f = RemoteFile::new(&name, self.base_url.clone());
                        f.size = size;
                        match date {
                            Some(d) => {
                                f.year = Some(d.year());
                                f.month = Some(d.month());
                                f.day = Some(d.day());
                            }
                            None => {
                                f.year = Some(today.year());
                                f.month = Some(today.month());
                                f.day = Some(today.day());
                            }
                        }
                        f.hash = Some(hash_http_entry(&name, &date_str, size));
                        files.push(f);
                    }
                }
            }
        }

        (files, dirs)
    }
}

fn capture_at(caps: &regex::Captures, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| caps.get(i)).map(|m| m.as_str().trim().to_string())
}

fn parse_file_date(raw: &str, format: Option<&str>) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }
    if let Some(fmt) = format {
        return NaiveDate::parse_from_str(raw, fmt).ok();
    }
    NaiveDate::parse_from_str(raw, "%d-%b-%Y").ok()
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn set_credentials(&mut self, userpwd: Option<String>) {
        self.credentials = userpwd;
    }

    fn set_proxy(&mut self, _url: Option<String>, _auth: Option<String>) {}

    fn set_timeout(&mut self, seconds: u64) {
        self.timeout = Duration::from_secs(seconds);
    }

    fn set_param(&mut self, param: HashMap<String, String>) {
        self.param = param;
    }

    fn set_method(&mut self, method: HttpMethod) {
        self.method = method;
    }

    fn set_save_as(&mut self, path: Option<String>) {
        self.save_as = path;
    }

    fn set_offline_dir(&mut self, _dir: Option<String>) {}

    fn set_options(&mut self, _options: HashMap<String, String>) {}

    fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry_policy = policy;
    }

    fn set_files_to_download(&mut self, files: Vec<RemoteFile>) {
        self.files = files
            .into_iter()
            .map(|mut f| {
                if f.save_as.is_none() {
                    f.save_as = Some(f.name.clone());
                }
                f
            })
            .collect();
    }

    #[instrument(name = "http_list", skip(self), fields(base_url = %self.base_url))]
    async fn list(&mut self, subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)> {
        let url = if subdir.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), subdir.trim_matches('/'))
        };

        let resp = self.client.get(&url).send().await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(DownloadError::Network(format!("GET {url} returned {}", resp.status())));
        }
        let body = resp.text().await.map_err(|e| DownloadError::Network(e.to_string()))?;
        Ok(self.parse_html_listing(&body))
    }

    #[instrument(name = "http_download", skip(self, local_dir))]
    async fn download(&mut self, local_dir: &Path, keep_dirs: bool) -> Result<Vec<RemoteFile>> {
        let mut results = Vec::with_capacity(self.files.len());

        for file in self.files.clone() {
            let save_as = file.effective_save_as();
            let dest: PathBuf = if keep_dirs {
                local_dir.join(&save_as)
            } else {
                local_dir.join(save_as.file_name().unwrap_or_default())
            };
            if let Some(parent) = dest.parent() {
                ensure_dir_exists(parent)?;
            }

            let url = file.url.clone().unwrap_or_else(|| self.file_url(&file.name));
            let start = std::time::Instant::now();

            let client = self.client.clone();
            let method = self.method;
            let param = self.param.clone();
            let credentials = self.credentials.clone();
            let timeout = self.timeout;

            let (attempt, _stats) = run_with_retry(&self.retry_policy, &|_| false, |_attempt| {
                let client = client.clone();
                let param = param.clone();
                let credentials = credentials.clone();
                let url = url.clone();
                let dest = dest.clone();
                async move {
                    let mut request = match method {
                        HttpMethod::Get => client.get(&url).query(&param.iter().collect::<Vec<_>>()),
                        HttpMethod::Post => client.post(&url).form(&param),
                    };
                    if let Some(creds) = &credentials {
                        if let Some((user, pass)) = creds.split_once(':') {
                            request = request.basic_auth(user, Some(pass));
                        }
                    }
                    let resp = request.timeout(timeout).send().await?;
                    if resp.status() != reqwest::StatusCode::OK {
                        return Err(DownloadError::Network(format!("GET {url} returned {}", resp.status())));
                    }

                    info!(
                        redirected = resp.url().as_str() != url,
                        final_url = %resp.url(),
                        "http transfer complete"
                    );

                    let mut out = File::create(&dest).await?;
                    let mut stream = resp.bytes_stream();
                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk.map_err(|e| DownloadError::Network(e.to_string()))?;
                        out.write_all(&chunk).await?;
                    }
                    Ok(())
                }
            })
            .await;
            attempt?;

            let mut result = file.clone();
            result.download_time = Some(start.elapsed().as_secs_f64());
            results.push(result);
        }

        Ok(results)
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_cfg() -> HttpParse {
        HttpParse {
            dir_line: Some(r#"<dir>(\S+)</dir>"#.to_string()),
            file_line: Some(r#"<file size="(\S+)" date="([\d-]+)">(\S+)</file>"#.to_string()),
            dir_name: Some(1),
            dir_date: None,
            file_name: Some(3),
            file_date: Some(2),
            file_date_format: Some("%Y-%m-%d".to_string()),
            file_size: Some(1),
        }
    }

    #[test]
    fn parses_configured_html_rows() {
        let dl = HttpDownloader::new("http://example.org/pub").with_http_parse(parse_cfg());
        let html = "<dir>subdir</dir>\n<file size=\"128\" date=\"2020-01-02\">data.txt</file>\n";
        let (files, dirs) = dl.parse_html_listing(html);
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].name, "subdir");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "data.txt");
        assert_eq!(files[0].size, Some(128));
        assert_eq!(files[0].year, Some(2020));
    }

    #[test]
    fn missing_date_defaults_to_today() {
        let cfg = HttpParse {
            file_date: None,
            ..parse_cfg()
        };
        let dl = HttpDownloader::new("http://example.org/pub").with_http_parse(cfg);
        let html = "<file size=\"128\" date=\"2020-01-02\">data.txt</file>\n";
        let (files, _) = dl.parse_html_listing(html);
        let today = Local::now().date_naive();
        assert_eq!(files[0].year, Some(today.year()));
    }
}
