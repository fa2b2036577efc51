//! Direct-protocol downloaders (spec §4.1 direct-ftp(s)/direct-http(s)
//! rows): the caller supplies exact file names, so `list()` is reduced to a
//! per-file metadata probe instead of a directory listing (GLOSSARY,
//! "Direct protocol").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use suppaftp::tokio::AsyncFtpStream;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::domain::models::{RemoteFile, RetryPolicy};
use crate::domain::ports::downloader::{Downloader, HttpMethod};
use crate::domain::services::retry::next_retry_wait;
use crate::downloaders::local::ensure_dir_exists;
use crate::error::{DownloadError, Result};

/// direct-ftp / direct-ftps: probes each preset file with MDTM/SIZE instead
/// of listing the directory. Code 350 is treated as a successful probe.
pub struct DirectFtpDownloader {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    files: Vec<RemoteFile>,
    stream: Option<AsyncFtpStream>,
    retry_policy: RetryPolicy,
}

impl DirectFtpDownloader {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        DirectFtpDownloader {
            host: host.into(),
            port,
            credentials: None,
            files: Vec::new(),
            stream: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    async fn ensure_connected(&mut self) -> Result<&mut AsyncFtpStream> {
        if self.stream.is_none() {
            let addr = format!("{}:{}", self.host, self.port);
            let mut stream = AsyncFtpStream::connect(&addr)
                .await
                .map_err(|e| DownloadError::Network(format!("connect {addr}: {e}")))?;
            let (user, pass) = self
                .credentials
                .clone()
                .unwrap_or_else(|| ("anonymous".to_string(), "anonymous@".to_string()));
            stream
                .login(&user, &pass)
                .await
                .map_err(|e| DownloadError::Network(format!("login: {e}")))?;
            self.stream = Some(stream);
        }
        Ok(self.stream.as_mut().unwrap())
    }
}

#[async_trait]
impl Downloader for DirectFtpDownloader {
    fn set_credentials(&mut self, userpwd: Option<String>) {
        self.credentials = userpwd.and_then(|s| s.split_once(':').map(|(u, p)| (u.to_string(), p.to_string())));
    }
    fn set_proxy(&mut self, _url: Option<String>, _auth: Option<String>) {}
    fn set_timeout(&mut self, _seconds: u64) {}
    fn set_param(&mut self, _param: HashMap<String, String>) {}
    fn set_method(&mut self, _method: HttpMethod) {}
    fn set_save_as(&mut self, _path: Option<String>) {}
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

    /// Listing is reduced to the preset file list, metadata filled via a
    /// SIZE probe (size) and an MDTM probe (mtime), spec §4.1 direct-ftp(s)
    /// row ("a HEAD-equivalent (MDTM/SIZE) per file ... to discover size
    /// and mtime").
    #[instrument(name = "direct_ftp_list", skip(self))]
    async fn list(&mut self, _subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)> {
        use chrono::Datelike;

        let mut files = Vec::with_capacity(self.files.len());
        for file in self.files.clone() {
            let stream = self.ensure_connected().await?;
            let mut f = file.clone();
            if let Ok(size) = stream.size(&file.name).await {
                f.size = Some(size as u64);
            }
            if let Ok(mtime) = stream.mdtm(&file.name).await {
                f.year = Some(mtime.year());
                f.month = Some(mtime.month());
                f.day = Some(mtime.day());
            }
            files.push(f);
        }
        Ok((files, Vec::new()))
    }

    #[instrument(name = "direct_ftp_download", skip(self, local_dir))]
    async fn download(&mut self, local_dir: &Path, keep_dirs: bool) -> Result<Vec<RemoteFile>> {
        use tokio::io::AsyncReadExt;

        let files = self.files.clone();
        let mut results = Vec::with_capacity(files.len());

        for file in files {
            let save_as = file.effective_save_as();
            let dest: PathBuf = if keep_dirs {
                local_dir.join(&save_as)
            } else {
                local_dir.join(save_as.file_name().unwrap_or_default())
            };
            if let Some(parent) = dest.parent() {
                ensure_dir_exists(parent)?;
            }

            let start = std::time::Instant::now();
            let retry_start = std::time::Instant::now();
            let mut attempt: u32 = 0;
            let outcome: Result<()> = loop {
                attempt += 1;
                let try_once: Result<()> = async {
                    let stream = self.ensure_connected().await?;
                    let mut reader = stream
                        .retr_as_stream(&file.name)
                        .await
                        .map_err(|e| DownloadError::Network(format!("RETR {}: {e}", file.name)))?;

                    let mut out = File::create(&dest).await?;
                    let mut buf = [0u8; 16384];
                    loop {
                        let n = reader.read(&mut buf).await?;
                        if n == 0 {
                            break;
                        }
                        out.write_all(&buf[..n]).await?;
                    }
                    self.stream
                        .as_mut()
                        .unwrap()
                        .finalize_retr_stream(reader)
                        .await
                        .map_err(|e| DownloadError::Network(format!("finalize RETR {}: {e}", file.name)))?;
                    Ok(())
                }
                .await;

                match try_once {
                    Ok(()) => break Ok(()),
                    Err(e) if !e.is_retriable() => break Err(e),
                    Err(e) => {
                        self.stream = None;
                        match next_retry_wait(&self.retry_policy, attempt, retry_start) {
                            None => break Err(e),
                            Some(wait) => {
                                if wait > Duration::ZERO {
                                    tokio::time::sleep(wait).await;
                                }
                            }
                        }
                    }
                }
            };
            outcome?;

            let mut result = file.clone();
            result.download_time = Some(start.elapsed().as_secs_f64());
            results.push(result);
        }

        Ok(results)
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.quit().await;
        }
    }
}

/// direct-http / direct-https: per-file HEAD request. Code 405 (method not
/// allowed) is tolerated and the file passes through with unknown
/// size/date; query string (GET) or form body (POST) is injected from
/// `param`.
pub struct DirectHttpDownloader {
    client: Client,
    method: HttpMethod,
    param: HashMap<String, String>,
    files: Vec<RemoteFile>,
    timeout: Duration,
    retry_policy: RetryPolicy,
}

impl DirectHttpDownloader {
    pub fn new() -> Self {
        DirectHttpDownloader {
            client: Client::new(),
            method: HttpMethod::Get,
            param: HashMap::new(),
            files: Vec::new(),
            timeout: Duration::from_secs(300),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl Default for DirectHttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Downloader for DirectHttpDownloader {
    fn set_credentials(&mut self, _userpwd: Option<String>) {}
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

    fn set_save_as(&mut self, _path: Option<String>) {}
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

    #[instrument(name = "direct_http_list", skip(self))]
    async fn list(&mut self, _subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)> {
        let today = Local::now().date_naive();
        let mut files = Vec::with_capacity(self.files.len());

        for file in self.files.clone() {
            let url = file
                .url
                .clone()
                .ok_or_else(|| DownloadError::Config(format!("direct-http entry {} has no url", file.name)))?;

            let resp = self.client.head(&url).timeout(self.timeout).send().await?;
            let mut f = file.clone();

            match resp.status() {
                StatusCode::OK => {
                    if let Some(len) = resp.content_length() {
                        f.size = Some(len);
                    }
                    use chrono::Datelike;
                    f.year = Some(today.year());
                    f.month = Some(today.month());
                    f.day = Some(today.day());
                }
                StatusCode::METHOD_NOT_ALLOWED => {
                    // unknown size/date, pass through unchanged
                }
                other => {
                    return Err(DownloadError::Network(format!("HEAD {url} returned {other}")));
                }
            }
            files.push(f);
        }

        Ok((files, Vec::new()))
    }

    #[instrument(name = "direct_http_download", skip(self, local_dir))]
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
            let url = file
                .url
                .clone()
                .ok_or_else(|| DownloadError::Config(format!("direct-http entry {} has no url", file.name)))?;

            let start = std::time::Instant::now();
            let client = self.client.clone();
            let method = self.method;
            let param = self.param.clone();
            let timeout = self.timeout;
            let (attempt, _stats) = crate::domain::services::retry::run_with_retry(&self.retry_policy, &|_| false, |_attempt| {
                let client = client.clone();
                let param = param.clone();
                let url = url.clone();
                let dest = dest.clone();
                async move {
                    let request = match method {
                        HttpMethod::Get => client.get(&url).query(&param.iter().collect::<Vec<_>>()),
                        HttpMethod::Post => client.post(&url).form(&param),
                    };
                    let resp = request.timeout(timeout).send().await?;
                    if resp.status() != StatusCode::OK {
                        return Err(DownloadError::Network(format!("GET {url} returned {}", resp.status())));
                    }

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
