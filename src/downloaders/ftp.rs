//! FTP/FTPS downloader (spec §4.1 ftp/ftps row): server `LIST` text parsed
//! by the Unix-ls parser with MS-DOS fallback, per-file transfer over
//! `suppaftp`'s async client.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use suppaftp::tokio::AsyncFtpStream;
use suppaftp::types::Mode;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

use crate::domain::models::{RemoteFile, RetryPolicy};
use crate::domain::ports::downloader::{Downloader, HttpMethod};
use crate::domain::services::retry::next_retry_wait;
use crate::downloaders::listing::{entry_to_remote_file, parse_listing_with_raw};
use crate::downloaders::local::ensure_dir_exists;
use crate::error::{DownloadError, Result};

pub struct FtpDownloader {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    timeout: Duration,
    files: Vec<RemoteFile>,
    stream: Option<AsyncFtpStream>,
    retry_policy: RetryPolicy,
}

impl FtpDownloader {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        FtpDownloader {
            host: host.into(),
            port,
            credentials: None,
            timeout: Duration::from_secs(300),
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
            stream.set_mode(Mode::Passive);
            self.stream = Some(stream);
        }
        Ok(self.stream.as_mut().unwrap())
    }
}

#[async_trait]
impl Downloader for FtpDownloader {
    fn set_credentials(&mut self, userpwd: Option<String>) {
        self.credentials = userpwd.and_then(|s| {
            s.split_once(':').map(|(u, p)| (u.to_string(), p.to_string()))
        });
    }

    fn set_proxy(&mut self, _url: Option<String>, _auth: Option<String>) {}

    fn set_timeout(&mut self, seconds: u64) {
        self.timeout = Duration::from_secs(seconds);
    }

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

    #[instrument(name = "ftp_list", skip(self), fields(host = %self.host))]
    async fn list(&mut self, subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)> {
        let stream = self.ensure_connected().await?;

        if !subdir.is_empty() {
            stream
                .cwd(subdir)
                .await
                .map_err(|e| DownloadError::Network(format!("cwd {subdir}: {e}")))?;
        }

        let lines = stream
            .list(None)
            .await
            .map_err(|e| DownloadError::Network(format!("LIST: {e}")))?;

        let today = Local::now().date_naive();
        let mut files = Vec::new();
        let mut dirs = Vec::new();

        let text = lines.join("\n");
        for (raw_line, parsed) in parse_listing_with_raw(&text) {
            if parsed.name == "." || parsed.name == ".." {
                continue;
            }
            let rf = entry_to_remote_file(&parsed, raw_line, today);
            if parsed.is_dir {
                dirs.push(rf);
            } else {
                files.push(rf);
            }
        }

        Ok((files, dirs))
    }

    #[instrument(name = "ftp_download", skip(self, local_dir))]
    async fn download(&mut self, local_dir: &Path, keep_dirs: bool) -> Result<Vec<RemoteFile>> {
        let files = self.files.clone();
        let mut results = Vec::with_capacity(files.len());

        for file in files {
            let save_as = file.effective_save_as();
            let dest = if keep_dirs {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_split_on_colon() {
        let mut dl = FtpDownloader::new("ftp.example.org", 21);
        dl.set_credentials(Some("user:pass".to_string()));
        assert_eq!(dl.credentials, Some(("user".to_string(), "pass".to_string())));
    }

    #[test]
    fn save_as_defaults_are_filled_on_set_files_to_download() {
        let mut dl = FtpDownloader::new("ftp.example.org", 21);
        dl.set_files_to_download(vec![RemoteFile::new("a/b.txt", "/pub")]);
        assert_eq!(dl.files[0].save_as.as_deref(), Some("a/b.txt"));
    }
}
