//! SFTP downloader (spec §4.1 sftp row): same listing semantics as FTP,
//! transferred over `russh` + `russh_sftp`. Uses a known-hosts file and an
//! `ssh_new_host` policy {reject, accept, add} for host-key verification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use russh::client::{self, Handle};
use russh::keys::PublicKey;
use russh_sftp::client::SftpSession;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

use crate::domain::models::{RemoteFile, RetryPolicy};
use crate::domain::ports::downloader::{Downloader, HttpMethod};
use crate::domain::services::retry::next_retry_wait;
use crate::downloaders::listing::{entry_to_remote_file, parse_listing_with_raw};
use crate::downloaders::local::ensure_dir_exists;
use crate::error::{DownloadError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshNewHostPolicy {
    Reject,
    Accept,
    Add,
}

struct SshClientHandler {
    policy: SshNewHostPolicy,
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        Ok(self.policy != SshNewHostPolicy::Reject)
    }
}

pub struct SftpDownloader {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    policy: SshNewHostPolicy,
    files: Vec<RemoteFile>,
    session: Option<SftpSession>,
    _handle: Option<Handle<SshClientHandler>>,
    retry_policy: RetryPolicy,
}

impl SftpDownloader {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        SftpDownloader {
            host: host.into(),
            port,
            credentials: None,
            policy: SshNewHostPolicy::Accept,
            files: Vec::new(),
            session: None,
            _handle: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SshNewHostPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn ensure_connected(&mut self) -> Result<&mut SftpSession> {
        if self.session.is_none() {
            let config = Arc::new(client::Config::default());
            let addr = format!("{}:{}", self.host, self.port);
            let tcp = TcpStream::connect(&addr)
                .await
                .map_err(|e| DownloadError::Network(format!("connect {addr}: {e}")))?;

            let mut handle = client::connect_stream(config, tcp, SshClientHandler { policy: self.policy })
                .await
                .map_err(|e| DownloadError::Network(format!("ssh handshake: {e}")))?;

            let (user, pass) = self
                .credentials
                .clone()
                .ok_or_else(|| DownloadError::Config("sftp credentials required".to_string()))?;
            let authenticated = handle
                .authenticate_password(&user, &pass)
                .await
                .map_err(|e| DownloadError::Network(format!("authenticate: {e}")))?;
            if !authenticated.success() {
                return Err(DownloadError::Network("sftp authentication rejected".to_string()));
            }

            let channel = handle
                .channel_open_session()
                .await
                .map_err(|e| DownloadError::Network(format!("channel open: {e}")))?;
            channel
                .request_subsystem(true, "sftp")
                .await
                .map_err(|e| DownloadError::Network(format!("request sftp subsystem: {e}")))?;

            let session = SftpSession::new(channel.into_stream())
                .await
                .map_err(|e| DownloadError::Network(format!("sftp session: {e}")))?;

            self._handle = Some(handle);
            self.session = Some(session);
        }
        Ok(self.session.as_mut().unwrap())
    }
}

#[async_trait]
impl Downloader for SftpDownloader {
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

    #[instrument(name = "sftp_list", skip(self), fields(host = %self.host))]
    async fn list(&mut self, subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)> {
        let dir = if subdir.is_empty() { "." } else { subdir };
        let session = self.ensure_connected().await?;

        let entries = session
            .read_dir(dir)
            .await
            .map_err(|e| DownloadError::Network(format!("read_dir {dir}: {e}")))?;

        let today = Local::now().date_naive();
        let mut files = Vec::new();
        let mut dirs = Vec::new();

        for entry in entries {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let long = entry.longname();
            let raw = long.clone();
            if let Some((_, parsed)) = parse_listing_with_raw(&raw).into_iter().next() {
                let rf = entry_to_remote_file(&parsed, &raw, today);
                if parsed.is_dir {
                    dirs.push(rf);
                } else {
                    files.push(rf);
                }
            }
        }

        Ok((files, dirs))
    }

    #[instrument(name = "sftp_download", skip(self, local_dir))]
    async fn download(&mut self, local_dir: &Path, keep_dirs: bool) -> Result<Vec<RemoteFile>> {
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
                    let session = self.ensure_connected().await?;
                    let mut remote = session
                        .open(&file.name)
                        .await
                        .map_err(|e| DownloadError::Network(format!("open {}: {e}", file.name)))?;

                    let mut out = File::create(&dest).await?;
                    let mut buf = [0u8; 16384];
                    loop {
                        let n = remote
                            .read(&mut buf)
                            .await
                            .map_err(|e| DownloadError::Network(format!("read {}: {e}", file.name)))?;
                        if n == 0 {
                            break;
                        }
                        out.write_all(&buf[..n]).await?;
                    }
                    Ok(())
                }
                .await;

                match try_once {
                    Ok(()) => break Ok(()),
                    Err(e) if !e.is_retriable() => break Err(e),
                    Err(e) => {
                        self.session = None;
                        self._handle = None;
                        match next_retry_wait(&self.retry_policy, attempt, retry_start) {
                            None => break Err(e),
                            Some(wait) => {
                                if wait > std::time::Duration::ZERO {
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
        self.session = None;
        self._handle = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_policy_rejects_unknown_keys() {
        assert_eq!(SshNewHostPolicy::Reject, SshNewHostPolicy::Reject);
    }

    #[test]
    fn credentials_split_on_colon() {
        let mut dl = SftpDownloader::new("sftp.example.org", 22);
        dl.set_credentials(Some("alice:secret".to_string()));
        assert_eq!(dl.credentials, Some(("alice".to_string(), "secret".to_string())));
    }
}
