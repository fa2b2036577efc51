//! rsync downloader (spec §4.1 rsync row): shells out to the system
//! `rsync` binary rather than reimplementing the rsync wire protocol.
//! `--list-only --no-motd` drives listing; transfer uses a plain
//! `rsync <src> <dest>` invocation. Errors are classified by stderr markers
//! ("rsync:", "rsync error").

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::process::Command;
use tracing::instrument;

use crate::domain::models::{RemoteFile, RetryPolicy};
use crate::domain::ports::downloader::{Downloader, HttpMethod};
use crate::domain::services::retry::run_with_retry;
use crate::downloaders::local::ensure_dir_exists;
use crate::error::{DownloadError, Result};

pub struct RsyncDownloader {
    host: String,
    module: String,
    files: Vec<RemoteFile>,
    retry_policy: RetryPolicy,
}

impl RsyncDownloader {
    pub fn new(host: impl Into<String>, module: impl Into<String>) -> Self {
        RsyncDownloader {
            host: host.into(),
            module: module.into(),
            files: Vec::new(),
            retry_policy: RetryPolicy::default(),
        }
    }

    fn remote_spec(&self, subpath: &str) -> String {
        format!("{}::{}/{}", self.host, self.module, subpath.trim_start_matches('/'))
    }
}

fn classify_stderr(stderr: &str) -> Option<String> {
    if stderr.contains("rsync error") || stderr.contains("rsync:") {
        Some(stderr.trim().to_string())
    } else {
        None
    }
}

/// Parses one line of `rsync --list-only` output, e.g.
/// `-rw-r--r--       1234 2020/01/02 03:04:05 readme.txt`.
pub fn parse_rsync_list_line(line: &str) -> Option<RemoteFile> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }
    let permissions = fields[0];
    let is_dir = permissions.starts_with('d');
    let size: u64 = fields[1].parse().ok()?;
    let date = fields[2];
    let time = fields[3];
    let name = fields[4..].join(" ");

    let mut f = RemoteFile::new(&name, "");
    if !is_dir {
        f.size = Some(size);
    }
    f.permissions = Some(permissions.to_string());

    let dt = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y/%m/%d %H:%M:%S").ok();
    if let Some(dt) = dt {
        use chrono::Datelike;
        f.year = Some(dt.year());
        f.month = Some(dt.month());
        f.day = Some(dt.day());
    }

    Some(f)
}

#[async_trait]
impl Downloader for RsyncDownloader {
    fn set_credentials(&mut self, _userpwd: Option<String>) {}
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

    #[instrument(name = "rsync_list", skip(self), fields(host = %self.host))]
    async fn list(&mut self, subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)> {
        let remote = self.remote_spec(subdir);
        let output = Command::new("rsync")
            .args(["--list-only", "--no-motd", &remote])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DownloadError::Network(format!("spawning rsync: {e}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            if let Some(msg) = classify_stderr(&stderr) {
                return Err(DownloadError::Network(msg));
            }
            return Err(DownloadError::Network(format!(
                "rsync --list-only exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for line in stdout.lines() {
            if let Some(entry) = parse_rsync_list_line(line) {
                if entry.name == "." {
                    continue;
                }
                if line.starts_with('d') {
                    dirs.push(entry);
                } else {
                    files.push(entry);
                }
            }
        }

        Ok((files, dirs))
    }

    #[instrument(name = "rsync_download", skip(self, local_dir))]
    async fn download(&mut self, local_dir: &Path, _keep_dirs: bool) -> Result<Vec<RemoteFile>> {
        ensure_dir_exists(local_dir)?;
        let mut results = Vec::with_capacity(self.files.len());

        for file in self.files.clone() {
            let remote = self.remote_spec(&file.name);
            let dest = local_dir.join(file.effective_save_as());
            if let Some(parent) = dest.parent() {
                ensure_dir_exists(parent)?;
            }

            let start = std::time::Instant::now();
            let (attempt, _stats) = run_with_retry(&self.retry_policy, &|_| false, |_attempt| {
                let remote = remote.clone();
                let dest = dest.clone();
                async move {
                    let output = Command::new("rsync")
                        .arg(&remote)
                        .arg(&dest)
                        .stdout(Stdio::piped())
                        .stderr(Stdio::piped())
                        .output()
                        .await
                        .map_err(|e| DownloadError::Network(format!("spawning rsync: {e}")))?;

                    let stderr = String::from_utf8_lossy(&output.stderr);
                    if !output.status.success() {
                        if let Some(msg) = classify_stderr(&stderr) {
                            return Err(DownloadError::Network(msg));
                        }
                        return Err(DownloadError::Network(format!("rsync exited with {}", output.status)));
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

    #[test]
    fn parses_list_only_line() {
        let line = "-rw-r--r--       1234 2020/01/02 03:04:05 readme.txt";
        let f = parse_rsync_list_line(line).unwrap();
        assert_eq!(f.name, "readme.txt");
        assert_eq!(f.size, Some(1234));
        assert_eq!(f.year, Some(2020));
        assert_eq!(f.month, Some(1));
        assert_eq!(f.day, Some(2));
    }

    #[test]
    fn classifies_rsync_error_markers() {
        assert!(classify_stderr("rsync error: some failure (code 23)").is_some());
        assert!(classify_stderr("rsync: connection unexpectedly closed").is_some());
        assert!(classify_stderr("unrelated noise").is_none());
    }
}
