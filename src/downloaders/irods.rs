//! iRODS downloader (spec §4.1 irods row): shells out to the `icommands`
//! CLI (`ils`, `iget`) rather than linking against the iRODS client
//! library, since no maintained pure-Rust iRODS client crate exists.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::instrument;

use crate::domain::models::{RemoteFile, RetryPolicy};
use crate::domain::ports::downloader::{Downloader, HttpMethod};
use crate::domain::services::retry::run_with_retry;
use crate::downloaders::local::ensure_dir_exists;
use crate::error::{DownloadError, Result};

pub struct IrodsDownloader {
    zone: String,
    collection: String,
    files: Vec<RemoteFile>,
    retry_policy: RetryPolicy,
}

impl IrodsDownloader {
    pub fn new(zone: impl Into<String>, collection: impl Into<String>) -> Self {
        IrodsDownloader {
            zone: zone.into(),
            collection: collection.into(),
            files: Vec::new(),
            retry_policy: RetryPolicy::default(),
        }
    }

    fn collection_path(&self, subdir: &str) -> String {
        if subdir.is_empty() {
            self.collection.clone()
        } else {
            format!("{}/{}", self.collection.trim_end_matches('/'), subdir.trim_start_matches('/'))
        }
    }
}

/// Parses one row of `ils -l` output, e.g.
/// `  alice     0 resc   1234 2020-01-02.03:04 & readme.txt`.
fn parse_ils_line(line: &str) -> Option<RemoteFile> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }
    let owner = fields[0];
    let size: u64 = fields[3].parse().ok()?;
    let timestamp = fields[4];
    let name_idx = fields.iter().position(|f| *f == "&").map(|i| i + 1).unwrap_or(5);
    if name_idx >= fields.len() {
        return None;
    }
    let name = fields[name_idx..].join(" ");

    let mut f = RemoteFile::new(&name, "");
    f.size = Some(size);
    f.owner = Some(owner.to_string());

    if let Some((date, time)) = timestamp.split_once('.') {
        use chrono::Datelike;
        if let Ok(dt) = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            f.year = Some(dt.year());
            f.month = Some(dt.month());
            f.day = Some(dt.day());
        }
        let _ = time;
    }

    Some(f)
}

fn classify_stderr(stderr: &str) -> Option<String> {
    if stderr.contains("ERROR:") || stderr.contains("USER_") || stderr.contains("SYS_") {
        Some(stderr.trim().to_string())
    } else {
        None
    }
}

#[async_trait]
impl Downloader for IrodsDownloader {
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

    #[instrument(name = "irods_list", skip(self), fields(zone = %self.zone))]
    async fn list(&mut self, subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)> {
        let collection = self.collection_path(subdir);
        let output = Command::new("ils")
            .args(["-l", &collection])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DownloadError::Network(format!("spawning ils: {e}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            if let Some(msg) = classify_stderr(&stderr) {
                return Err(DownloadError::Network(msg));
            }
            return Err(DownloadError::Network(format!("ils exited with {}", output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut files = Vec::new();
        let dirs = Vec::new();
        for line in stdout.lines().skip(1) {
            let trimmed = line.trim_start();
            if trimmed.starts_with("C- ") {
                continue;
            }
            if let Some(entry) = parse_ils_line(line) {
                files.push(entry);
            }
        }

        Ok((files, dirs))
    }

    #[instrument(name = "irods_download", skip(self, local_dir))]
    async fn download(&mut self, local_dir: &Path, _keep_dirs: bool) -> Result<Vec<RemoteFile>> {
        ensure_dir_exists(local_dir)?;
        let mut results = Vec::with_capacity(self.files.len());

        for file in self.files.clone() {
            let collection = self.collection_path(&file.name);
            let dest = local_dir.join(file.effective_save_as());
            if let Some(parent) = dest.parent() {
                ensure_dir_exists(parent)?;
            }

            let start = std::time::Instant::now();
            let (attempt, _stats) = run_with_retry(&self.retry_policy, &|_| false, |_attempt| {
                let collection = collection.clone();
                let dest = dest.clone();
                async move {
                    let output = Command::new("iget")
                        .args(["-f", &collection])
                        .arg(&dest)
                        .stdout(Stdio::piped())
                        .stderr(Stdio::piped())
                        .output()
                        .await
                        .map_err(|e| DownloadError::Network(format!("spawning iget: {e}")))?;

                    let stderr = String::from_utf8_lossy(&output.stderr);
                    if !output.status.success() {
                        if let Some(msg) = classify_stderr(&stderr) {
                            return Err(DownloadError::Network(msg));
                        }
                        return Err(DownloadError::Network(format!("iget exited with {}", output.status)));
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
    fn parses_ils_long_listing_line() {
        let line = "  alice     0 demoResc   1234 2020-01-02.03:04 & readme.txt";
        let f = parse_ils_line(line).unwrap();
        assert_eq!(f.name, "readme.txt");
        assert_eq!(f.size, Some(1234));
        assert_eq!(f.owner.as_deref(), Some("alice"));
        assert_eq!(f.year, Some(2020));
        assert_eq!(f.month, Some(1));
        assert_eq!(f.day, Some(2));
    }

    #[test]
    fn classifies_irods_error_markers() {
        assert!(classify_stderr("ERROR: getUtil failed").is_some());
        assert!(classify_stderr("remote addresses: USER_FILE_DOES_NOT_EXIST").is_some());
        assert!(classify_stderr("unrelated noise").is_none());
    }

    #[test]
    fn collection_path_joins_subdir() {
        let dl = IrodsDownloader::new("tempZone", "/tempZone/home/alice/bank");
        assert_eq!(dl.collection_path(""), "/tempZone/home/alice/bank");
        assert_eq!(dl.collection_path("sub"), "/tempZone/home/alice/bank/sub");
    }
}
