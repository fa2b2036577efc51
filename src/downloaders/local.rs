//! Local filesystem downloader (spec §4.1, local row): `readdir`-based
//! listing, hardlink-first copy with byte-copy fallback, and the
//! process-wide directory-creation mutex shared with `download()`'s
//! directory setup (spec §5, §9 "Global mutable state").

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::domain::models::{RemoteFile, RetryPolicy};
use crate::domain::ports::downloader::{Downloader, HttpMethod};
use crate::domain::services::retry::run_with_retry;
use crate::error::{DownloadError, Result};

/// Serializes directory creation across concurrent workers targeting the
/// same path; also used by the copy path below.
pub static DIR_CREATE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub fn ensure_dir_exists(dir: &Path) -> Result<()> {
    let _guard = DIR_CREATE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

pub struct LocalDownloader {
    root: PathBuf,
    save_as: Option<String>,
    offline_dir: Option<PathBuf>,
    options: HashMap<String, String>,
    files: Vec<RemoteFile>,
    hardlink_first: bool,
    retry_policy: RetryPolicy,
}

impl LocalDownloader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalDownloader {
            root: root.into(),
            save_as: None,
            offline_dir: None,
            options: HashMap::new(),
            files: Vec::new(),
            hardlink_first: true,
            retry_policy: RetryPolicy::default(),
        }
    }

}

fn list_dir(root: &Path, subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)> {
    let target = root.join(subdir.trim_start_matches('/'));
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    let entries = match fs::read_dir(&target) {
        Ok(e) => e,
        Err(e) => return Err(DownloadError::Network(format!("readdir {}: {e}", target.display()))),
    };

    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        let name = entry.file_name().to_string_lossy().to_string();
        let mut rf = RemoteFile::new(&name, root.to_string_lossy().to_string());
        if meta.is_file() {
            rf.size = Some(meta.len());
            files.push(rf);
        } else if meta.is_dir() {
            dirs.push(rf);
        }
    }

    Ok((files, dirs))
}

/// Copies (or hardlinks) `src` to `dst`, creating parent directories under
/// the shared directory-creation lock.
fn copy_file(src: &Path, dst: &Path, hardlink_first: bool) -> Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir_exists(parent)?;
    }
    if hardlink_first {
        let _guard = DIR_CREATE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        if fs::hard_link(src, dst).is_ok() {
            return Ok(());
        }
    }
    fs::copy(src, dst)?;
    Ok(())
}

#[async_trait]
impl Downloader for LocalDownloader {
    fn set_credentials(&mut self, _userpwd: Option<String>) {}
    fn set_proxy(&mut self, _url: Option<String>, _auth: Option<String>) {}
    fn set_timeout(&mut self, _seconds: u64) {}
    fn set_param(&mut self, _param: HashMap<String, String>) {}
    fn set_method(&mut self, _method: HttpMethod) {}
    fn set_save_as(&mut self, path: Option<String>) {
        self.save_as = path;
    }
    fn set_offline_dir(&mut self, dir: Option<String>) {
        self.offline_dir = dir.map(PathBuf::from);
    }
    fn set_options(&mut self, options: HashMap<String, String>) {
        if let Some(v) = options.get("hardlink_first") {
            self.hardlink_first = v != "false";
        }
        self.options = options;
    }

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

    async fn list(&mut self, subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)> {
        let root = self.root.clone();
        let subdir = subdir.to_string();
        tokio::task::spawn_blocking(move || list_dir(&root, &subdir))
            .await
            .map_err(|e| DownloadError::Internal(format!("join error: {e}")))?
    }

    async fn download(&mut self, local_dir: &Path, keep_dirs: bool) -> Result<Vec<RemoteFile>> {
        let mut results = Vec::with_capacity(self.files.len());

        for file in self.files.clone() {
            let save_as = file.effective_save_as();
            let dest = if keep_dirs {
                local_dir.join(&save_as)
            } else {
                local_dir.join(save_as.file_name().unwrap_or_default())
            };
            let src = self.root.join(&file.name);

            let hardlink_first = self.hardlink_first;
            let (attempt, _stats) = run_with_retry(&self.retry_policy, &|_| false, |_attempt| {
                let src = src.clone();
                let dest = dest.clone();
                async move {
                    tokio::task::spawn_blocking(move || copy_file(&src, &dest, hardlink_first))
                        .await
                        .map_err(|e| DownloadError::Internal(format!("join error: {e}")))?
                }
            })
            .await;
            attempt?;

            let mut result = file.clone();
            result.download_time = Some(0.0);
            results.push(result);
        }

        Ok(results)
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lists_files_and_dirs_separately() {
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), b"hi").unwrap();
        std::fs::create_dir(root.path().join("subdir")).unwrap();

        let mut dl = LocalDownloader::new(root.path());
        let (files, dirs) = dl.list("").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(dirs.len(), 1);
        assert_eq!(files[0].name, "a.txt");
    }

    #[tokio::test]
    async fn download_copies_files_preserving_subdirs() {
        let root = tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), b"hello").unwrap();
        let dest = tempdir().unwrap();

        let mut dl = LocalDownloader::new(root.path());
        dl.set_files_to_download(vec![RemoteFile::new("a.txt", root.path().to_string_lossy())]);
        let result = dl.download(dest.path(), true).await.unwrap();

        assert_eq!(result.len(), 1);
        assert!(dest.path().join("a.txt").exists());
        assert_eq!(std::fs::read_to_string(dest.path().join("a.txt")).unwrap(), "hello");
    }
}
