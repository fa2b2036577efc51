use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use crate::domain::models::remote_file::RemoteFile;
use crate::domain::models::retry_policy::RetryPolicy;
use crate::error::Result;

///# Downloader
/// per-protocol object, lives for the duration of one logical operation
/// (list or batch download). Owns its network handle, credentials, options
/// and retry policy. Not shared between concurrent operations.
#[async_trait]
pub trait Downloader: Send {
    fn set_credentials(&mut self, userpwd: Option<String>);
    fn set_proxy(&mut self, url: Option<String>, auth: Option<String>);
    fn set_timeout(&mut self, seconds: u64);
    fn set_param(&mut self, param: HashMap<String, String>);
    fn set_method(&mut self, method: HttpMethod);
    fn set_save_as(&mut self, path: Option<String>);
    fn set_offline_dir(&mut self, dir: Option<String>);
    fn set_options(&mut self, options: HashMap<String, String>);

    /// Installs the policy `download()` retries each file under. Defaults
    /// to `RetryPolicy::default()` (a single attempt, no retry) until the
    /// caller sets one explicitly.
    fn set_retry_policy(&mut self, policy: RetryPolicy);

    /// Replaces the internal download list, normalizing each entry via
    /// `_append_file_to_download` semantics (fills `save_as`, collapses
    /// `//+`, sets `root` when missing).
    fn set_files_to_download(&mut self, files: Vec<RemoteFile>);

    /// One network round-trip; returns `(files, dirs)` with size/date/
    /// permissions filled. Fails with `DownloadError::Network` if the
    /// remote is unreachable or returns a non-OK code for the protocol.
    async fn list(&mut self, subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)>;

    /// Iterates the internal list, transferring each file under the retry
    /// policy set via `set_retry_policy`. Fails fast on the first file that
    /// exhausts its retries or hits a non-retriable error.
    async fn download(&mut self, local_dir: &Path, keep_dirs: bool) -> Result<Vec<RemoteFile>>;

    /// Releases the underlying network handle.
    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}
