//! Download service (C5, spec §4.5): builds a protocol downloader from a
//! `DownloadJob`, runs list/download under the matcher and retry policy,
//! and drives the session store's progress/error bookkeeping.

use std::path::Path;
use std::sync::Arc;

use chrono::TimeZone;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::domain::models::{RemoteFile, RetryPolicy};
use crate::domain::ports::downloader::{Downloader, HttpMethod as DownloaderHttpMethod};
use crate::domain::ports::queue::Queue;
use crate::domain::ports::session_store::SessionStore;
use crate::domain::services::matcher::{match_patterns, Lister};
use crate::downloaders::{
    DirectFtpDownloader, DirectHttpDownloader, FtpDownloader, HttpDownloader, IrodsDownloader, LocalDownloader,
    RsyncDownloader, SftpDownloader,
};
use crate::error::{DownloadError, Result};
use crate::message::{DownloadJob, HttpMethod, Operation, OperationKind, Protocol};

/// Adapts any `Downloader` to the matcher's narrower `Lister` interface.
struct DownloaderLister<'a>(&'a mut dyn Downloader);

#[async_trait::async_trait]
impl<'a> Lister for DownloaderLister<'a> {
    async fn list(&mut self, subdir: &str) -> Result<(Vec<RemoteFile>, Vec<RemoteFile>)> {
        self.0.list(subdir).await
    }
}

fn default_port(protocol: &Protocol) -> u16 {
    match protocol {
        Protocol::Ftp | Protocol::DirectFtp => 21,
        Protocol::Ftps | Protocol::DirectFtps => 990,
        Protocol::Http | Protocol::DirectHttp => 80,
        Protocol::Https | Protocol::DirectHttps => 443,
        Protocol::Sftp => 22,
        Protocol::Local | Protocol::Rsync | Protocol::Irods => 0,
    }
}

fn split_host_port(server: &str, protocol: &Protocol) -> (String, u16) {
    match server.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
            (host.to_string(), port.parse().unwrap_or_else(|_| default_port(protocol)))
        }
        _ => (server.to_string(), default_port(protocol)),
    }
}

/// Builds the protocol adapter for a job's `remote_file`. Credentials,
/// proxy, method, save_as, offline_dir, options, retry policy and the file
/// list are all applied from the job before returning.
pub fn build_downloader(job: &DownloadJob, retry_policy: RetryPolicy) -> Result<Box<dyn Downloader>> {
    let spec = &job.remote_file;
    let (host, port) = split_host_port(&spec.server, &spec.protocol);

    let mut downloader: Box<dyn Downloader> = match spec.protocol {
        Protocol::Ftp | Protocol::Ftps => Box::new(FtpDownloader::new(host, port)),
        Protocol::DirectFtp | Protocol::DirectFtps => Box::new(DirectFtpDownloader::new(host, port)),
        Protocol::Http | Protocol::Https => {
            let mut dl = HttpDownloader::new(spec.server.clone());
            if let Some(parse) = spec.http_parse.clone() {
                dl = dl.with_http_parse(parse);
            }
            Box::new(dl)
        }
        Protocol::DirectHttp | Protocol::DirectHttps => Box::new(DirectHttpDownloader::new()),
        Protocol::Local => Box::new(LocalDownloader::new(spec.server.clone())),
        Protocol::Rsync => Box::new(RsyncDownloader::new(host, spec.remote_dir.clone())),
        Protocol::Irods => Box::new(IrodsDownloader::new(host, spec.remote_dir.clone())),
        Protocol::Sftp => Box::new(SftpDownloader::new(host, port)),
    };

    downloader.set_credentials(spec.credentials.clone());
    if let Some(proxy) = &job.proxy {
        downloader.set_proxy(Some(proxy.proxy.clone()), proxy.proxy_auth.clone());
    }
    if let Some(timeout) = job.timeout_download {
        downloader.set_timeout(timeout);
    }
    downloader.set_param(spec.param.iter().cloned().collect());
    downloader.set_method(match job.http_method {
        HttpMethod::Get => DownloaderHttpMethod::Get,
        HttpMethod::Post => DownloaderHttpMethod::Post,
    });
    downloader.set_save_as(spec.save_as.clone());
    downloader.set_options(job.options.clone());
    downloader.set_retry_policy(retry_policy);
    downloader.set_files_to_download(spec.files.clone());

    Ok(downloader)
}

pub struct DownloadService {
    pub session_store: Arc<dyn SessionStore>,
    pub queue: Arc<dyn Queue>,
    pub retry_policy: RetryPolicy,
}

impl DownloadService {
    pub fn new(session_store: Arc<dyn SessionStore>, queue: Arc<dyn Queue>, retry_policy: RetryPolicy) -> Self {
        DownloadService {
            session_store,
            queue,
            retry_policy,
        }
    }

    pub async fn create_session(&self, bank: &str) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        self.session_store.create_session(bank, &session_id).await?;
        Ok(session_id)
    }

    pub async fn clean(&self, bank: &str, session_id: &str) -> Result<()> {
        self.session_store.clean(bank, session_id).await
    }

    pub async fn ask_download(&self, job: DownloadJob, kind: OperationKind) -> Result<()> {
        let operation = Operation {
            kind,
            download: job,
            trace: None,
        };
        self.queue.publish(&operation).await
    }

    /// `list_op` (spec §4.5): list the remote, apply the job's match
    /// patterns, persist the result, and always increment `progress` —
    /// even when the handler fails.
    #[instrument(name = "list_op", skip(self, job), fields(bank = %job.bank, session = %job.session))]
    pub async fn list_op(&self, job: &DownloadJob) -> Result<()> {
        if !self.session_store.is_alive(&job.bank, &job.session).await? {
            return Ok(());
        }

        let result = self.run_list(job).await;

        match result {
            Ok(files) => {
                self.session_store.set_files(&job.bank, &job.session, &files).await?;
            }
            Err(e) => {
                error!(error = %e, "list_op failed");
                self.session_store.incr_error(&job.bank, &job.session).await?;
                self.session_store
                    .push_error_info(&job.bank, &job.session, &e.to_string())
                    .await?;
            }
        }
        self.session_store.incr_progress(&job.bank, &job.session).await?;
        Ok(())
    }

    async fn run_list(&self, job: &DownloadJob) -> Result<Vec<RemoteFile>> {
        let mut downloader = build_downloader(job, self.retry_policy.clone())?;
        let (files, dirs) = downloader.list("").await?;
        let matched = {
            let mut lister = DownloaderLister(downloader.as_mut());
            match_patterns(&mut lister, &job.remote_file.matches, &files, &dirs, "", false).await?
        };
        downloader.close().await;
        Ok(matched)
    }

    /// `download_op` (spec §4.5): run the downloader's transfer under the
    /// retry policy, enrich results with local stat metadata, increment
    /// `progress` exactly once regardless of outcome. Returns `true` iff
    /// the job recorded an error, so embedded callers (the local-mode
    /// client) can aggregate failure without re-querying the session store.
    #[instrument(name = "download_op", skip(self, job, on_download), fields(bank = %job.bank, session = %job.session))]
    pub async fn download_op<F>(&self, job: &DownloadJob, on_download: Option<F>) -> Result<bool>
    where
        F: Fn(&str, &[RemoteFile]) + Send + Sync,
    {
        if !self.session_store.is_alive(&job.bank, &job.session).await? {
            return Ok(false);
        }

        let result = self.run_download(job).await;

        let had_error = match result {
            Ok(files) => {
                if let Some(cb) = on_download {
                    cb(&job.bank, &files);
                }
                false
            }
            Err(e) => {
                error!(error = %e, "download_op failed");
                self.session_store.incr_error(&job.bank, &job.session).await?;
                self.session_store
                    .push_error_info(&job.bank, &job.session, &e.to_string())
                    .await?;
                true
            }
        };
        self.session_store.incr_progress(&job.bank, &job.session).await?;
        Ok(had_error)
    }

    /// Builds one downloader for the whole job and lets it retry internally,
    /// per file, under `self.retry_policy` (installed via `set_retry_policy`
    /// in `build_downloader`) — this is the retry granularity `Downloader`'s
    /// contract documents, rather than re-running every file in the job from
    /// scratch when only the last one failed.
    async fn run_download(&self, job: &DownloadJob) -> Result<Vec<RemoteFile>> {
        let local_dir = Path::new(&job.local_dir).to_path_buf();
        let skip_check_uncompress = job
            .options
            .get("skip_check_uncompress")
            .map(|v| v == "true")
            .unwrap_or(false);

        let mut downloader = build_downloader(job, self.retry_policy.clone())?;
        let files = downloader.download(&local_dir, true).await?;
        downloader.close().await;

        for f in &files {
            let path = local_dir.join(f.effective_save_as());
            crate::downloaders::archive_probe::probe_and_cleanup(&path, skip_check_uncompress).await?;
            restore_mtime(&path, f);
        }

        let mut enriched = Vec::with_capacity(files.len());
        for mut f in files {
            let path = local_dir.join(f.effective_save_as());
            if let Ok(meta) = std::fs::metadata(&path) {
                f.size = Some(meta.len());
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    f.permissions = Some(format!("{:o}", meta.permissions().mode() & 0o7777));
                }
            }
            enriched.push(f);
        }
        Ok(enriched)
    }

    /// `wait_for_messages` (spec §4.5 state machine): decode, dispatch,
    /// ack. Acks unconditionally, even on handler error, to avoid
    /// poison-message redelivery loops; the error is already recorded in
    /// the session by `list_op`/`download_op`.
    pub async fn wait_for_messages(&self) -> Result<()> {
        loop {
            let delivery = self.queue.next_delivery().await?;
            let operation = delivery.operation.clone();

            let handled = match operation.kind {
                OperationKind::List => self.list_op(&operation.download).await,
                OperationKind::Download => {
                    self.download_op(&operation.download, None::<fn(&str, &[RemoteFile])>).await.map(|_| ())
                }
                OperationKind::Process => Err(DownloadError::Internal("PROCESS operation not supported".to_string())),
            };

            if let Err(e) = handled {
                error!(error = %e, "unhandled error dispatching operation");
            }

            delivery.ack().await?;
        }
    }
}

/// Sets a freshly downloaded file's mtime to `(year, month, day)` at
/// midnight local time (spec §3 invariant). Best-effort: a missing path or
/// unset date fields leave the file's mtime untouched.
fn restore_mtime(path: &std::path::Path, file: &RemoteFile) {
    let Some(naive) = file.mtime() else { return };
    let Some(local) = chrono::Local.from_local_datetime(&naive).single() else {
        return;
    };
    let system_time: std::time::SystemTime = local.into();
    if let Ok(f) = std::fs::File::open(path) {
        let _ = f.set_modified(system_time);
    }
}
