//! Download client (C7, spec §4.7): two submission modes over the same
//! polling/cancellation machinery. Remote mode publishes one job per file
//! to the queue; local mode drains an in-memory pool with a bounded worker
//! group.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::domain::models::RemoteFile;
use crate::domain::ports::queue::Queue;
use crate::domain::ports::session_store::SessionStore;
use crate::error::{DownloadError, Result};
use crate::message::{DownloadJob, HttpMethod, ProxySpec, RemoteFileSpec};
use crate::service::download_service::DownloadService;

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_LOCAL_WORKERS: usize = 5;

/// One per-file job constructed from a matched `RemoteFile`, copying the
/// owning downloader's protocol/server/credentials (spec §4.7).
fn job_for_file(
    bank: &str,
    session: &str,
    local_dir: &str,
    base_spec: &RemoteFileSpec,
    file: RemoteFile,
    proxy: Option<ProxySpec>,
    http_method: HttpMethod,
    timeout_download: Option<u64>,
) -> DownloadJob {
    DownloadJob {
        bank: bank.to_string(),
        session: session.to_string(),
        local_dir: local_dir.to_string(),
        timeout_download,
        remote_file: RemoteFileSpec {
            protocol: base_spec.protocol.clone(),
            server: base_spec.server.clone(),
            remote_dir: base_spec.remote_dir.clone(),
            save_as: file.save_as.clone(),
            files: vec![file],
            param: base_spec.param.clone(),
            matches: Vec::new(),
            http_parse: base_spec.http_parse.clone(),
            credentials: base_spec.credentials.clone(),
        },
        proxy,
        http_method,
        options: Default::default(),
    }
}

/// Remote-mode client: publishes DOWNLOAD jobs to the queue, optionally
/// rate-limiting the number of jobs in flight.
pub struct RemoteDownloadClient {
    queue: Arc<dyn Queue>,
    session_store: Arc<dyn SessionStore>,
    rate_limit: Option<usize>,
    pending: Mutex<Vec<DownloadJob>>,
    submitted: AtomicU64,
}

impl RemoteDownloadClient {
    pub fn new(queue: Arc<dyn Queue>, session_store: Arc<dyn SessionStore>, rate_limit: Option<usize>) -> Self {
        RemoteDownloadClient {
            queue,
            session_store,
            rate_limit,
            pending: Mutex::new(Vec::new()),
            submitted: AtomicU64::new(0),
        }
    }

    /// `download_remote_files`: constructs one DOWNLOAD job per matched
    /// file and either publishes immediately or queues it in the pending
    /// pool when `rate_limit` is set.
    pub async fn download_remote_files(
        &self,
        bank: &str,
        session: &str,
        local_dir: &str,
        base_spec: &RemoteFileSpec,
        files: Vec<RemoteFile>,
        proxy: Option<ProxySpec>,
        http_method: HttpMethod,
        timeout_download: Option<u64>,
    ) -> Result<()> {
        let jobs: Vec<DownloadJob> = files
            .into_iter()
            .map(|f| {
                job_for_file(
                    bank,
                    session,
                    local_dir,
                    base_spec,
                    f,
                    proxy.clone(),
                    http_method,
                    timeout_download,
                )
            })
            .collect();

        if self.rate_limit.is_some() {
            self.pending.lock().await.extend(jobs);
        } else {
            for job in jobs {
                self.publish(job).await?;
            }
        }
        Ok(())
    }

    async fn publish(&self, job: DownloadJob) -> Result<()> {
        use crate::message::{Operation, OperationKind};
        self.queue
            .publish(&Operation {
                kind: OperationKind::Download,
                download: job,
                trace: None,
            })
            .await?;
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// `wait_for_download`: polls `progress`/`error` every ~10s, submitting
    /// from the pending pool to keep at most `rate_limit` jobs in flight,
    /// and checking `action:cancel` each iteration. Returns true iff at
    /// least one error occurred.
    pub async fn wait_for_download(&self, bank: &str, session: &str, total_expected: u64) -> Result<bool> {
        let mut last_reported_percent = 0u64;

        loop {
            if self.session_store.take_cancel(bank).await? {
                return Err(DownloadError::Canceled);
            }

            if let Some(limit) = self.rate_limit {
                let in_flight = self.submitted.load(Ordering::SeqCst) - self.session_store.progress(bank, session).await?;
                if (in_flight as usize) < limit {
                    let mut pending = self.pending.lock().await;
                    let take = (limit - in_flight as usize).min(pending.len());
                    let batch: Vec<DownloadJob> = pending.drain(..take).collect();
                    drop(pending);
                    for job in batch {
                        self.publish(job).await?;
                    }
                }
            }

            let progress = self.session_store.progress(bank, session).await?;
            if total_expected > 0 {
                let percent = progress * 100 / total_expected;
                if percent > last_reported_percent {
                    info!(bank, session, percent, "download progress");
                    last_reported_percent = percent;
                }
            }

            if progress >= total_expected {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Ok(self.session_store.error_count(bank, session).await? > 0)
    }
}

/// Local-mode client: submissions go into an in-memory pool, drained by a
/// fixed-size worker group invoking the service's download handler
/// synchronously (no queue involved).
pub struct LocalDownloadClient {
    service: Arc<DownloadService>,
    workers: usize,
    pending: Mutex<Vec<DownloadJob>>,
}

impl LocalDownloadClient {
    pub fn new(service: Arc<DownloadService>, workers: Option<usize>) -> Self {
        LocalDownloadClient {
            service,
            workers: workers.unwrap_or(DEFAULT_LOCAL_WORKERS),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub async fn submit(&self, job: DownloadJob) {
        self.pending.lock().await.push(job);
    }

    /// Spins up the fixed-size worker group, drains the pool, and returns
    /// true iff any worker reported an error.
    pub async fn wait_for_download(&self) -> bool {
        let jobs = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };

        let queue = Arc::new(Mutex::new(jobs.into_iter()));
        let any_error = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut set = JoinSet::new();

        for _ in 0..self.workers {
            let queue = queue.clone();
            let service = self.service.clone();
            let any_error = any_error.clone();
            set.spawn(async move {
                loop {
                    let job = {
                        let mut q = queue.lock().await;
                        q.next()
                    };
                    let Some(job) = job else { break };
                    match service.download_op(&job, None::<fn(&str, &[RemoteFile])>).await {
                        Ok(had_error) if had_error => any_error.store(true, Ordering::SeqCst),
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "local worker job failed");
                            any_error.store(true, Ordering::SeqCst);
                        }
                    }
                }
            });
        }

        while set.join_next().await.is_some() {}
        any_error.load(Ordering::SeqCst)
    }
}
