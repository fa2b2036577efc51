//! Client entry point (C7): drives one bank download either through the
//! queue (remote mode, when `--rabbitmq-uri` is given) or with a local
//! worker pool (local mode, the default for standalone/offline use).

use std::process::ExitCode;
use std::sync::Arc;

use biomaj_download::client::{LocalDownloadClient, RemoteDownloadClient};
use biomaj_download::config::AppConfig;
use biomaj_download::domain::models::RetryPolicy;
use biomaj_download::domain::ports::session_store::SessionStore;
use biomaj_download::message::{DownloadJob, HttpMethod, Protocol, RemoteFileSpec};
use biomaj_download::service::{AmqpQueue, DownloadService, MemorySessionStore};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(version, about = "biomaj-download client", long_about = None)]
struct Args {
    /// Bank name; scopes the session in the store.
    #[arg(long)]
    bank: String,
    /// Protocol: ftp, ftps, http, https, direct-ftp, direct-ftps,
    /// direct-http, direct-https, local, rsync, irods, sftp.
    #[arg(long)]
    protocol: String,
    /// host[:port] (FTP/SFTP/rsync/iRODS) or base URL (HTTP) or root dir (local).
    #[arg(long)]
    server: String,
    /// Remote directory to list/download from.
    #[arg(long, default_value = "")]
    remote_dir: String,
    /// Regex match pattern, repeatable.
    #[arg(long = "match")]
    matches: Vec<String>,
    /// Local directory to save files into.
    #[arg(long)]
    local_dir: String,
    /// `user:password`.
    #[arg(long)]
    credentials: Option<String>,
    /// Bounded worker pool size for local mode (default 5).
    #[arg(long)]
    workers: Option<usize>,
    /// AMQP URI; when given, jobs are published to the queue instead of
    /// running against a local worker pool.
    #[arg(long, env = "BIOMAJ_RABBITMQ_URI")]
    rabbitmq_uri: Option<String>,
    /// Caps the number of in-flight jobs in remote mode.
    #[arg(long)]
    rate_limit: Option<usize>,
}

fn parse_protocol(s: &str) -> Option<Protocol> {
    Some(match s {
        "ftp" => Protocol::Ftp,
        "ftps" => Protocol::Ftps,
        "http" => Protocol::Http,
        "https" => Protocol::Https,
        "direct-ftp" => Protocol::DirectFtp,
        "direct-ftps" => Protocol::DirectFtps,
        "direct-http" => Protocol::DirectHttp,
        "direct-https" => Protocol::DirectHttps,
        "local" => Protocol::Local,
        "rsync" => Protocol::Rsync,
        "irods" => Protocol::Irods,
        "sftp" => Protocol::Sftp,
        _ => return None,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = AppConfig::load().unwrap_or_default();
    biomaj_download::config::init_logging(&config.log_config);

    let Some(protocol) = parse_protocol(&args.protocol) else {
        eprintln!("unknown protocol {:?}", args.protocol);
        return ExitCode::FAILURE;
    };

    let remote_file = RemoteFileSpec {
        protocol,
        server: args.server,
        remote_dir: args.remote_dir,
        save_as: None,
        files: Vec::new(),
        param: Vec::new(),
        matches: args.matches,
        http_parse: None,
        credentials: args.credentials,
    };

    let session_store = Arc::new(MemorySessionStore::new());
    let service = Arc::new(DownloadService::new(
        session_store.clone(),
        Arc::new(NullQueue),
        RetryPolicy::default(),
    ));

    let session = match service.create_session(&args.bank).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create session");
            return ExitCode::FAILURE;
        }
    };

    let list_job = DownloadJob {
        bank: args.bank.clone(),
        session: session.clone(),
        local_dir: args.local_dir.clone(),
        timeout_download: None,
        remote_file: remote_file.clone(),
        proxy: None,
        http_method: HttpMethod::Get,
        options: Default::default(),
    };

    if let Err(e) = service.list_op(&list_job).await {
        error!(error = %e, "list_op failed");
        return ExitCode::FAILURE;
    }

    let matched = match session_store.files(&args.bank, &session).await {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "failed to read matched file list");
            return ExitCode::FAILURE;
        }
    };
    info!(count = matched.len(), "files matched");

    let had_errors = if let Some(uri) = &args.rabbitmq_uri {
        let queue = match AmqpQueue::connect(uri).await {
            Ok(q) => Arc::new(q),
            Err(e) => {
                error!(error = %e, "failed to connect to rabbitmq");
                return ExitCode::FAILURE;
            }
        };
        let client = RemoteDownloadClient::new(queue, session_store.clone(), args.rate_limit);
        let total = matched.len() as u64;
        if let Err(e) = client
            .download_remote_files(
                &args.bank,
                &session,
                &args.local_dir,
                &remote_file,
                matched,
                None,
                HttpMethod::Get,
                None,
            )
            .await
        {
            error!(error = %e, "failed to submit downloads");
            return ExitCode::FAILURE;
        }
        match client.wait_for_download(&args.bank, &session, total).await {
            Ok(errs) => errs,
            Err(e) => {
                error!(error = %e, "download wait failed");
                return ExitCode::FAILURE;
            }
        }
    } else {
        let client = LocalDownloadClient::new(service.clone(), args.workers);
        for file in matched {
            let mut spec = remote_file.clone();
            spec.files = vec![file];
            spec.matches = Vec::new();
            client
                .submit(DownloadJob {
                    bank: args.bank.clone(),
                    session: session.clone(),
                    local_dir: args.local_dir.clone(),
                    timeout_download: None,
                    remote_file: spec,
                    proxy: None,
                    http_method: HttpMethod::Get,
                    options: Default::default(),
                })
                .await;
        }
        client.wait_for_download().await
    };

    if had_errors {
        error!("download completed with errors");
        ExitCode::FAILURE
    } else {
        info!("download completed successfully");
        ExitCode::SUCCESS
    }
}

/// Local-mode placeholder queue: `DownloadService` always takes a `Queue`,
/// but local mode never calls `ask_download`/`wait_for_messages`.
struct NullQueue;

#[async_trait::async_trait]
impl biomaj_download::domain::ports::queue::Queue for NullQueue {
    async fn publish(&self, _operation: &biomaj_download::message::Operation) -> biomaj_download::Result<()> {
        Ok(())
    }

    async fn next_delivery(&self) -> biomaj_download::Result<biomaj_download::domain::ports::queue::Delivery> {
        Err(biomaj_download::DownloadError::Internal("local mode has no queue".to_string()))
    }
}
