//! Worker entry point: connects to Redis and RabbitMQ, serves the admin
//! HTTP surface, optionally self-registers with Consul, then runs the
//! queue consumer loop (spec §4.5 `wait_for_messages`, §6 exit codes).

use std::process::ExitCode;
use std::sync::Arc;

use biomaj_download::config::AppConfig;
use biomaj_download::domain::models::RetryPolicy;
use biomaj_download::service::{AmqpQueue, DownloadService, RedisSessionStore};
use biomaj_download::supervisor::{self, AppState};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

#[derive(Parser)]
#[command(version, about = "biomaj-download worker", long_about = None)]
struct Args {
    /// Disable the admin HTTP surface (liveness/metrics/session endpoints).
    #[arg(long)]
    no_admin: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: could not load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    biomaj_download::config::init_logging(&config.log_config);

    let session_store = match RedisSessionStore::connect(&config.redis.url, &config.redis.prefix).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to connect to redis");
            return ExitCode::FAILURE;
        }
    };

    let queue = match AmqpQueue::connect(&config.rabbitmq.uri).await {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!(error = %e, "failed to connect to rabbitmq");
            return ExitCode::FAILURE;
        }
    };

    let service = Arc::new(DownloadService::new(session_store.clone(), queue.clone(), RetryPolicy::default()));

    if !args.no_admin {
        let prometheus = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus recorder installs exactly once per process");

        let state = AppState {
            session_store: session_store.clone(),
            service: service.clone(),
            prometheus,
        };
        let router = supervisor::router(state);
        let bind = format!("{}:{}", config.web.bind_address, config.web.port);

        match tokio::net::TcpListener::bind(&bind).await {
            Ok(listener) => {
                info!(%bind, "admin HTTP surface listening");
                tokio::spawn(async move {
                    let _ = axum::serve(listener, router).await;
                });
            }
            Err(e) => {
                error!(error = %e, %bind, "failed to bind admin HTTP surface");
                return ExitCode::FAILURE;
            }
        }

        if let Err(e) = supervisor::consul::register(&config.consul, &config.web.bind_address, config.web.port).await {
            error!(error = %e, "consul self-registration failed, continuing without it");
        }
    }

    info!("worker ready, consuming from queue");
    if let Err(e) = service.wait_for_messages().await {
        error!(error = %e, "consumer loop exited");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
