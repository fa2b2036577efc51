//! Consul self-registration (C8, spec §4.8): registers this worker as a
//! service with an HTTP health check, matching the original's
//! `python-consul` usage via a plain HTTP PUT against the agent API.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ConsulConfig;
use crate::error::{DownloadError, Result};

#[derive(Debug, Serialize)]
struct ConsulCheck {
    #[serde(rename = "HTTP")]
    http: String,
    #[serde(rename = "Interval")]
    interval: String,
}

#[derive(Debug, Serialize)]
struct ConsulServiceRegistration {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Check")]
    check: ConsulCheck,
}

/// Registers with the Consul agent at `consul.host`, if configured. A
/// missing `host` is a no-op — self-registration is optional.
pub async fn register(consul: &ConsulConfig, advertise_host: &str, advertise_port: u16) -> Result<()> {
    let Some(host) = &consul.host else {
        info!("no consul host configured, skipping self-registration");
        return Ok(());
    };

    let registration = ConsulServiceRegistration {
        name: consul.service_name.clone(),
        id: format!("{}-{advertise_host}-{advertise_port}", consul.service_name),
        address: advertise_host.to_string(),
        port: advertise_port,
        check: ConsulCheck {
            http: format!("http://{advertise_host}:{advertise_port}/api/download"),
            interval: format!("{}s", consul.check_interval_secs),
        },
    };

    let url = format!("http://{host}/v1/agent/service/register");
    let client = reqwest::Client::new();
    let resp = client
        .put(&url)
        .json(&registration)
        .send()
        .await
        .map_err(|e| DownloadError::Network(format!("consul register: {e}")))?;

    if !resp.status().is_success() {
        warn!(status = %resp.status(), "consul registration rejected");
        return Err(DownloadError::Network(format!("consul registration returned {}", resp.status())));
    }

    info!(service = %consul.service_name, "registered with consul");
    Ok(())
}
