//! Admin HTTP surface (C8, spec §4.8, §6): liveness, Prometheus metrics,
//! batch metric ingestion, and session endpoints mirroring the external
//! admin API so the worker can be exercised end-to-end without a live
//! Consul/Redis (spec §1 notes this surface normally lives in a separate
//! collaborator service).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::domain::ports::session_store::SessionStore;
use crate::service::download_service::DownloadService;

#[derive(Clone)]
pub struct AppState {
    pub session_store: Arc<dyn SessionStore>,
    pub service: Arc<DownloadService>,
    pub prometheus: PrometheusHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/download", get(ping))
        .route("/metrics", get(metrics))
        .route("/api/download/metrics", post(ingest_metrics))
        .route("/api/download/session/{bank}", post(create_session))
        .route("/api/download/session/{bank}/{session}", delete(delete_session))
        .route("/api/download/status/list/{bank}/{session}", get(status_list))
        .route("/api/download/status/download/{bank}/{session}", get(status_download))
        .route("/api/download/error/download/{bank}/{session}", get(error_download))
        .route("/api/download/list/{bank}/{session}", get(list_files))
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus.render()
}

#[derive(Debug, Deserialize)]
struct MetricSample {
    bank: String,
    bytes: u64,
    seconds: f64,
    error: bool,
}

#[derive(Debug, Deserialize)]
struct MetricsBatch {
    samples: Vec<MetricSample>,
}

async fn ingest_metrics(Json(batch): Json<MetricsBatch>) -> impl IntoResponse {
    for sample in batch.samples {
        metrics::counter!("biomaj_download_total", "bank" => sample.bank.clone()).increment(1);
        metrics::counter!("biomaj_download_bytes_total", "bank" => sample.bank.clone()).increment(sample.bytes);
        metrics::histogram!("biomaj_download_seconds", "bank" => sample.bank.clone()).record(sample.seconds);
        if sample.error {
            metrics::counter!("biomaj_download_errors_total", "bank" => sample.bank).increment(1);
        }
    }
    StatusCode::OK
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session: String,
}

async fn create_session(State(state): State<AppState>, Path(bank): Path<String>) -> impl IntoResponse {
    match state.service.create_session(&bank).await {
        Ok(session) => Json(SessionResponse { session }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn delete_session(State(state): State<AppState>, Path((bank, session)): Path<(String, String)>) -> impl IntoResponse {
    match state.service.clean(&bank, &session).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct StatusListResponse {
    status: bool,
}

async fn status_list(State(state): State<AppState>, Path((bank, session)): Path<(String, String)>) -> impl IntoResponse {
    match state.session_store.is_alive(&bank, &session).await {
        Ok(status) => Json(StatusListResponse { status }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct StatusDownloadResponse {
    progress: u64,
    errors: u64,
}

async fn status_download(State(state): State<AppState>, Path((bank, session)): Path<(String, String)>) -> impl IntoResponse {
    let progress = state.session_store.progress(&bank, &session).await;
    let errors = state.session_store.error_count(&bank, &session).await;
    match (progress, errors) {
        (Ok(progress), Ok(errors)) => Json(StatusDownloadResponse { progress, errors }).into_response(),
        (Err(e), _) | (_, Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct ErrorDownloadResponse {
    error: Vec<String>,
}

async fn error_download(State(state): State<AppState>, Path((bank, session)): Path<(String, String)>) -> impl IntoResponse {
    match state.session_store.error_info(&bank, &session).await {
        Ok(error) => Json(ErrorDownloadResponse { error }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct ListFilesResponse {
    files: Vec<crate::domain::models::RemoteFile>,
}

async fn list_files(State(state): State<AppState>, Path((bank, session)): Path<(String, String)>) -> impl IntoResponse {
    match state.session_store.files(&bank, &session).await {
        Ok(files) => Json(ListFilesResponse { files }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
