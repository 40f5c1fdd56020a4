//! Health check endpoints

use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::AppState;
use crate::indexer::SiteIndexer;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub database: bool,
    pub bypass_service: Option<bool>,
    pub page_cache_entries: usize,
    pub sites: Vec<SiteStatus>,
}

#[derive(Serialize)]
pub struct SiteStatus {
    pub id: String,
    pub reachable: bool,
}

/// Health check - always returns OK if the server is running.
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - verifies dependencies are available.
async fn readyz(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<ReadyResponse> {
    let db_ok = sqlx::query("SELECT 1")
        .fetch_one(state.db.pool())
        .await
        .is_ok();

    let bypass_service = match &state.bypass_health {
        Some(client) => Some(client.health().await),
        None => None,
    };

    let mut sites = vec![];
    for indexer in state.manager.all() {
        let reachable = indexer.test_connection().await.unwrap_or(false);
        sites.push(SiteStatus {
            id: indexer.id().to_string(),
            reachable,
        });
    }

    Json(ReadyResponse {
        ready: db_ok,
        database: db_ok,
        bypass_service,
        page_cache_entries: state.manager.page_cache().len(),
        sites,
    })
}

/// Live progress of the direct-fetch transfers.
async fn transfers(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<Vec<crate::downloader::TransferSnapshot>> {
    Json(state.registry.snapshot())
}

/// Stop one direct-fetch transfer by registry id.
async fn stop_transfer(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> axum::http::StatusCode {
    if state.registry.stop(&id) {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::NOT_FOUND
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/transfers", get(transfers))
        .route("/transfers/{id}/stop", axum::routing::post(stop_transfer))
}
