//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::time::Instant;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub graph_store: CheckResult,
    pub generator: CheckResult,
    pub cache: CheckResult,
    pub catalog: CatalogCheck,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct CatalogCheck {
    pub status: String,
    pub entries: usize,
}

/// Liveness check - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: unigraph_common::VERSION.to_string(),
    })
}

/// Readiness check - covers the graph store, the generator, the row cache and the catalog
///
/// An unavailable generator or cache does not make the service unready:
/// answers fall back to the raw facts and rows are read from the store.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let start = Instant::now();

    let store_check = match state.engine.store().ping().await {
        Ok(_) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    let start = Instant::now();
    let generator_up = state.engine.generator().is_available().await;
    let generator_check = CheckResult {
        status: if generator_up { "up" } else { "down" }.to_string(),
        latency_ms: generator_up.then(|| start.elapsed().as_millis() as u64),
        error: None,
    };

    let cache_check = match state.engine.cache() {
        Some(cache) => {
            let start = Instant::now();
            match cache.ping().await {
                Ok(_) => CheckResult {
                    status: "up".to_string(),
                    latency_ms: Some(start.elapsed().as_millis() as u64),
                    error: None,
                },
                Err(e) => CheckResult {
                    status: "down".to_string(),
                    latency_ms: None,
                    error: Some(e.to_string()),
                },
            }
        }
        None => CheckResult {
            status: "disabled".to_string(),
            latency_ms: None,
            error: None,
        },
    };

    let entries = state.engine.catalog().await.len();
    let catalog_check = CatalogCheck {
        status: if entries > 0 { "loaded" } else { "empty" }.to_string(),
        entries,
    };

    let ready = store_check.status == "up" && entries > 0;
    let optional_up = generator_up && cache_check.status != "down";
    let status = match (ready, optional_up) {
        (false, _) => "not_ready",
        (true, false) => "degraded",
        (true, true) => "ready",
    };
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ReadyResponse {
            status: status.to_string(),
            checks: HealthChecks {
                graph_store: store_check,
                generator: generator_check,
                cache: cache_check,
                catalog: catalog_check,
            },
        }),
    )
}
