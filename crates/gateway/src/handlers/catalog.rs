//! Entity catalog handlers

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use crate::AppState;
use unigraph_common::{
    engine::Resolution,
    errors::{AppError, Result},
    graph::EntityKind,
};

/// Mention lookup parameters
#[derive(Debug, Deserialize, Validate)]
pub struct ResolveParams {
    #[validate(length(min = 1, max = 200))]
    pub mention: String,

    /// Comma-separated kinds to keep, all kinds when absent
    #[serde(default)]
    pub kinds: Option<String>,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub mention: String,
    pub candidates: Vec<Resolution>,
}

#[derive(Serialize)]
pub struct ReloadResponse {
    pub entries: usize,
    pub processing_time_ms: u64,
}

/// Resolve a free-text mention against the catalog
pub async fn resolve(
    State(state): State<AppState>,
    Query(params): Query<ResolveParams>,
) -> Result<Json<ResolveResponse>> {
    params.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("mention".to_string()),
    })?;

    let kinds = parse_kinds(params.kinds.as_deref())?;
    let candidates = state.engine.resolve_mention(&params.mention, &kinds).await;

    Ok(Json(ResolveResponse {
        mention: params.mention,
        candidates,
    }))
}

/// Rebuild the catalog from the graph store
pub async fn reload(State(state): State<AppState>) -> Result<Json<ReloadResponse>> {
    let start = Instant::now();
    let entries = state.engine.reload_catalog().await?;

    Ok(Json(ReloadResponse {
        entries,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}

fn parse_kinds(raw: Option<&str>) -> Result<Vec<EntityKind>> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|kind| !kind.is_empty())
        .map(|kind| kind.parse::<EntityKind>())
        .collect()
}
