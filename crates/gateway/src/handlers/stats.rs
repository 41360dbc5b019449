//! Graph statistics handler

use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::AppState;
use unigraph_common::{
    errors::Result,
    graph::{EntityKind, GraphStats},
};

#[derive(Serialize)]
pub struct StatsResponse {
    pub graph: GraphStats,
    /// Catalog entries per entity kind
    pub catalog: BTreeMap<EntityKind, usize>,
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let graph = state.engine.graph_stats().await?;
    let catalog = state.engine.catalog().await;

    Ok(Json(StatsResponse {
        graph,
        catalog: EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, catalog.count(kind)))
            .collect(),
    }))
}
