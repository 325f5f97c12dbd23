//! Address lookup routes used by the checkout form.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use tracing::instrument;

use crate::error::Result;
use crate::shipping::{Settlement, Warehouse};
use crate::state::AppState;

/// Settlement search parameters.
#[derive(Debug, Deserialize)]
pub struct SettlementQuery {
    #[serde(default)]
    pub q: String,
}

/// Warehouse search parameters.
#[derive(Debug, Deserialize)]
pub struct WarehouseQuery {
    pub settlement_ref: String,
    pub q: Option<String>,
}

/// Search settlements by name.
#[instrument(skip(state))]
pub async fn settlements(
    State(state): State<AppState>,
    Query(query): Query<SettlementQuery>,
) -> Result<Json<Vec<Settlement>>> {
    Ok(Json(state.shipping().settlements(&query.q).await?))
}

/// Pickup points in a settlement, optionally narrowed by a search term.
#[instrument(skip(state))]
pub async fn warehouses(
    State(state): State<AppState>,
    Query(query): Query<WarehouseQuery>,
) -> Result<Json<Vec<Warehouse>>> {
    Ok(Json(
        state
            .shipping()
            .warehouses(&query.settlement_ref, query.q.as_deref())
            .await?,
    ))
}
