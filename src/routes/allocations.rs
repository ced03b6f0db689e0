use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::AppResult,
    ownership::{assert_property_owner, db_pool},
    pagination::{envelope, PageParams},
    repository::table_service::{count_rows, list_rows},
    schemas::{non_empty_opt, parse_month, AllocationsQuery, RecomputeAllocationsInput},
    services::allocation::recompute_property_period,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/allocations", axum::routing::get(list_allocations))
        .route(
            "/allocations/recompute",
            axum::routing::post(recompute_allocations),
        )
}

async fn list_allocations(
    State(state): State<AppState>,
    Query(query): Query<AllocationsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_property_owner(&state, &user_id, &query.property_id).await?;
    let pool = db_pool(&state)?;
    let params = PageParams::from_raw(query.page.as_deref(), query.page_size.as_deref());

    let mut filters = Map::new();
    filters.insert(
        "property_id".to_string(),
        Value::String(query.property_id.clone()),
    );
    if let Some(month) = non_empty_opt(query.month.as_deref()) {
        parse_month(&month)?;
        filters.insert("period".to_string(), Value::String(month));
    }

    let total = count_rows(pool, "cost_allocations", Some(&filters)).await?;
    let rows = list_rows(
        pool,
        "cost_allocations",
        Some(&filters),
        params.take(),
        params.skip(),
        "period",
        false,
    )
    .await?;
    Ok(Json(envelope(rows, total, params)))
}

/// Rebuild the allocation rows for one property and month from the current
/// bookings, readings, expenses and cleaning events. Idempotent: the period's
/// rows are replaced wholesale inside one transaction.
async fn recompute_allocations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RecomputeAllocationsInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let property = assert_property_owner(&state, &user_id, &payload.property_id).await?;
    let pool = db_pool(&state)?;
    let (year, month) = parse_month(&payload.month)?;

    let allocations = recompute_property_period(pool, &property, year, month).await?;

    Ok(Json(json!({
        "property_id": payload.property_id,
        "period": payload.month.trim(),
        "allocation_count": allocations.len(),
        "allocations": allocations,
    })))
}
