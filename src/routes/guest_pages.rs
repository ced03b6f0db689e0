use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Map, Value};
use sqlx::Row;

use crate::{
    auth::require_user_id,
    blocks::decode_blocks,
    error::{AppError, AppResult},
    ownership::{assert_property_owner, db_pool},
    pagination::{envelope, PageParams},
    repository::table_service::{count_rows, create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        remove_nulls, require_slug, serialize_to_map, CreateGuestPageInput, GuestPagePath,
        GuestPagesQuery, UpdateGuestPageInput,
    },
    services::audit::write_audit_log,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/guest-pages",
            axum::routing::get(list_guest_pages).post(create_guest_page),
        )
        .route(
            "/guest-pages/{guest_page_id}",
            axum::routing::get(get_guest_page)
                .patch(update_guest_page)
                .delete(delete_guest_page),
        )
        .route(
            "/guest-pages/{guest_page_id}/publish",
            axum::routing::post(publish_guest_page),
        )
        .route(
            "/guest-pages/{guest_page_id}/unpublish",
            axum::routing::post(unpublish_guest_page),
        )
        .route(
            "/guest-pages/{guest_page_id}/analytics",
            axum::routing::get(guest_page_analytics),
        )
}

async fn list_guest_pages(
    State(state): State<AppState>,
    Query(query): Query<GuestPagesQuery>,
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

    let total = count_rows(pool, "guest_pages", Some(&filters)).await?;
    let rows = list_rows(
        pool,
        "guest_pages",
        Some(&filters),
        params.take(),
        params.skip(),
        "created_at",
        false,
    )
    .await?;
    Ok(Json(envelope(rows, total, params)))
}

async fn create_guest_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateGuestPageInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_property_owner(&state, &user_id, &payload.property_id).await?;
    let pool = db_pool(&state)?;

    let slug = require_slug(&payload.slug)?;
    let blocks = decode_blocks(&payload.blocks)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("slug".to_string(), Value::String(slug.clone()));
    record.insert(
        "blocks".to_string(),
        serde_json::to_value(&blocks).unwrap_or_else(|_| Value::Array(Vec::new())),
    );

    // Unique slug violations surface as 409 via the repository error mapping.
    let created = create_row(pool, "guest_pages", &record).await?;
    state.guest_page_cache.invalidate(&slug).await;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "guest_pages",
        created.get("id").and_then(Value::as_str),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_guest_page(
    State(state): State<AppState>,
    Path(path): Path<GuestPagePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "guest_pages", &path.guest_page_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;
    Ok(Json(record))
}

async fn update_guest_page(
    State(state): State<AppState>,
    Path(path): Path<GuestPagePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateGuestPageInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "guest_pages", &path.guest_page_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;
    let old_slug = record
        .get("slug")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut patch = Map::new();
    if let Some(raw_slug) = payload.slug.as_deref() {
        patch.insert("slug".to_string(), Value::String(require_slug(raw_slug)?));
    }
    if let Some(raw_blocks) = payload.blocks.as_deref() {
        let blocks = decode_blocks(raw_blocks)?;
        patch.insert(
            "blocks".to_string(),
            serde_json::to_value(&blocks).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
    }
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "guest_pages", &path.guest_page_id, &patch, "id").await?;
    invalidate_slugs(&state, &updated, &old_slug).await;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "update",
        "guest_pages",
        Some(&path.guest_page_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_guest_page(
    State(state): State<AppState>,
    Path(path): Path<GuestPagePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "guest_pages", &path.guest_page_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;

    let deleted = delete_row(pool, "guest_pages", &path.guest_page_id, "id").await?;
    if let Some(slug) = deleted.get("slug").and_then(Value::as_str) {
        state.guest_page_cache.invalidate(slug).await;
    }
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "delete",
        "guest_pages",
        Some(&path.guest_page_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

async fn publish_guest_page(
    State(state): State<AppState>,
    Path(path): Path<GuestPagePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    set_published(&state, &headers, &path.guest_page_id, true).await
}

async fn unpublish_guest_page(
    State(state): State<AppState>,
    Path(path): Path<GuestPagePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    set_published(&state, &headers, &path.guest_page_id, false).await
}

async fn set_published(
    state: &AppState,
    headers: &HeaderMap,
    guest_page_id: &str,
    published: bool,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(state, headers).await?;
    let pool = db_pool(state)?;

    let record = get_row(pool, "guest_pages", guest_page_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(state, &user_id, &property_id).await?;

    let mut patch = Map::new();
    patch.insert("published".to_string(), Value::Bool(published));

    let updated = update_row(pool, "guest_pages", guest_page_id, &patch, "id").await?;
    if let Some(slug) = updated.get("slug").and_then(Value::as_str) {
        state.guest_page_cache.invalidate(slug).await;
    }
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        if published { "publish" } else { "unpublish" },
        "guest_pages",
        Some(guest_page_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

/// Scan aggregates for a page: lifetime total, a 30-day window with per-day
/// buckets, and the leading UTM sources.
async fn guest_page_analytics(
    State(state): State<AppState>,
    Path(path): Path<GuestPagePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "guest_pages", &path.guest_page_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;

    let totals = sqlx::query(
        "SELECT
           COUNT(*)::bigint AS total,
           COUNT(*) FILTER (WHERE scanned_at >= now() - interval '30 days')::bigint AS last_30_days
         FROM scan_events WHERE guest_page_id = $1::uuid",
    )
    .bind(&path.guest_page_id)
    .fetch_one(pool)
    .await
    .map_err(map_analytics_error)?;

    let daily_rows = sqlx::query(
        "SELECT to_char(date_trunc('day', scanned_at), 'YYYY-MM-DD') AS day,
                COUNT(*)::bigint AS scans
         FROM scan_events
         WHERE guest_page_id = $1::uuid
           AND scanned_at >= now() - interval '30 days'
         GROUP BY 1 ORDER BY 1",
    )
    .bind(&path.guest_page_id)
    .fetch_all(pool)
    .await
    .map_err(map_analytics_error)?;

    let source_rows = sqlx::query(
        "SELECT utm_source, COUNT(*)::bigint AS scans
         FROM scan_events
         WHERE guest_page_id = $1::uuid AND utm_source IS NOT NULL
         GROUP BY utm_source ORDER BY scans DESC, utm_source ASC LIMIT 10",
    )
    .bind(&path.guest_page_id)
    .fetch_all(pool)
    .await
    .map_err(map_analytics_error)?;

    let by_day: Vec<Value> = daily_rows
        .iter()
        .map(|row| {
            json!({
                "day": row.try_get::<String, _>("day").unwrap_or_default(),
                "scans": row.try_get::<i64, _>("scans").unwrap_or(0),
            })
        })
        .collect();
    let top_sources: Vec<Value> = source_rows
        .iter()
        .map(|row| {
            json!({
                "utm_source": row.try_get::<String, _>("utm_source").unwrap_or_default(),
                "scans": row.try_get::<i64, _>("scans").unwrap_or(0),
            })
        })
        .collect();

    Ok(Json(json!({
        "guest_page_id": path.guest_page_id,
        "total_scans": totals.try_get::<i64, _>("total").unwrap_or(0),
        "scans_last_30_days": totals.try_get::<i64, _>("last_30_days").unwrap_or(0),
        "scans_by_day": by_day,
        "top_utm_sources": top_sources,
    })))
}

async fn invalidate_slugs(state: &AppState, updated: &Value, old_slug: &str) {
    if !old_slug.is_empty() {
        state.guest_page_cache.invalidate(old_slug).await;
    }
    if let Some(new_slug) = updated.get("slug").and_then(Value::as_str) {
        if new_slug != old_slug {
            state.guest_page_cache.invalidate(new_slug).await;
        }
    }
}

fn map_analytics_error(error: sqlx::Error) -> AppError {
    tracing::error!(error = %error, "Scan analytics query failed");
    AppError::Dependency("Database operation failed.".to_string())
}

fn owning_property(record: &Value) -> AppResult<String> {
    record
        .get("property_id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::Internal("Guest page row is missing property_id.".to_string()))
}
