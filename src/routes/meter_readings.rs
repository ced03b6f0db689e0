use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::Row;

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    ownership::{assert_property_owner, db_pool},
    pagination::{envelope, PageParams},
    repository::table_service::{count_rows, create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        non_empty_opt, parse_timestamp, remove_nulls, serialize_to_map, validate_input,
        CreateMeterReadingInput, MeterReadingPath, MeterReadingsQuery, UpdateMeterReadingInput,
    },
    services::audit::write_audit_log,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/meter-readings",
            axum::routing::get(list_meter_readings).post(create_meter_reading),
        )
        .route(
            "/meter-readings/{reading_id}",
            axum::routing::get(get_meter_reading)
                .patch(update_meter_reading)
                .delete(delete_meter_reading),
        )
}

async fn list_meter_readings(
    State(state): State<AppState>,
    Query(query): Query<MeterReadingsQuery>,
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
    if let Some(from) = non_empty_opt(query.from.as_deref()) {
        parse_timestamp("from", &from)?;
        filters.insert("recorded_at__gte".to_string(), Value::String(from));
    }
    if let Some(to) = non_empty_opt(query.to.as_deref()) {
        parse_timestamp("to", &to)?;
        filters.insert("recorded_at__lt".to_string(), Value::String(to));
    }

    let total = count_rows(pool, "meter_readings", Some(&filters)).await?;
    let rows = list_rows(
        pool,
        "meter_readings",
        Some(&filters),
        params.take(),
        params.skip(),
        "recorded_at",
        true,
    )
    .await?;
    Ok(Json(envelope(rows, total, params)))
}

async fn create_meter_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMeterReadingInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    assert_property_owner(&state, &user_id, &payload.property_id).await?;
    let pool = db_pool(&state)?;

    let recorded_at = parse_timestamp("recorded_at", &payload.recorded_at)?;
    assert_monotonic(
        pool,
        &payload.property_id,
        None,
        recorded_at,
        payload.reading_wh,
    )
    .await?;

    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "meter_readings", &record).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "meter_readings",
        created.get("id").and_then(Value::as_str),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_meter_reading(
    State(state): State<AppState>,
    Path(path): Path<MeterReadingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "meter_readings", &path.reading_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;
    Ok(Json(record))
}

async fn update_meter_reading(
    State(state): State<AppState>,
    Path(path): Path<MeterReadingPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateMeterReadingInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "meter_readings", &path.reading_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;

    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    // Effective values after the patch drive the monotonicity check.
    let recorded_at = match payload.recorded_at.as_deref() {
        Some(raw) => parse_timestamp("recorded_at", raw)?,
        None => {
            let raw = record
                .get("recorded_at")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            parse_timestamp("recorded_at", &raw)?
        }
    };
    let reading_wh = payload
        .reading_wh
        .or_else(|| record.get("reading_wh").and_then(Value::as_i64))
        .unwrap_or(0);
    assert_monotonic(
        pool,
        &property_id,
        Some(&path.reading_id),
        recorded_at,
        reading_wh,
    )
    .await?;

    let updated = update_row(pool, "meter_readings", &path.reading_id, &patch, "id").await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "update",
        "meter_readings",
        Some(&path.reading_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_meter_reading(
    State(state): State<AppState>,
    Path(path): Path<MeterReadingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "meter_readings", &path.reading_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;

    let deleted = delete_row(pool, "meter_readings", &path.reading_id, "id").await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "delete",
        "meter_readings",
        Some(&path.reading_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

/// Cumulative meters only move forward. The new value must sit between its
/// chronological neighbors on the same property.
async fn assert_monotonic(
    pool: &sqlx::PgPool,
    property_id: &str,
    exclude_reading_id: Option<&str>,
    recorded_at: DateTime<Utc>,
    reading_wh: i64,
) -> AppResult<()> {
    let row = sqlx::query(
        "SELECT
           (SELECT reading_wh FROM meter_readings
             WHERE property_id = $1::uuid
               AND recorded_at <= $3
               AND ($2::uuid IS NULL OR id <> $2::uuid)
             ORDER BY recorded_at DESC LIMIT 1) AS prev_wh,
           (SELECT reading_wh FROM meter_readings
             WHERE property_id = $1::uuid
               AND recorded_at >= $3
               AND ($2::uuid IS NULL OR id <> $2::uuid)
             ORDER BY recorded_at ASC LIMIT 1) AS next_wh",
    )
    .bind(property_id)
    .bind(exclude_reading_id)
    .bind(recorded_at)
    .fetch_one(pool)
    .await
    .map_err(|error| {
        tracing::error!(error = %error, "Meter reading neighbor lookup failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    let prev_wh: Option<i64> = row.try_get("prev_wh").unwrap_or(None);
    let next_wh: Option<i64> = row.try_get("next_wh").unwrap_or(None);

    if let Some(prev) = prev_wh {
        if reading_wh < prev {
            return Err(AppError::UnprocessableEntity(format!(
                "reading_wh: must be at least the previous reading ({prev} Wh)."
            )));
        }
    }
    if let Some(next) = next_wh {
        if reading_wh > next {
            return Err(AppError::UnprocessableEntity(format!(
                "reading_wh: must not exceed the next reading ({next} Wh)."
            )));
        }
    }
    Ok(())
}

fn owning_property(record: &Value) -> AppResult<String> {
    record
        .get("property_id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::Internal("Meter reading row is missing property_id.".to_string()))
}
