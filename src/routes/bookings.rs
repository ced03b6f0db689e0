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
        non_empty_opt, parse_timestamp, remove_nulls, require_one_of, serialize_to_map,
        validate_input, BookingPath, BookingsQuery, CreateBookingInput, UpdateBookingInput,
        BOOKING_STATUSES,
    },
    services::audit::write_audit_log,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/bookings",
            axum::routing::get(list_bookings).post(create_booking),
        )
        .route(
            "/bookings/{booking_id}",
            axum::routing::get(get_booking)
                .patch(update_booking)
                .delete(delete_booking),
        )
}

async fn list_bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingsQuery>,
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
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert(
            "status".to_string(),
            Value::String(require_one_of("status", &status, BOOKING_STATUSES)?),
        );
    }
    if let Some(from) = non_empty_opt(query.from.as_deref()) {
        parse_timestamp("from", &from)?;
        filters.insert("ends_at__gt".to_string(), Value::String(from));
    }
    if let Some(to) = non_empty_opt(query.to.as_deref()) {
        parse_timestamp("to", &to)?;
        filters.insert("starts_at__lt".to_string(), Value::String(to));
    }

    let total = count_rows(pool, "bookings", Some(&filters)).await?;
    let rows = list_rows(
        pool,
        "bookings",
        Some(&filters),
        params.take(),
        params.skip(),
        "starts_at",
        false,
    )
    .await?;
    Ok(Json(envelope(rows, total, params)))
}

async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBookingInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    assert_property_owner(&state, &user_id, &payload.property_id).await?;
    let pool = db_pool(&state)?;

    let status = require_one_of("status", &payload.status, BOOKING_STATUSES)?;
    let starts_at = parse_timestamp("starts_at", &payload.starts_at)?;
    let ends_at = parse_timestamp("ends_at", &payload.ends_at)?;
    require_ordered(starts_at, ends_at)?;

    if status != "cancelled" {
        reject_conflicts(pool, &payload.property_id, None, starts_at, ends_at).await?;
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("status".to_string(), Value::String(status));
    record.insert("source".to_string(), Value::String("manual".to_string()));

    let created = create_row(pool, "bookings", &record).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "bookings",
        created.get("id").and_then(Value::as_str),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "bookings", &path.booking_id, "id").await?;
    let property_id = value_str(&record, "property_id");
    assert_property_owner(&state, &user_id, &property_id).await?;
    Ok(Json(record))
}

async fn update_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBookingInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "bookings", &path.booking_id, "id").await?;
    let property_id = value_str(&record, "property_id");
    assert_property_owner(&state, &user_id, &property_id).await?;

    let mut patch = remove_nulls(serialize_to_map(&payload));
    let status = match payload.status.as_deref() {
        Some(raw) => {
            let normalized = require_one_of("status", raw, BOOKING_STATUSES)?;
            patch.insert("status".to_string(), Value::String(normalized.clone()));
            normalized
        }
        None => value_str(&record, "status"),
    };

    // Effective time range after the patch, for the overlap check.
    let starts_at = match payload.starts_at.as_deref() {
        Some(raw) => parse_timestamp("starts_at", raw)?,
        None => parse_timestamp("starts_at", &value_str(&record, "starts_at"))?,
    };
    let ends_at = match payload.ends_at.as_deref() {
        Some(raw) => parse_timestamp("ends_at", raw)?,
        None => parse_timestamp("ends_at", &value_str(&record, "ends_at"))?,
    };
    require_ordered(starts_at, ends_at)?;

    if status != "cancelled" {
        reject_conflicts(
            pool,
            &property_id,
            Some(&path.booking_id),
            starts_at,
            ends_at,
        )
        .await?;
    }

    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "bookings", &path.booking_id, &patch, "id").await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "update",
        "bookings",
        Some(&path.booking_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_booking(
    State(state): State<AppState>,
    Path(path): Path<BookingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "bookings", &path.booking_id, "id").await?;
    let property_id = value_str(&record, "property_id");
    assert_property_owner(&state, &user_id, &property_id).await?;

    let deleted = delete_row(pool, "bookings", &path.booking_id, "id").await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "delete",
        "bookings",
        Some(&path.booking_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

fn require_ordered(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> AppResult<()> {
    if ends_at <= starts_at {
        return Err(AppError::UnprocessableEntity(
            "ends_at: must be after starts_at.".to_string(),
        ));
    }
    Ok(())
}

/// A booking may not overlap another non-cancelled booking on the same
/// property. Half-open semantics: back-to-back stays sharing an instant are
/// fine.
async fn reject_conflicts(
    pool: &sqlx::PgPool,
    property_id: &str,
    exclude_booking_id: Option<&str>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> AppResult<()> {
    let row = sqlx::query(
        "SELECT COUNT(*)::bigint AS conflicts
         FROM bookings
         WHERE property_id = $1::uuid
           AND status <> 'cancelled'
           AND ($2::uuid IS NULL OR id <> $2::uuid)
           AND starts_at < $4
           AND ends_at > $3",
    )
    .bind(property_id)
    .bind(exclude_booking_id)
    .bind(starts_at)
    .bind(ends_at)
    .fetch_one(pool)
    .await
    .map_err(|error| {
        tracing::error!(error = %error, "Booking conflict check failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    if row.try_get::<i64, _>("conflicts").unwrap_or(0) > 0 {
        return Err(AppError::Conflict(
            "Booking overlaps an existing booking on this property.".to_string(),
        ));
    }
    Ok(())
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}
