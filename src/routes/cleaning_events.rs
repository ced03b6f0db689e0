use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    ownership::{assert_property_owner, db_pool},
    pagination::{envelope, PageParams},
    repository::table_service::{count_rows, create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        non_empty_opt, parse_month, parse_timestamp, remove_nulls, require_one_of,
        serialize_to_map, validate_input, CleaningEventPath, CleaningEventsQuery,
        CreateCleaningEventInput, UpdateCleaningEventInput, CLEANING_STATUSES,
    },
    services::audit::write_audit_log,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/cleaning-events",
            axum::routing::get(list_cleaning_events).post(create_cleaning_event),
        )
        .route(
            "/cleaning-events/{cleaning_event_id}",
            axum::routing::get(get_cleaning_event)
                .patch(update_cleaning_event)
                .delete(delete_cleaning_event),
        )
}

async fn list_cleaning_events(
    State(state): State<AppState>,
    Query(query): Query<CleaningEventsQuery>,
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
            Value::String(require_one_of("status", &status, CLEANING_STATUSES)?),
        );
    }
    if let Some(month) = non_empty_opt(query.month.as_deref()) {
        let (from, to) = month_bounds_utc(&month)?;
        filters.insert("scheduled_at__gte".to_string(), Value::String(from));
        filters.insert("scheduled_at__lt".to_string(), Value::String(to));
    }

    let total = count_rows(pool, "cleaning_events", Some(&filters)).await?;
    let rows = list_rows(
        pool,
        "cleaning_events",
        Some(&filters),
        params.take(),
        params.skip(),
        "scheduled_at",
        false,
    )
    .await?;
    Ok(Json(envelope(rows, total, params)))
}

async fn create_cleaning_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateCleaningEventInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    assert_property_owner(&state, &user_id, &payload.property_id).await?;
    let pool = db_pool(&state)?;

    let status = require_one_of("status", &payload.status, CLEANING_STATUSES)?;
    parse_timestamp("scheduled_at", &payload.scheduled_at)?;
    if let Some(booking_id) = payload.booking_id.as_deref() {
        assert_booking_on_property(pool, booking_id, &payload.property_id).await?;
    }

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("status".to_string(), Value::String(status));

    let created = create_row(pool, "cleaning_events", &record).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "cleaning_events",
        created.get("id").and_then(Value::as_str),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_cleaning_event(
    State(state): State<AppState>,
    Path(path): Path<CleaningEventPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "cleaning_events", &path.cleaning_event_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;
    Ok(Json(record))
}

async fn update_cleaning_event(
    State(state): State<AppState>,
    Path(path): Path<CleaningEventPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateCleaningEventInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "cleaning_events", &path.cleaning_event_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;

    let mut patch = remove_nulls(serialize_to_map(&payload));
    if let Some(status) = payload.status.as_deref() {
        patch.insert(
            "status".to_string(),
            Value::String(require_one_of("status", status, CLEANING_STATUSES)?),
        );
    }
    if let Some(scheduled_at) = payload.scheduled_at.as_deref() {
        parse_timestamp("scheduled_at", scheduled_at)?;
    }
    if let Some(booking_id) = payload.booking_id.as_deref() {
        assert_booking_on_property(pool, booking_id, &property_id).await?;
    }
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "cleaning_events", &path.cleaning_event_id, &patch, "id").await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "update",
        "cleaning_events",
        Some(&path.cleaning_event_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_cleaning_event(
    State(state): State<AppState>,
    Path(path): Path<CleaningEventPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "cleaning_events", &path.cleaning_event_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;

    let deleted = delete_row(pool, "cleaning_events", &path.cleaning_event_id, "id").await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "delete",
        "cleaning_events",
        Some(&path.cleaning_event_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

/// A linked booking must live on the same property as the cleaning event.
async fn assert_booking_on_property(
    pool: &sqlx::PgPool,
    booking_id: &str,
    property_id: &str,
) -> AppResult<()> {
    let booking = get_row(pool, "bookings", booking_id, "id").await?;
    let booking_property = booking
        .get("property_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if booking_property != property_id {
        return Err(AppError::UnprocessableEntity(
            "booking_id: booking belongs to a different property.".to_string(),
        ));
    }
    Ok(())
}

/// UTC bounds for a `YYYY-MM` label, used only as a coarse list filter.
fn month_bounds_utc(label: &str) -> AppResult<(String, String)> {
    let (year, month) = parse_month(label)?;
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    Ok((
        format!("{year:04}-{month:02}-01T00:00:00Z"),
        format!("{next_year:04}-{next_month:02}-01T00:00:00Z"),
    ))
}

fn owning_property(record: &Value) -> AppResult<String> {
    record
        .get("property_id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::Internal("Cleaning event row is missing property_id.".to_string()))
}

#[cfg(test)]
mod tests {
    use super::month_bounds_utc;

    #[test]
    fn month_filter_bounds() {
        let (from, to) = month_bounds_utc("2026-03").unwrap();
        assert_eq!(from, "2026-03-01T00:00:00Z");
        assert_eq!(to, "2026-04-01T00:00:00Z");

        let (from, to) = month_bounds_utc("2026-12").unwrap();
        assert_eq!(from, "2026-12-01T00:00:00Z");
        assert_eq!(to, "2027-01-01T00:00:00Z");
    }
}
