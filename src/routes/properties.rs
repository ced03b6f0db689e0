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
    repository::table_service::{count_rows, create_row, delete_row, list_rows, update_row},
    schemas::{
        remove_nulls, serialize_to_map, validate_input, CreatePropertyInput, PropertiesQuery,
        PropertyPath, UpdatePropertyInput,
    },
    services::{audit::write_audit_log, ical::sync_property_calendar},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/properties",
            axum::routing::get(list_properties).post(create_property),
        )
        .route(
            "/properties/{property_id}",
            axum::routing::get(get_property)
                .patch(update_property)
                .delete(delete_property),
        )
        .route(
            "/properties/{property_id}/calendar-sync",
            axum::routing::post(calendar_sync),
        )
}

async fn list_properties(
    State(state): State<AppState>,
    Query(query): Query<PropertiesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let params = PageParams::from_raw(query.page.as_deref(), query.page_size.as_deref());

    let mut filters = Map::new();
    filters.insert("owner_user_id".to_string(), Value::String(user_id));

    let total = count_rows(pool, "properties", Some(&filters)).await?;
    let rows = list_rows(
        pool,
        "properties",
        Some(&filters),
        params.take(),
        params.skip(),
        "created_at",
        false,
    )
    .await?;
    Ok(Json(envelope(rows, total, params)))
}

async fn create_property(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePropertyInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let timezone = require_timezone(&payload.timezone)?;
    let pool = db_pool(&state)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("timezone".to_string(), Value::String(timezone));
    record.insert(
        "owner_user_id".to_string(),
        Value::String(user_id.clone()),
    );

    let created = create_row(pool, "properties", &record).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "properties",
        created.get("id").and_then(Value::as_str),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let property = assert_property_owner(&state, &user_id, &path.property_id).await?;
    Ok(Json(property))
}

async fn update_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePropertyInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let before = assert_property_owner(&state, &user_id, &path.property_id).await?;
    let pool = db_pool(&state)?;

    let mut patch = remove_nulls(serialize_to_map(&payload));
    if let Some(timezone) = payload.timezone.as_deref() {
        patch.insert(
            "timezone".to_string(),
            Value::String(require_timezone(timezone)?),
        );
    }
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "properties", &path.property_id, &patch, "id").await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "update",
        "properties",
        Some(&path.property_id),
        Some(before),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_property(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_property_owner(&state, &user_id, &path.property_id).await?;
    let pool = db_pool(&state)?;

    let deleted = delete_row(pool, "properties", &path.property_id, "id").await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "delete",
        "properties",
        Some(&path.property_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

/// Mirror the property's external calendar feed into bookings.
async fn calendar_sync(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let property = assert_property_owner(&state, &user_id, &path.property_id).await?;
    let summary = sync_property_calendar(&state, &property).await?;
    Ok(Json(summary))
}

fn require_timezone(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<chrono_tz::Tz>()
        .map(|tz| tz.name().to_string())
        .map_err(|_| {
            AppError::UnprocessableEntity(format!(
                "timezone: '{trimmed}' is not a valid IANA timezone."
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::require_timezone;

    #[test]
    fn timezones_must_be_iana_names() {
        assert_eq!(require_timezone("Europe/Berlin").unwrap(), "Europe/Berlin");
        assert_eq!(require_timezone(" UTC ").unwrap(), "UTC");
        assert!(require_timezone("CET+1").is_err());
    }
}
