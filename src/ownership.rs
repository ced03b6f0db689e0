use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::error::{AppError, AppResult};
use crate::schemas::require_uuid;
use crate::state::AppState;

pub fn db_pool(state: &AppState) -> AppResult<&PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

/// Fetch a property and verify the caller owns it. Missing property is 404,
/// someone else's property is 403.
pub async fn assert_property_owner(
    state: &AppState,
    user_id: &str,
    property_id: &str,
) -> AppResult<Value> {
    require_uuid("property_id", property_id)?;
    let pool = db_pool(state)?;
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM properties t
         WHERE id = $1::uuid
         LIMIT 1",
    )
    .bind(property_id)
    .fetch_optional(pool)
    .await
    .map_err(|error| {
        tracing::error!(error = %error, "Property lookup failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    let property = row
        .and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound("Property not found.".to_string()))?;

    let owner = property
        .get("owner_user_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if owner != user_id {
        return Err(AppError::Forbidden(
            "Forbidden: property belongs to another user.".to_string(),
        ));
    }

    Ok(property)
}

/// Ids of every property the user owns. An authenticated user with no
/// properties is an empty-state, not an error.
pub async fn list_owned_property_ids(state: &AppState, user_id: &str) -> AppResult<Vec<String>> {
    let pool = db_pool(state)?;
    let rows = sqlx::query(
        "SELECT id::text AS id
         FROM properties
         WHERE owner_user_id = $1::uuid
         LIMIT 500",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|error| {
        tracing::error!(error = %error, "Owned-property lookup failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    let mut ids = Vec::new();
    for row in rows {
        if let Ok(value) = row.try_get::<String, _>("id") {
            if !value.is_empty() {
                ids.push(value);
            }
        }
    }
    Ok(ids)
}

/// Upsert the app_users row for a verified session so owner-facing records can
/// reference it.
pub async fn ensure_app_user(
    state: &AppState,
    user_id: &str,
    email: Option<&str>,
) -> AppResult<()> {
    let pool = db_pool(state)?;
    sqlx::query(
        "INSERT INTO app_users (id, email)
         VALUES ($1::uuid, $2)
         ON CONFLICT (id)
         DO UPDATE SET email = COALESCE(EXCLUDED.email, app_users.email)",
    )
    .bind(user_id)
    .bind(email)
    .execute(pool)
    .await
    .map_err(|error| {
        tracing::error!(error = %error, "app_users upsert failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;
    Ok(())
}
