//! Generic row access over the service's tables.
//!
//! Rows travel as `serde_json::Value` objects (`row_to_json` on the way out,
//! `jsonb_populate_record` on the way in) so route modules stay schema-light.
//! Table and column names are validated against an allow-list before they are
//! interpolated; every value goes through a bind.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgConnection, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "app_users",
    "audit_logs",
    "bookings",
    "cleaning_events",
    "cost_allocations",
    "expenses",
    "guest_pages",
    "meter_readings",
    "properties",
    "scan_events",
];

/// Filter keys may carry an operator suffix: `recorded_at__gte`,
/// `starts_at__lt`, `guest_name__ilike`, `booking_id__is_null`. Without a
/// suffix the filter is an equality match.
pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_filters(&mut query, filters)?;

    query.push(" ORDER BY t.").push(order_name);
    query.push(if ascending { " ASC" } else { " DESC" });
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn count_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<i64, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_filters(&mut query, filters)?;

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;
    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

pub async fn get_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_comparison(
        &mut query,
        id_name,
        " = ",
        &infer_scalar(id_name, &Value::String(row_id.to_string())),
    );
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let mut query = build_insert(table, payload)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table} record.")))
}

/// Same as `create_row` but executes within an existing transaction.
pub async fn create_row_tx(
    conn: &mut PgConnection,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let mut query = build_insert(table, payload)?;
    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table} record.")))
}

pub async fn update_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let keys = sorted_valid_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
            separated.push_unseparated(" = r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE ");
    push_comparison(
        &mut query,
        id_name,
        " = ",
        &infer_scalar(id_name, &Value::String(row_id.to_string())),
    );
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn delete_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let existing = get_row(pool, table, row_id, id_field).await?;
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE ");
    push_comparison(
        &mut query,
        id_name,
        " = ",
        &infer_scalar(id_name, &Value::String(row_id.to_string())),
    );
    query.build().execute(pool).await.map_err(map_db_error)?;

    Ok(existing)
}

/// Delete all rows matching the filters, inside an existing transaction.
pub async fn delete_rows_tx(
    conn: &mut PgConnection,
    table: &str,
    filters: &Map<String, Value>,
) -> Result<u64, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_filters(&mut query, Some(filters))?;

    let result = query
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_db_error)?;
    Ok(result.rows_affected())
}

fn build_insert<'a>(
    table: &str,
    payload: &Map<String, Value>,
) -> Result<QueryBuilder<'a, Postgres>, AppError> {
    let table_name = validate_table(table)?.to_string();
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }
    let keys = sorted_valid_keys(payload)?;

    // jsonb_populate_record lets Postgres resolve column types (uuid, enum,
    // timestamptz, numeric) from the table definition.
    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name.as_str()).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name.as_str())
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name.as_str())
        .push(".*) AS row");

    Ok(query)
}

fn sorted_valid_keys(payload: &Map<String, Value>) -> Result<Vec<String>, AppError> {
    let mut keys = payload.keys().cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }
    Ok(keys)
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    let well_formed = !trimmed.is_empty()
        && trimmed.chars().all(|character| {
            character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
        })
        && !trimmed
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_digit());
    if well_formed {
        Ok(trimmed)
    } else {
        Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )))
    }
}

#[derive(Debug, Clone)]
enum Scalar {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
    I64(i64),
    F64(f64),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
}

fn push_filters(
    query: &mut QueryBuilder<Postgres>,
    filters: Option<&Map<String, Value>>,
) -> Result<(), AppError> {
    let Some(filter_map) = filters else {
        return Ok(());
    };
    for (key, value) in filter_map {
        push_filter(query, key, value)?;
    }
    Ok(())
}

fn push_filter(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let (column, suffix) = match filter_key.rsplit_once("__") {
        Some((column, suffix))
            if matches!(suffix, "gt" | "gte" | "lt" | "lte" | "ilike" | "is_null") =>
        {
            (validate_identifier(column)?, suffix)
        }
        _ => (validate_identifier(filter_key)?, "eq"),
    };

    if suffix == "is_null" {
        let should_be_null = value.as_bool().unwrap_or(true);
        query.push(" AND t.").push(column);
        query.push(if should_be_null {
            " IS NULL"
        } else {
            " IS NOT NULL"
        });
        return Ok(());
    }

    if value.is_null() {
        return Ok(());
    }

    let operator = match suffix {
        "gt" => " > ",
        "gte" => " >= ",
        "lt" => " < ",
        "lte" => " <= ",
        "ilike" => " ILIKE ",
        _ => " = ",
    };

    query.push(" AND ");
    if suffix == "ilike" {
        query
            .push("t.")
            .push(column)
            .push("::text ILIKE ")
            .push_bind(format!("%{}%", render_text(value)));
        return Ok(());
    }
    push_comparison(query, column, operator, &infer_scalar(column, value));
    Ok(())
}

fn push_comparison(
    query: &mut QueryBuilder<Postgres>,
    column: &str,
    operator: &str,
    value: &Scalar,
) {
    query.push("t.").push(column);
    match value {
        Scalar::Text(text) => {
            query.push("::text").push(operator).push_bind(text.clone());
        }
        Scalar::Uuid(id) => {
            query.push(operator).push_bind(*id);
        }
        Scalar::Bool(flag) => {
            query.push(operator).push_bind(*flag);
        }
        Scalar::I64(number) => {
            query.push(operator).push_bind(*number);
        }
        Scalar::F64(number) => {
            query.push(operator).push_bind(*number);
        }
        Scalar::Date(date) => {
            query.push(operator).push_bind(*date);
        }
        Scalar::Timestamp(stamp) => {
            query.push(operator).push_bind(stamp.to_owned());
        }
    }
}

fn infer_scalar(column: &str, value: &Value) -> Scalar {
    match value {
        Value::Bool(flag) => Scalar::Bool(*flag),
        Value::Number(number) => {
            if let Some(as_i64) = number.as_i64() {
                Scalar::I64(as_i64)
            } else if let Some(as_f64) = number.as_f64() {
                Scalar::F64(as_f64)
            } else {
                Scalar::Text(number.to_string())
            }
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_column(column) {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    return Scalar::Uuid(parsed);
                }
            }
            if is_timestamp_column(column) {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                    return Scalar::Timestamp(parsed);
                }
            }
            if is_date_column(column) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return Scalar::Date(parsed);
                }
            }
            Scalar::Text(text.clone())
        }
        other => Scalar::Text(render_text(other)),
    }
}

fn render_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn is_uuid_column(column: &str) -> bool {
    let normalized = column.trim();
    normalized == "id" || normalized.ends_with("_id")
}

fn is_date_column(column: &str) -> bool {
    column.trim().ends_with("_date")
}

fn is_timestamp_column(column: &str) -> bool {
    column.trim().ends_with("_at")
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::{build_insert, push_filters, validate_identifier, validate_table};

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("meter_readings").is_ok());
        assert!(validate_identifier("1bad").is_err());
        assert!(validate_identifier("bad-name").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn only_known_tables_are_allowed() {
        assert!(validate_table("bookings").is_ok());
        assert!(validate_table("scan_events").is_ok());
        assert!(validate_table("pg_catalog").is_err());
    }

    #[test]
    fn insert_sql_uses_jsonb_populate_record() {
        let mut payload = Map::new();
        payload.insert("slug".to_string(), Value::String("loft-12".to_string()));
        payload.insert(
            "property_id".to_string(),
            Value::String("550e8400-e29b-41d4-a716-446655440000".to_string()),
        );

        let mut query = build_insert("guest_pages", &payload).expect("insert builds");
        let sql = query.sql().to_string();
        assert!(
            sql.contains("jsonb_populate_record(NULL::guest_pages"),
            "Expected jsonb_populate_record in SQL but got: {sql}"
        );
        assert!(
            sql.contains("SELECT r.property_id, r.slug"),
            "Expected r.col references in SQL but got: {sql}"
        );
        // An insert builder must be mutable to arm for execution.
        query.build();
    }

    #[test]
    fn operator_suffixes_render_comparisons() {
        let mut filters = Map::new();
        filters.insert(
            "recorded_at__gte".to_string(),
            json!("2026-03-01T00:00:00Z"),
        );
        filters.insert("reading_wh__lt".to_string(), json!(5000));
        filters.insert("booking_id__is_null".to_string(), json!(true));

        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM meter_readings t WHERE 1=1");
        push_filters(&mut query, Some(&filters)).expect("filters build");
        let sql = query.sql();
        assert!(sql.contains("t.recorded_at >= "), "got: {sql}");
        assert!(sql.contains("t.reading_wh < "), "got: {sql}");
        assert!(sql.contains("t.booking_id IS NULL"), "got: {sql}");
    }

    #[test]
    fn null_equality_filters_are_skipped() {
        let mut filters = Map::new();
        filters.insert("status".to_string(), Value::Null);

        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM bookings t WHERE 1=1");
        push_filters(&mut query, Some(&filters)).expect("filters build");
        assert_eq!(query.sql(), "SELECT 1 FROM bookings t WHERE 1=1");
    }
}
