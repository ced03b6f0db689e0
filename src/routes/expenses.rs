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
        non_empty_opt, remove_nulls, require_one_of, serialize_to_map, validate_input,
        CreateExpenseInput, ExpensePath, ExpensesQuery, UpdateExpenseInput, EXPENSE_FREQUENCIES,
    },
    services::audit::write_audit_log,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/expenses",
            axum::routing::get(list_expenses).post(create_expense),
        )
        .route(
            "/expenses/{expense_id}",
            axum::routing::get(get_expense)
                .patch(update_expense)
                .delete(delete_expense),
        )
}

async fn list_expenses(
    State(state): State<AppState>,
    Query(query): Query<ExpensesQuery>,
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
    if let Some(frequency) = non_empty_opt(query.frequency.as_deref()) {
        filters.insert(
            "frequency".to_string(),
            Value::String(require_one_of("frequency", &frequency, EXPENSE_FREQUENCIES)?),
        );
    }

    let total = count_rows(pool, "expenses", Some(&filters)).await?;
    let rows = list_rows(
        pool,
        "expenses",
        Some(&filters),
        params.take(),
        params.skip(),
        "created_at",
        false,
    )
    .await?;
    Ok(Json(envelope(rows, total, params)))
}

async fn create_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateExpenseInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    assert_property_owner(&state, &user_id, &payload.property_id).await?;
    let pool = db_pool(&state)?;

    let frequency = require_one_of("frequency", &payload.frequency, EXPENSE_FREQUENCIES)?;
    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert("frequency".to_string(), Value::String(frequency));

    let created = create_row(pool, "expenses", &record).await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "create",
        "expenses",
        created.get("id").and_then(Value::as_str),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_expense(
    State(state): State<AppState>,
    Path(path): Path<ExpensePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "expenses", &path.expense_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;
    Ok(Json(record))
}

async fn update_expense(
    State(state): State<AppState>,
    Path(path): Path<ExpensePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateExpenseInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "expenses", &path.expense_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;

    let mut patch = remove_nulls(serialize_to_map(&payload));
    if let Some(frequency) = payload.frequency.as_deref() {
        patch.insert(
            "frequency".to_string(),
            Value::String(require_one_of("frequency", frequency, EXPENSE_FREQUENCIES)?),
        );
    }
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "expenses", &path.expense_id, &patch, "id").await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "update",
        "expenses",
        Some(&path.expense_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_expense(
    State(state): State<AppState>,
    Path(path): Path<ExpensePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "expenses", &path.expense_id, "id").await?;
    let property_id = owning_property(&record)?;
    assert_property_owner(&state, &user_id, &property_id).await?;

    let deleted = delete_row(pool, "expenses", &path.expense_id, "id").await?;
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user_id),
        "delete",
        "expenses",
        Some(&path.expense_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

fn owning_property(record: &Value) -> AppResult<String> {
    record
        .get("property_id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::Internal("Expense row is missing property_id.".to_string()))
}
