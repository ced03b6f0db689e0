use serde_json::{Map, Value};
use sqlx::PgPool;

/// Best-effort audit trail for owner-facing mutations. A failed audit write is
/// logged and never fails the request that triggered it.
#[allow(clippy::too_many_arguments)]
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    user_id: Option<&str>,
    action: &str,
    entity: &str,
    entity_id: Option<&str>,
    before: Option<Value>,
    after: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut changes = Map::new();
    if let Some(before) = before {
        changes.insert("before".to_string(), before);
    }
    if let Some(after) = after {
        changes.insert("after".to_string(), after);
    }

    let result = sqlx::query(
        "INSERT INTO audit_logs (user_id, action, entity, entity_id, changes)
         VALUES ($1::uuid, $2, $3, $4::uuid, $5)",
    )
    .bind(user_id)
    .bind(action)
    .bind(entity)
    .bind(entity_id)
    .bind(Value::Object(changes))
    .execute(pool)
    .await;

    if let Err(error) = result {
        tracing::warn!(action, entity, error = %error, "Failed to write audit log");
    }
}
