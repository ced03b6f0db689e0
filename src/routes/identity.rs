use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::require_session;
use crate::error::AppResult;
use crate::ownership::{ensure_app_user, list_owned_property_ids};
use crate::state::AppState;

/// Echo the resolved identity and its owned-property footprint. Also upserts
/// the app_users row so freshly signed-up owners exist locally.
pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = require_session(&state, &headers).await?;
    ensure_app_user(&state, &session.sub, session.email.as_deref()).await?;
    let property_ids = list_owned_property_ids(&state, &session.sub).await?;

    Ok(Json(json!({
        "user_id": session.sub,
        "email": session.email,
        "property_count": property_ids.len(),
        "property_ids": property_ids,
    })))
}
