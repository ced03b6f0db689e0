use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Claims we care about from the identity provider's session token.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub email: Option<String>,
    #[allow(dead_code)]
    pub exp: usize,
}

/// Resolve the caller's user id from the Authorization header.
///
/// Outside production an `x-user-id` header can stand in for a real token when
/// DEV_AUTH_OVERRIDES_ENABLED is set.
pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    Ok(require_session(state, headers).await?.sub)
}

pub async fn require_session(state: &AppState, headers: &HeaderMap) -> AppResult<SessionClaims> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = header_value(headers, "x-user-id") {
            return Ok(SessionClaims {
                sub: user_id,
                email: None,
                exp: 0,
            });
        }
    }

    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token.".to_string()))?;

    let secret = state.config.auth_jwt_secret.as_deref().ok_or_else(|| {
        AppError::Dependency("Identity provider is not configured. Set AUTH_JWT_SECRET.".to_string())
    })?;

    let claims = decode::<SessionClaims>(
        &token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|error| {
        tracing::debug!(error = %error, "Session token rejected");
        AppError::Unauthorized("Invalid or expired session token.".to_string())
    })?
    .claims;

    if claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Session token is missing a subject.".to_string(),
        ));
    }

    Ok(claims)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = header_value(headers, "authorization")?;
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToOwned::to_owned)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue};

    use super::bearer_token;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer  "));
        assert_eq!(bearer_token(&headers), None);
    }
}
