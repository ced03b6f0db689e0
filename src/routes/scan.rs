use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use sqlx::Row;

use crate::{
    error::{AppError, AppResult},
    repository::table_service::create_row,
    schemas::{non_empty_opt, require_slug, ScanInput},
    state::AppState,
};

/// What a resolved page row means for an incoming scan. `None` is an unknown
/// slug; an unpublished page is acknowledged without being stored.
#[derive(Debug, PartialEq)]
enum ScanDisposition {
    Record(Value),
    Acknowledge,
    NotFound,
}

fn scan_disposition(page: Option<Value>) -> ScanDisposition {
    match page {
        None => ScanDisposition::NotFound,
        Some(page) => {
            if page.get("published").and_then(Value::as_bool).unwrap_or(false) {
                ScanDisposition::Record(page)
            } else {
                ScanDisposition::Acknowledge
            }
        }
    }
}

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/public/guest-pages/scan",
        axum::routing::post(record_scan),
    )
}

/// Unauthenticated tap endpoint hit by NFC tags. A scan against a published
/// page is recorded; a scan against an unpublished page is acknowledged but
/// not stored. Only an unknown slug is an error, so a tag pointing at a
/// temporarily hidden page keeps working for the guest.
async fn record_scan(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ScanInput>,
) -> AppResult<Json<Value>> {
    let slug = require_slug(&payload.slug)?;
    let Some(pool) = state.db_pool.clone() else {
        // Scan recording must never break the guest's tap.
        tracing::warn!(slug = %slug, suppressed = true, "Database is not configured; scan dropped");
        return Ok(Json(json!({"success": true})));
    };

    let lookup = state
        .guest_page_cache
        .try_get_with(slug.clone(), fetch_page_by_slug(pool.clone(), slug.clone()))
        .await;

    let resolved = match lookup {
        Ok(resolved) => resolved,
        Err(error) => {
            tracing::warn!(error = %error, slug = %slug, suppressed = true, "Guest page lookup failed; scan dropped");
            return Ok(Json(json!({"success": true})));
        }
    };

    let page = match scan_disposition(resolved) {
        ScanDisposition::NotFound => {
            return Err(AppError::NotFound("Guest page not found.".to_string()))
        }
        ScanDisposition::Acknowledge => return Ok(Json(json!({"success": true}))),
        ScanDisposition::Record(page) => page,
    };

    let client_ip = client_ip(&headers, &addr);
    let mut record = Map::new();
    if let Some(guest_page_id) = page.get("id").and_then(Value::as_str) {
        record.insert(
            "guest_page_id".to_string(),
            Value::String(guest_page_id.to_string()),
        );
    }
    record.insert("slug".to_string(), Value::String(slug.clone()));
    record.insert(
        "scanned_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    record.insert(
        "ip_hash".to_string(),
        Value::String(hash_ip(&state.config.scan_ip_salt, &client_ip)),
    );
    if let Some(user_agent) = non_empty_opt(payload.user_agent.as_deref()) {
        record.insert("user_agent".to_string(), Value::String(user_agent));
    }
    if let Some(utm_source) = non_empty_opt(payload.utm_source.as_deref()) {
        record.insert("utm_source".to_string(), Value::String(utm_source));
    }
    if let Some(utm_medium) = non_empty_opt(payload.utm_medium.as_deref()) {
        record.insert("utm_medium".to_string(), Value::String(utm_medium));
    }

    if let Err(error) = create_row(&pool, "scan_events", &record).await {
        tracing::warn!(error = %error, slug = %slug, suppressed = true, "Scan event insert failed; scan dropped");
    }

    Ok(Json(json!({"success": true})))
}

async fn fetch_page_by_slug(pool: sqlx::PgPool, slug: String) -> Result<Option<Value>, sqlx::Error> {
    let row = sqlx::query("SELECT row_to_json(t)::jsonb AS row FROM guest_pages t WHERE slug = $1")
        .bind(&slug)
        .fetch_optional(&pool)
        .await?;
    Ok(row.and_then(|row| row.try_get::<Value, _>("row").ok()))
}

/// First hop of x-forwarded-for when present, else the socket peer address.
fn client_ip(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| addr.ip().to_string())
}

/// Salted, truncated digest of the client IP. The raw address is never
/// stored; 64 bits of digest is plenty for distinct-visitor counting.
fn hash_ip(salt: &str, ip: &str) -> String {
    let digest = Sha256::digest(format!("{salt}:{ip}").as_bytes());
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::http::{HeaderMap, HeaderValue};
    use serde_json::json;

    use super::{client_ip, hash_ip, scan_disposition, ScanDisposition};

    #[test]
    fn ip_hash_is_salted_and_truncated() {
        let hash = hash_ip("simplytouch", "203.0.113.7");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!hash.contains("203.0.113.7"));
        // Deterministic for the same input, distinct across IPs and salts.
        assert_eq!(hash, hash_ip("simplytouch", "203.0.113.7"));
        assert_ne!(hash, hash_ip("simplytouch", "203.0.113.8"));
        assert_ne!(hash, hash_ip("other-salt", "203.0.113.7"));
    }

    #[test]
    fn published_pages_record_unpublished_pages_acknowledge() {
        let published = json!({"id": "abc", "slug": "loft-12", "published": true});
        assert_eq!(
            scan_disposition(Some(published.clone())),
            ScanDisposition::Record(published)
        );

        let hidden = json!({"id": "abc", "slug": "loft-12", "published": false});
        assert_eq!(
            scan_disposition(Some(hidden)),
            ScanDisposition::Acknowledge
        );

        // A page row missing the flag entirely is treated as unpublished.
        let missing_flag = json!({"id": "abc", "slug": "loft-12"});
        assert_eq!(
            scan_disposition(Some(missing_flag)),
            ScanDisposition::Acknowledge
        );

        assert_eq!(scan_disposition(None), ScanDisposition::NotFound);
    }

    #[test]
    fn forwarded_header_wins_over_peer_address() {
        let addr: SocketAddr = "10.0.0.1:4444".parse().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.2"),
        );
        assert_eq!(client_ip(&headers, &addr), "203.0.113.7");

        assert_eq!(client_ip(&HeaderMap::new(), &addr), "10.0.0.1");
    }
}
