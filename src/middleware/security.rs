use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

/// Reject requests whose Host header is not on the configured allow-list.
/// An empty list or a `*` entry disables the check.
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let trusted = &state.config.trusted_hosts;
    if trusted.is_empty() || trusted.iter().any(|host| host.trim() == "*") {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(strip_port)
        .unwrap_or_default();

    if trusted.iter().any(|candidate| host_matches(candidate, host)) {
        return next.run(request).await;
    }

    tracing::warn!(host, "Rejected request from untrusted host");
    (StatusCode::BAD_REQUEST, "Invalid host header").into_response()
}

fn strip_port(host: &str) -> &str {
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

fn host_matches(candidate: &str, host: &str) -> bool {
    let candidate = candidate.trim();
    if let Some(suffix) = candidate.strip_prefix("*.") {
        return host.ends_with(suffix) && host.len() > suffix.len();
    }
    candidate.eq_ignore_ascii_case(host)
}

#[cfg(test)]
mod tests {
    use super::{host_matches, strip_port};

    #[test]
    fn strips_port_suffix() {
        assert_eq!(strip_port("localhost:8000"), "localhost");
        assert_eq!(strip_port("api.simplytouch.app"), "api.simplytouch.app");
    }

    #[test]
    fn matches_wildcard_subdomains() {
        assert!(host_matches("*.simplytouch.app", "api.simplytouch.app"));
        assert!(!host_matches("*.simplytouch.app", "simplytouch.app"));
        assert!(host_matches("localhost", "LOCALHOST"));
    }
}
