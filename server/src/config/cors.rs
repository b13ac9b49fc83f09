use axum::http::{header, HeaderName, HeaderValue, Method};
use std::env;
use tower_http::cors::{AllowOrigin, CorsLayer};

const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:5173,http://localhost:8080";

const PREFLIGHT_MAX_AGE_SECS: u64 = 86400;

/// The booking API is POST-only; the webhook is called server to server and
/// never needs CORS, but sharing one layer keeps the router simple.
pub fn create_cors_layer() -> CorsLayer {
    let (origins, restricted) = allowed_origins(&origins_from_env());

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ])
        // Credentials cannot be combined with a wildcard origin.
        .allow_credentials(restricted)
        .max_age(std::time::Duration::from_secs(PREFLIGHT_MAX_AGE_SECS))
}

fn origins_from_env() -> String {
    env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.to_string())
}

/// Returns the origin policy and whether it is an explicit list.
fn allowed_origins(raw: &str) -> (AllowOrigin, bool) {
    let origins = parse_origins(raw);

    if origins.is_empty() {
        tracing::warn!("CORS: No valid origins configured, allowing any origin");
        (AllowOrigin::any(), false)
    } else {
        tracing::info!("CORS: Configured with {} allowed origin(s)", origins.len());
        (AllowOrigin::list(origins), true)
    }
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                None
            }
        })
        .collect()
}
