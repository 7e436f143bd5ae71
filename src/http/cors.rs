//! CORS layer built from configuration.

use std::time::Duration;

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::CorsConfig;
use crate::error::{Error, Result};

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(86_400);

/// Build the CORS layer.
///
/// A `*` entry in `allowed_origins` mirrors the request origin back, which
/// keeps credentialed requests working.
pub fn cors_layer(config: &CorsConfig) -> Result<CorsLayer> {
    let origin = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        let origins = config
            .allowed_origins
            .iter()
            .map(|o| {
                HeaderValue::from_str(o)
                    .map_err(|e| Error::Config(format!("invalid CORS origin '{}': {}", o, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    let methods = config
        .allowed_methods
        .iter()
        .map(|m| {
            m.parse::<Method>()
                .map_err(|e| Error::Config(format!("invalid CORS method '{}': {}", m, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let headers = config
        .allowed_headers
        .iter()
        .map(|h| {
            h.parse::<HeaderName>()
                .map_err(|e| Error::Config(format!("invalid CORS header '{}': {}", h, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
        .max_age(PREFLIGHT_MAX_AGE)
        .expose_headers([header::CACHE_CONTROL, header::ETAG, header::LAST_MODIFIED]))
}

/// Turn the CORS layer's `200` preflight answer into `204 No Content`.
///
/// Layer directly outside [`cors_layer`].
pub async fn preflight_no_content(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = next.run(request).await;
    if preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}
