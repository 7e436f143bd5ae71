//! Caching headers for GET responses, with optional body-hash ETags.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use http_body_util::BodyExt;
use sha2::{Digest, Sha256};

use super::error::ApiError;

/// `Cache-Control` policy applied to a group of routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Seconds the response may be cached; `0` disables caching
    pub max_age_secs: u32,
    /// Whether shared caches (CDNs) may store the response
    pub public: bool,
    /// Hash `200` bodies into an `ETag` and answer matching
    /// `If-None-Match` requests with `304`. Buffers the whole body.
    pub etag: bool,
}

impl CachePolicy {
    /// Five minutes, public. For content that changes occasionally.
    pub const fn standard() -> Self {
        Self {
            max_age_secs: 300,
            public: true,
            etag: false,
        }
    }

    /// One hour, public. For near-static content.
    pub const fn long() -> Self {
        Self {
            max_age_secs: 3600,
            public: true,
            etag: false,
        }
    }

    pub const fn no_cache() -> Self {
        Self {
            max_age_secs: 0,
            public: false,
            etag: false,
        }
    }

    /// Same policy with ETag generation turned on.
    pub const fn with_etag(self) -> Self {
        Self { etag: true, ..self }
    }

    /// Value of the `Cache-Control` header.
    pub fn header_value(&self) -> String {
        match (self.max_age_secs, self.public) {
            (0, _) => "no-cache".to_string(),
            (age, true) => format!("public, max-age={}", age),
            (age, false) => format!("private, max-age={}", age),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Current time in IMF-fixdate form, as used by `Last-Modified`.
pub fn http_date_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Strong entity tag for a response body: the quoted hex SHA-256 digest.
pub fn entity_tag(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

fn etag_matches(if_none_match: &HeaderValue, etag: &str) -> bool {
    if_none_match
        .to_str()
        .map(|v| v.split(',').map(str::trim).any(|t| t == etag || t == "*"))
        .unwrap_or(false)
}

/// Set `Cache-Control` and `Last-Modified` on GET responses, plus `ETag` when
/// the policy asks for it.
///
/// Use with `axum::middleware::from_fn_with_state(policy, cache_headers)`.
pub async fn cache_headers(
    State(policy): State<CachePolicy>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let if_none_match = request.headers().get(header::IF_NONE_MATCH).cloned();
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&policy.header_value()) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    if let Ok(value) = HeaderValue::from_str(&http_date_now()) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    if policy.etag && response.status() == StatusCode::OK {
        return tag_response(response, if_none_match).await;
    }
    response
}

async fn tag_response(response: Response, if_none_match: Option<HeaderValue>) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return ApiError::Internal(format!("failed to buffer body: {}", e)).into_response(),
    };
    if bytes.is_empty() {
        return Response::from_parts(parts, Body::empty());
    }

    let etag = entity_tag(&bytes);
    if let Ok(value) = HeaderValue::from_str(&etag) {
        parts.headers.insert(header::ETAG, value);
    }

    if if_none_match.is_some_and(|v| etag_matches(&v, &etag)) {
        parts.status = StatusCode::NOT_MODIFIED;
        parts.headers.remove(header::CONTENT_LENGTH);
        parts.headers.remove(header::CONTENT_TYPE);
        return Response::from_parts(parts, Body::empty());
    }

    Response::from_parts(parts, Body::from(bytes))
}
