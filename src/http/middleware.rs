//! Request middleware: rate limiting, security headers, correlation IDs and access logs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::HttpBody,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderName, HeaderValue, Method, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use super::client_id::resolve_client_id;
use super::error::ApiError;
use crate::ratelimit::RateLimiter;

pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Message returned to throttled clients.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again later";

/// Correlation ID assigned to a request, available as a request extension.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Reject the request with `429` when its client has no tokens left.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client_id = resolve_client_id(request.headers(), peer_addr(&request));

    if !limiter.allow(&client_id) {
        warn!(
            client_id = %client_id,
            method = %request.method(),
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        return ApiError::RateLimitExceeded(RATE_LIMIT_MESSAGE.to_string()).into_response();
    }

    next.run(request).await
}

/// Add hardening headers to every response.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );

    response
}

/// Reuse the caller's `X-Correlation-ID` or mint one, and echo it on the response.
///
/// Everything downstream runs inside a span carrying the ID, method, path and
/// client, so events logged further in (a recovered panic included) carry
/// them too.
pub async fn correlation_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(&X_CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(CorrelationId(id.clone()));

    let span = tracing::info_span!(
        "request",
        correlation_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
        client_ip = %resolve_client_id(request.headers(), peer_addr(&request)),
    );
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(X_CORRELATION_ID, value);
    }
    response
}

/// Log one line per completed request, with the level chosen by status class.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method: Method = request.method().clone();
    let path = match request.uri().query() {
        Some(query) => format!("{}?{}", request.uri().path(), query),
        None => request.uri().path().to_string(),
    };
    let client_ip = resolve_client_id(request.headers(), peer_addr(&request));
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let response = next.run(request).await;

    let status = response.status();
    let body_size = body_size(&response).map_or(-1, |n| n as i64);
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    macro_rules! log_request {
        ($level:ident) => {
            $level!(
                method = %method,
                path = %path,
                status = status.as_u16(),
                latency_ms = latency_ms,
                body_size = body_size,
                client_ip = %client_ip,
                user_agent = %user_agent,
                "HTTP request"
            )
        };
    }

    if status.is_server_error() {
        log_request!(error);
    } else if status.is_client_error() {
        log_request!(warn);
    } else {
        log_request!(info);
    }

    response
}

/// Response body length from `Content-Length`, else from an exact size hint.
fn body_size(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or_else(|| response.body().size_hint().exact())
}

/// Fallback for unmatched routes.
pub async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {} {}", method, uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode};

    #[test]
    fn test_body_size_from_buffered_body() {
        let response = "hello".into_response();
        assert_eq!(body_size(&response), Some(5));

        let empty = StatusCode::NO_CONTENT.into_response();
        assert_eq!(body_size(&empty), Some(0));
    }

    #[test]
    fn test_body_size_prefers_content_length() {
        let mut response = Response::new(Body::from("abc"));
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        assert_eq!(body_size(&response), Some(42));
    }

    #[tokio::test]
    async fn test_not_found_names_the_route() {
        let error = not_found(Method::DELETE, Uri::from_static("/v1/projects/7")).await;
        assert!(matches!(error, ApiError::NotFound(ref m) if m == "no route for DELETE /v1/projects/7"));
    }
}
