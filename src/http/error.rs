//! JSON error responses.

use std::any::Any;

use axum::{
    body::Body,
    http::{header, Response as HttpResponse, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Wire shape of every error body: `{"error": "...", "message": "..."}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(self) -> ErrorBody {
        match self {
            ApiError::RateLimitExceeded(message) => ErrorBody {
                error: "rate_limit_exceeded",
                message,
            },
            ApiError::NotFound(message) => ErrorBody {
                error: "not_found",
                message,
            },
            // Internal details stay in the logs.
            ApiError::Internal(_) => ErrorBody {
                error: "internal_server_error",
                message: "An unexpected error occurred".to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref msg) = self {
            error!(error = %msg, "Internal error");
        }
        let status = self.status();
        (status, Json(self.body())).into_response()
    }
}

/// Response for a handler that panicked. Used with `CatchPanicLayer::custom`.
///
/// Runs inside the request span, so the log event carries the request's
/// method, path and client.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> HttpResponse<Body> {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    error!(panic = %detail, "Panic recovered");

    let body = ErrorBody {
        error: "internal_server_error",
        message: "An unexpected error occurred".to_string(),
    };
    let json = serde_json::to_vec(&body).unwrap_or_default();

    let mut response = HttpResponse::new(Body::from(json));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
