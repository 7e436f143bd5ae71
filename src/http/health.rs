//! Health endpoint.
//!
//! GET /v1/health - liveness probe, never cached

use axum::{extract::State, middleware, routing::get, Json, Router};
use serde::Serialize;

use super::cache::{cache_headers, CachePolicy};
use super::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub tracked_clients: usize,
}

/// GET /v1/health
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        tracked_clients: state.rate_limiter.tracked_clients(),
    })
}

/// Build the health router sub-tree.
pub fn health_router() -> Router<AppState> {
    Router::new().route(
        "/v1/health",
        get(health).layer(middleware::from_fn_with_state(
            CachePolicy::no_cache(),
            cache_headers,
        )),
    )
}
