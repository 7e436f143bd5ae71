//! HTTP layer: middleware stack, health endpoint and server runner.

pub mod cache;
pub mod client_id;
pub mod cors;
pub mod error;
pub mod health;
pub mod middleware;
pub mod server;

pub use cache::CachePolicy;
pub use client_id::resolve_client_id;
pub use error::ApiError;
pub use server::{build_router, AppState, HttpServer};
