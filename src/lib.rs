//! Portfolio Gate - HTTP edge layer for the portfolio API
//!
//! This crate gates the portfolio's read-mostly REST API with a per-client
//! token-bucket rate limiter whose idle clients are evicted by a background
//! janitor, and provides the surrounding middleware stack: CORS, caching and
//! security headers, correlation IDs, request logging and panic recovery.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod telemetry;
