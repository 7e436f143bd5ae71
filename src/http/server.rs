//! HTTP server: router assembly and serving with graceful shutdown.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use super::cors::{cors_layer, preflight_no_content};
use super::error::panic_response;
use super::health::health_router;
use super::middleware::{correlation_id, not_found, rate_limit, request_logger, security_headers};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::ratelimit::RateLimiter;

/// State shared with handlers that need it.
#[derive(Clone)]
pub struct AppState {
    /// Per-client rate limiter
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Self {
        Self { rate_limiter }
    }
}

/// Assemble the application router.
///
/// `content` carries the portfolio content routes; they share the health
/// route's middleware stack. Layers run outermost first: security headers,
/// CORS, correlation ID, request logging, request timeout, panic recovery,
/// rate limiting. Panic and timeout responses therefore still get headers and
/// an access log line.
pub fn build_router(state: AppState, config: &AppConfig, content: Router) -> Result<Router> {
    let cors = cors_layer(&config.cors)?;

    let timeout = config.server.request_timeout();
    if timeout.is_zero() {
        return Err(Error::Config("request timeout must be positive".to_string()));
    }

    Ok(health_router()
        .with_state(state.clone())
        .merge(content)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.rate_limiter),
            rate_limit,
        ))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TimeoutLayer::new(timeout))
        .layer(middleware::from_fn(request_logger))
        .layer(middleware::from_fn(correlation_id))
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content))
        .layer(middleware::from_fn(security_headers)))
}

/// HTTP server bound to a listener.
pub struct HttpServer {
    listener: TcpListener,
    app: Router,
    rate_limiter: Arc<RateLimiter>,
    shutdown_grace: Duration,
}

impl HttpServer {
    /// Bind the listening socket.
    pub async fn bind(
        addr: SocketAddr,
        app: Router,
        rate_limiter: Arc<RateLimiter>,
        shutdown_grace: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!(addr = %addr, error = %e, "Failed to bind HTTP listener");
            Error::Io(e)
        })?;

        Ok(Self {
            listener,
            app,
            rate_limiter,
            shutdown_grace,
        })
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    ///
    /// Connections still open after the grace period are dropped. The rate
    /// limiter's janitor is stopped before returning.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!(addr = %addr, "HTTP server listening");

        let grace = self.shutdown_grace;
        let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
        let shutdown = async move {
            signal.await;
            info!(grace_secs = grace.as_secs(), "Shutdown requested, draining in-flight requests");
            let _ = signalled_tx.send(());
        };

        let server = axum::serve(
            self.listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .into_future();

        let deadline = async move {
            match signalled_rx.await {
                Ok(()) => tokio::time::sleep(grace).await,
                Err(_) => std::future::pending::<()>().await,
            }
        };

        let result = tokio::select! {
            result = server => result.map_err(|e| {
                error!(error = %e, "HTTP server failed");
                Error::Io(e)
            }),
            _ = deadline => {
                warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out, dropping connections");
                Ok(())
            }
        };

        self.rate_limiter.shutdown();
        info!("HTTP server stopped");
        result
    }
}
