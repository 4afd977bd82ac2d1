//! HTTP API Server
//!
//! Assembles the router and runs the axum server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use http::{HeaderValue, Method, header};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};

use wp_core::ServerConfig;
use wp_link::PairingService;
use wp_ws::ws_router;

use crate::handlers::health;
use crate::middleware::auth::{ApiKey, auth_middleware};
use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter};
use crate::routes::routes;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: PairingService,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(service: PairingService) -> Self {
        let limit = service.config().server.rate_limit_per_minute;
        Self {
            service,
            limiter: Arc::new(RateLimiter::with_config(RateLimitConfig::per_minute(limit))),
        }
    }
}

/// Build the full application router
pub fn build_router(state: AppState) -> Router {
    let server = &state.service.config().server;
    let api_key = ApiKey::new(server.api_key.as_deref());
    if api_key.is_enabled() {
        info!("API key authentication enabled");
    }

    let protected = routes(state.clone())
        .merge(ws_router(state.service.clone()))
        .route_layer(middleware::from_fn_with_state(api_key, auth_middleware));

    let mut router = Router::new()
        .route("/health", get(health))
        .merge(protected);

    // Add static file serving if directory provided
    if let Some(dir) = &server.static_dir {
        info!("Serving static files from: {}", dir);
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(cors_layer(server))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let Some(origins) = &server.allowed_origins else {
        return CorsLayer::permissive();
    };

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Start the HTTP API server
///
/// Runs until `shutdown` resolves.
pub async fn start_server<F>(service: PairingService, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = service.config().bind_addr();
    let state = AppState::new(service);

    let limiter = Arc::clone(&state.limiter);
    let cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(limiter.window());
        loop {
            interval.tick().await;
            limiter.cleanup().await;
        }
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP API listening on {}", listener.local_addr()?);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    cleanup.abort();
    result?;

    Ok(())
}
