//! Rate limiting middleware
//!
//! Fixed-window request limit per client on the session-creation routes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::ApiError;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window; 0 disables the limit
    pub max_requests: u32,
    /// Time window for rate limiting
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

/// Client rate limit state
#[derive(Clone)]
struct ClientState {
    request_count: u32,
    window_start: Instant,
}

/// In-memory rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: Arc<RwLock<HashMap<String, ClientState>>>,
}

impl RateLimiter {
    /// Create a rate limiter with custom configuration
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }

    /// Check if a client is allowed to make a request
    pub async fn check(&self, client_id: &str) -> bool {
        if self.config.max_requests == 0 {
            return true;
        }

        let mut clients = self.clients.write().await;
        let now = Instant::now();

        let state = clients.entry(client_id.to_string()).or_insert(ClientState {
            request_count: 0,
            window_start: now,
        });

        // Reset window if expired
        if now.duration_since(state.window_start) > self.config.window {
            state.request_count = 0;
            state.window_start = now;
        }

        if state.request_count >= self.config.max_requests {
            warn!("Rate limit exceeded for client: {}", client_id);
            return false;
        }

        state.request_count += 1;
        true
    }

    /// Drop entries whose window has passed
    pub async fn cleanup(&self) {
        let mut clients = self.clients.write().await;
        let now = Instant::now();

        clients.retain(|_, state| now.duration_since(state.window_start) <= self.config.window);
    }

    pub async fn tracked_clients(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::with_config(RateLimitConfig::default())
    }
}

/// Identify the caller: first `x-forwarded-for` hop, else the peer address
fn client_id(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client_id = client_id(&request);

    if !limiter.check(&client_id).await {
        return Err(ApiError::RateLimited);
    }

    Ok(next.run(request).await)
}
