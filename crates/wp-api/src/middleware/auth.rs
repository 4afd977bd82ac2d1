//! Authentication middleware
//!
//! Provides API key authentication for protected endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::error::ApiError;

/// Configured API key, if any
#[derive(Debug, Clone, Default)]
pub struct ApiKey(Option<Arc<str>>);

impl ApiKey {
    pub fn new(key: Option<&str>) -> Self {
        Self(key.filter(|k| !k.is_empty()).map(Arc::from))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }
}

/// Path whose clients may pass the key as `?token=`
const WS_PATH: &str = "/ws";

/// API key authentication middleware
///
/// Expects `Authorization: Bearer <key>` when a key is configured. Browsers
/// cannot set headers on a WebSocket handshake, so `/ws` also accepts
/// `?token=<key>`.
pub async fn auth_middleware(
    State(expected): State<ApiKey>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    let provided = bearer.or_else(|| query_token(&request));

    if !validate_api_key(provided.as_deref(), expected.0.as_deref()) {
        debug!("Rejected request to {}", request.uri().path());
        return Err(ApiError::AuthFailed);
    }

    Ok(next.run(request).await)
}

fn query_token(request: &Request) -> Option<String> {
    if request.uri().path() != WS_PATH {
        return None;
    }
    let Query(mut params) =
        Query::<HashMap<String, String>>::try_from_uri(request.uri()).ok()?;
    params.remove("token")
}

/// Simple API key validation
pub fn validate_api_key(provided: Option<&str>, expected: Option<&str>) -> bool {
    match (provided, expected) {
        (Some(p), Some(e)) => p == e,
        (_, None) => true,        // No key configured, allow
        (None, Some(_)) => false, // Key required but not provided
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_api_key_no_key_configured() {
        assert!(validate_api_key(None, None));
        assert!(validate_api_key(Some("any"), None));
    }

    #[test]
    fn test_validate_api_key_with_key_configured() {
        assert!(!validate_api_key(None, Some("secret")));
        assert!(!validate_api_key(Some("wrong"), Some("secret")));
        assert!(validate_api_key(Some("secret"), Some("secret")));
    }

    fn request(uri: &str) -> Request {
        http::Request::builder()
            .uri(uri)
            .body(axum::body::Body::empty())
            .unwrap()
    }

    #[test]
    fn test_query_token_only_on_ws() {
        assert_eq!(
            query_token(&request("/ws?token=s%20cret")).as_deref(),
            Some("s cret")
        );
        assert_eq!(query_token(&request("/ws")), None);
        assert_eq!(query_token(&request("/api/sessions?token=secret")), None);
    }

    #[test]
    fn test_empty_key_disables_auth() {
        assert!(!ApiKey::new(Some("")).is_enabled());
        assert!(!ApiKey::new(None).is_enabled());
        assert!(ApiKey::new(Some("secret")).is_enabled());
    }
}
