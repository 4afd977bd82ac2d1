//! Middleware modules
//!
//! Contains authentication and rate limiting middleware.

pub mod auth;
pub mod rate_limit;
