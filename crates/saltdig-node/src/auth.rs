//! Credential extraction for the HTTP boundary.
//!
//! Agents authenticate with `Authorization: Bearer <api_key>` or the
//! `x-api-key` header. The reconciler endpoint authorizes with the
//! CRON shared secret, compared in constant time.

use axum::http::HeaderMap;
use saltdig_common::constant_time_eq;

/// Pull the agent API key out of the request headers.
pub fn api_key_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

/// Constant-time check of the reconciler's shared secret. A missing
/// configured secret denies every request.
pub fn cron_authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-cron-secret").and_then(|v| v.to_str().ok()));

    match presented {
        Some(presented) => constant_time_eq(presented.trim().as_bytes(), expected.as_bytes()),
        None => false,
    }
}
