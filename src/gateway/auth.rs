//! Bearer-token gate for the HTTP binding.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::debug;

use super::ServerContext;
use crate::error::GatewayError;

/// Paths served without a token. Everything else requires the exact
/// `Bearer <token>` header when a token is configured.
const OPEN_PATHS: &[&str] = &["/", "/healthz"];

pub async fn auth_middleware(
    State(ctx): State<Arc<ServerContext>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = ctx.api_token.as_deref() else {
        // No token configured: the gate is disabled entirely.
        return next.run(request).await;
    };

    if OPEN_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        _ => {
            debug!(path = %request.uri().path(), "rejected request with missing or bad token");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    let err = GatewayError::Unauthorized;
    (err.status(), Json(err.envelope())).into_response()
}

/// Compare tokens without an early exit on the first mismatching byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison_is_exact() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secret "));
        assert!(!constant_time_eq(b"secret", b"Secret"));
        assert!(!constant_time_eq(b"", b"secret"));
        assert!(constant_time_eq(b"", b""));
    }
}
