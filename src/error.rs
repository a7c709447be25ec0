//! Error types for the gateway.
//!
//! Expected per-request conditions (auth failure, unknown session, bad
//! request) are values converted to a JSON-RPC error envelope at the router
//! boundary. Process-level faults never travel this path; they go through
//! the shutdown coordinator.

use axum::http::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Per-request failure classes with their fixed JSON-RPC codes.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> i64 {
        match self {
            GatewayError::Unauthorized => -32001,
            GatewayError::UnknownSession(_) => -32000,
            GatewayError::BadRequest(_) => -32600,
            GatewayError::Internal(_) => -32603,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::UnknownSession(_) => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON-RPC error envelope with a null id, as sent on every failure
    /// short-circuited before or at the router.
    pub fn envelope(&self) -> Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "error": { "code": self.code(), "message": self.to_string() },
            "id": null,
        })
    }
}

/// Fatal startup failures. The process logs these and exits 1 without
/// serving anything.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("invalid value for {name}: {detail}")]
    InvalidEnv { name: &'static str, detail: String },

    #[error("failed to initialize WordPress client: {0}")]
    ClientInit(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
}
