//! HTTP binding: streamable-HTTP style transport on `/mcp`.
//!
//! POST carries client-to-server frames, GET attaches a server-to-client
//! SSE stream, DELETE terminates the session. Sessions are identified by
//! the `Mcp-Session-Id` header; only an `initialize` request may arrive
//! without one.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::auth::auth_middleware;
use super::session::Session;
use super::ServerContext;
use crate::error::{GatewayError, StartupError};
use crate::mcp::{JsonRpcMessage, JsonRpcResponse};

pub const SESSION_HEADER: &str = "mcp-session-id";

const SSE_KEEP_ALIVE_SECS: u64 = 15;

pub fn build_router(ctx: Arc<ServerContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route("/", get(banner))
        .route("/healthz", get(healthz))
        .route("/mcp", get(mcp_get).post(mcp_post).delete(mcp_delete))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&ctx),
            auth_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind and serve until the token is cancelled. Returns once the listener
/// has shut down; session cleanup is the coordinator's job.
pub async fn serve(
    ctx: Arc<ServerContext>,
    port: u16,
    cancel: CancellationToken,
) -> Result<(), StartupError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    info!(%addr, "listening for MCP connections");

    let app = build_router(ctx);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|source| StartupError::Bind { addr, source })
}

async fn banner() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}

async fn healthz() -> &'static str {
    "ok"
}

/// First header value wins when a client repeats the session header.
fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn error_response(err: GatewayError) -> Response {
    (err.status(), Json(err.envelope())).into_response()
}

fn parse_error_response() -> Response {
    let envelope = serde_json::json!({
        "jsonrpc": "2.0",
        "error": { "code": -32700, "message": "parse error" },
        "id": null,
    });
    (StatusCode::BAD_REQUEST, Json(envelope)).into_response()
}

/// JSON-RPC reply with the session header attached.
fn jsonrpc_response(session_id: &str, response: &JsonRpcResponse) -> Response {
    let mut resp = Json(response).into_response();
    if let Ok(value) = header::HeaderValue::from_str(session_id) {
        resp.headers_mut()
            .insert(header::HeaderName::from_static(SESSION_HEADER), value);
    }
    resp
}

async fn mcp_post(
    State(ctx): State<Arc<ServerContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let msg: JsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(_) => {
            // Batches are rejected along with malformed frames.
            return parse_error_response();
        }
    };

    match session_id(&headers) {
        None => initialize_session(ctx, msg).await,
        Some(id) => {
            let Some(session) = ctx.sessions.get(id) else {
                return error_response(GatewayError::UnknownSession(id.to_string()));
            };
            drive_session(&session, msg).await
        }
    }
}

/// Handle the first POST of a session. Anything but an `initialize`
/// request is rejected; the session is published only after the engine
/// has produced the initialize response.
async fn initialize_session(ctx: Arc<ServerContext>, msg: JsonRpcMessage) -> Response {
    if msg.method() != Some("initialize") || !msg.is_request() {
        return error_response(GatewayError::BadRequest(
            "expected initialize request; include Mcp-Session-Id for an existing session".into(),
        ));
    }

    if ctx.shutting_down.load(Ordering::SeqCst) {
        let envelope = serde_json::json!({
            "jsonrpc": "2.0",
            "error": { "code": -32000, "message": "server is shutting down" },
            "id": null,
        });
        return (StatusCode::SERVICE_UNAVAILABLE, Json(envelope)).into_response();
    }

    let mut engine = ctx.new_engine();
    let Some(response) = engine.handle(msg).await else {
        return error_response(GatewayError::Internal(
            "initialize produced no response".into(),
        ));
    };

    if response.error.is_some() {
        // Initialization failed; nothing gets published.
        return Json(response).into_response();
    }

    let session = ctx.sessions.publish(Session::new(engine));
    debug!(session_id = %session.id, "session initialized");
    jsonrpc_response(&session.id, &response)
}

/// Feed one frame to an existing session's engine. Requests get their
/// response body; notifications and client responses are acknowledged
/// with 202.
async fn drive_session(session: &Session, msg: JsonRpcMessage) -> Response {
    let is_request = msg.is_request();
    let response = session.engine.lock().await.handle(msg).await;

    match (is_request, response) {
        (true, Some(response)) => jsonrpc_response(&session.id, &response),
        (true, None) => error_response(GatewayError::Internal("request produced no response".into())),
        (false, _) => StatusCode::ACCEPTED.into_response(),
    }
}

async fn mcp_get(State(ctx): State<Arc<ServerContext>>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return error_response(GatewayError::BadRequest("missing Mcp-Session-Id".into()));
    };
    let Some(session) = ctx.sessions.get(id) else {
        return error_response(GatewayError::UnknownSession(id.to_string()));
    };

    // One stream per session. A second GET conflicts instead of silently
    // stealing the first stream's messages.
    let Some(rx) = session.take_push_receiver() else {
        return StatusCode::CONFLICT.into_response();
    };

    debug!(session_id = %session.id, "SSE stream attached");
    let stream = PushStream {
        rx: Some(rx),
        session: Arc::downgrade(&session),
    };
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS))
                .text("keep-alive"),
        )
        .into_response()
}

/// SSE stream over the session's push channel. When the client drops the
/// stream the receiver goes back to the session, so a later GET can
/// re-attach instead of conflicting forever.
struct PushStream {
    rx: Option<mpsc::Receiver<JsonRpcResponse>>,
    session: Weak<Session>,
}

impl Stream for PushStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(None);
        };
        loop {
            match rx.poll_recv(cx) {
                Poll::Ready(Some(msg)) => match Event::default().event("message").json_data(&msg) {
                    Ok(event) => return Poll::Ready(Some(Ok(event))),
                    Err(e) => {
                        warn!(error = %e, "dropping unserializable push message");
                        continue;
                    }
                },
                Poll::Ready(None) => {
                    // Session closed; nothing to hand back.
                    this.rx = None;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        if let (Some(rx), Some(session)) = (self.rx.take(), self.session.upgrade()) {
            session.restore_push_receiver(rx);
        }
    }
}

async fn mcp_delete(State(ctx): State<Arc<ServerContext>>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return error_response(GatewayError::BadRequest("missing Mcp-Session-Id".into()));
    };
    let Some(session) = ctx.sessions.remove(id) else {
        return error_response(GatewayError::UnknownSession(id.to_string()));
    };

    session.close().await;
    info!(session_id = %id, "session terminated by client");
    StatusCode::OK.into_response()
}
