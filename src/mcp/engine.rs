//! Per-session protocol engine.
//!
//! One `ProtocolEngine` exists per stdio process or per HTTP session. It
//! consumes decoded JSON-RPC frames one at a time, enforces the MCP
//! lifecycle (initialize before anything but ping), and dispatches tool
//! operations to the [`ToolHandler`] it was constructed with. The tool set
//! is fixed at construction and never changes afterwards.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::jsonrpc::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use super::types::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    ListToolsResult, Tool,
};
use std::sync::Arc;

/// Newest protocol revision this server speaks.
pub const PROTOCOL_VERSION_LATEST: &str = "2025-06-18";

/// Older revisions still accepted from clients.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[PROTOCOL_VERSION_LATEST, "2025-03-26", "2024-11-05"];

/// Seam between the engine and the tool layer. The gateway registers one
/// implementation at startup; tests substitute stubs.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The full static tool set. Called on every `tools/list`.
    fn tools(&self) -> Vec<Tool>;

    /// Invoke a tool by name. Returns `Err` only for protocol-level
    /// failures (unknown tool, handler panic surrogate); tool-level
    /// failures come back as `CallToolResult` with `is_error: true`.
    async fn call(&self, params: CallToolParams) -> Result<CallToolResult, ToolDispatchError>;
}

/// Protocol-level tool dispatch failures.
#[derive(Debug, thiserror::Error)]
pub enum ToolDispatchError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool failed: {0}")]
    Internal(String),
}

/// Static identity and capabilities advertised during initialize.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub server_info: Implementation,
    pub instructions: Option<String>,
    pub capabilities: Value,
}

impl EngineConfig {
    pub fn new(name: &str, version: &str, instructions: Option<String>) -> Self {
        Self {
            server_info: Implementation {
                name: name.to_string(),
                version: version.to_string(),
            },
            instructions,
            capabilities: serde_json::json!({ "tools": { "listChanged": false } }),
        }
    }

    fn negotiate(&self, requested: &str) -> String {
        if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
            requested.to_string()
        } else {
            PROTOCOL_VERSION_LATEST.to_string()
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum EngineState {
    New,
    InitResponded,
    Ready,
    Closed,
}

/// MCP lifecycle state machine plus method routing.
pub struct ProtocolEngine {
    config: EngineConfig,
    tools: Arc<dyn ToolHandler>,
    state: EngineState,
    protocol_version: Option<String>,
}

impl ProtocolEngine {
    pub fn new(config: EngineConfig, tools: Arc<dyn ToolHandler>) -> Self {
        Self {
            config,
            tools,
            state: EngineState::New,
            protocol_version: None,
        }
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.state == EngineState::Closed
    }

    /// Mark the engine closed. Any frame handled afterwards is answered
    /// with an internal error; callers are expected not to send any.
    pub fn close(&mut self) {
        self.state = EngineState::Closed;
    }

    /// Handle one frame. Requests produce exactly one response;
    /// notifications and stray responses produce none.
    pub async fn handle(&mut self, msg: JsonRpcMessage) -> Option<JsonRpcResponse> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(note) => {
                self.handle_notification(note);
                None
            }
            JsonRpcMessage::Response(_) => None,
        }
    }

    async fn handle_request(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        if req.jsonrpc != "2.0" {
            return error_response(req.id, -32600, "invalid jsonrpc version", None);
        }
        if self.state == EngineState::Closed {
            return error_response(req.id, -32603, "engine closed", None);
        }

        debug!(method = %req.method, "engine request");
        let id = req.id.clone();
        match self.dispatch(req).await {
            Ok(result) => JsonRpcResponse::ok(id, result),
            Err(reject) => error_response(id, reject.code, reject.message, reject.data),
        }
    }

    async fn dispatch(&mut self, req: JsonRpcRequest) -> Result<Value, Reject> {
        match req.method.as_str() {
            "initialize" => self.initialize(req.params),
            // ping is legal in every state
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => {
                self.require_ready()?;
                let result = ListToolsResult {
                    tools: self.tools.tools(),
                    next_cursor: None,
                };
                Ok(serde_json::to_value(result).unwrap_or(Value::Null))
            }
            "tools/call" => {
                self.require_ready()?;
                let params: CallToolParams = decode_params(req.params)?;
                match self.tools.call(params).await {
                    Ok(result) => Ok(serde_json::to_value(result).unwrap_or(Value::Null)),
                    Err(ToolDispatchError::UnknownTool(name)) => Err(Reject::new(
                        -32602,
                        "invalid params",
                        Some(serde_json::json!({ "detail": format!("unknown tool: {name}") })),
                    )),
                    Err(ToolDispatchError::Internal(detail)) => Err(Reject::new(
                        -32603,
                        "internal error",
                        Some(serde_json::json!({ "detail": detail })),
                    )),
                }
            }
            other => Err(Reject::new(
                -32601,
                format!("method not found: {other}"),
                None,
            )),
        }
    }

    fn initialize(&mut self, params: Option<Value>) -> Result<Value, Reject> {
        if self.state != EngineState::New {
            return Err(Reject::new(-32600, "already initialized", None));
        }
        let params: InitializeParams = decode_params(params)?;

        let negotiated = self.config.negotiate(&params.protocol_version);
        debug!(
            client = %params.client_info.name,
            requested = %params.protocol_version,
            negotiated = %negotiated,
            "initialize"
        );
        self.protocol_version = Some(negotiated.clone());
        self.state = EngineState::InitResponded;

        let result = InitializeResult {
            protocol_version: negotiated,
            capabilities: self.config.capabilities.clone(),
            server_info: self.config.server_info.clone(),
            instructions: self.config.instructions.clone(),
        };
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }

    fn handle_notification(&mut self, note: JsonRpcNotification) {
        if note.jsonrpc != "2.0" {
            return;
        }
        if note.method == "notifications/initialized" && self.state == EngineState::InitResponded {
            self.state = EngineState::Ready;
        }
    }

    fn require_ready(&self) -> Result<(), Reject> {
        if self.state == EngineState::Ready {
            Ok(())
        } else {
            Err(Reject::new(-32002, "server not initialized", None))
        }
    }
}

struct Reject {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl Reject {
    fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, Reject> {
    let value = params.ok_or_else(|| Reject::new(-32602, "missing params", None))?;
    serde_json::from_value(value).map_err(|e| {
        Reject::new(
            -32602,
            "invalid params",
            Some(serde_json::json!({ "detail": e.to_string() })),
        )
    })
}

fn error_response(
    id: JsonRpcId,
    code: i64,
    message: impl Into<String>,
    data: Option<Value>,
) -> JsonRpcResponse {
    JsonRpcResponse::err(
        id,
        JsonRpcError {
            code,
            message: message.into(),
            data,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::ContentBlock;

    struct EchoTools;

    #[async_trait]
    impl ToolHandler for EchoTools {
        fn tools(&self) -> Vec<Tool> {
            vec![Tool {
                name: "echo".to_string(),
                description: Some("echo".to_string()),
                input_schema: serde_json::json!({"type": "object"}),
            }]
        }

        async fn call(&self, params: CallToolParams) -> Result<CallToolResult, ToolDispatchError> {
            if params.name != "echo" {
                return Err(ToolDispatchError::UnknownTool(params.name));
            }
            Ok(CallToolResult::success(vec![ContentBlock::text("echoed")]))
        }
    }

    fn engine() -> ProtocolEngine {
        ProtocolEngine::new(
            EngineConfig::new("test", "0.0.0", None),
            Arc::new(EchoTools),
        )
    }

    fn request(id: i64, method: &str, params: Option<Value>) -> JsonRpcMessage {
        JsonRpcMessage::Request(JsonRpcRequest::new(JsonRpcId::Number(id), method, params))
    }

    fn init_params() -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION_LATEST,
            "capabilities": {},
            "clientInfo": { "name": "t", "version": "0" }
        })
    }

    async fn initialize(engine: &mut ProtocolEngine) {
        let resp = engine
            .handle(request(1, "initialize", Some(init_params())))
            .await
            .unwrap();
        assert!(resp.error.is_none());
        engine
            .handle(JsonRpcMessage::Notification(JsonRpcNotification::new(
                "notifications/initialized",
                None,
            )))
            .await;
    }

    #[tokio::test]
    async fn lifecycle_gates_tool_methods() {
        let mut e = engine();

        let resp = e.handle(request(1, "tools/list", None)).await.unwrap();
        assert_eq!(resp.error.as_ref().map(|err| err.code), Some(-32002));

        // ping works before initialize
        let resp = e.handle(request(2, "ping", None)).await.unwrap();
        assert!(resp.error.is_none());

        let resp = e
            .handle(request(3, "initialize", Some(init_params())))
            .await
            .unwrap();
        assert!(resp.error.is_none());
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION_LATEST);
        assert_eq!(result["serverInfo"]["name"], "test");

        // still gated until notifications/initialized arrives
        let resp = e.handle(request(4, "tools/list", None)).await.unwrap();
        assert_eq!(resp.error.as_ref().map(|err| err.code), Some(-32002));

        e.handle(JsonRpcMessage::Notification(JsonRpcNotification::new(
            "notifications/initialized",
            None,
        )))
        .await;

        let resp = e.handle(request(5, "tools/list", None)).await.unwrap();
        let tools = &resp.result.unwrap()["tools"];
        assert_eq!(tools[0]["name"], "echo");
    }

    #[tokio::test]
    async fn initialize_twice_is_rejected() {
        let mut e = engine();
        initialize(&mut e).await;
        let resp = e
            .handle(request(9, "initialize", Some(init_params())))
            .await
            .unwrap();
        assert_eq!(resp.error.as_ref().map(|err| err.code), Some(-32600));
    }

    #[tokio::test]
    async fn unsupported_version_falls_back_to_latest() {
        let mut e = engine();
        let params = serde_json::json!({
            "protocolVersion": "1999-01-01",
            "capabilities": {},
            "clientInfo": { "name": "t", "version": "0" }
        });
        let resp = e.handle(request(1, "initialize", Some(params))).await.unwrap();
        assert_eq!(
            resp.result.unwrap()["protocolVersion"],
            PROTOCOL_VERSION_LATEST
        );
    }

    #[tokio::test]
    async fn tool_call_round_trip_and_unknown_tool() {
        let mut e = engine();
        initialize(&mut e).await;

        let params = serde_json::json!({ "name": "echo", "arguments": {} });
        let resp = e
            .handle(request(6, "tools/call", Some(params)))
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap()["content"][0]["text"], "echoed");

        let params = serde_json::json!({ "name": "nope", "arguments": {} });
        let resp = e
            .handle(request(7, "tools/call", Some(params)))
            .await
            .unwrap();
        assert_eq!(resp.error.as_ref().map(|err| err.code), Some(-32602));
    }

    #[tokio::test]
    async fn unknown_method_and_closed_engine() {
        let mut e = engine();
        let resp = e.handle(request(1, "prompts/list", None)).await.unwrap();
        assert_eq!(resp.error.as_ref().map(|err| err.code), Some(-32601));

        e.close();
        let resp = e.handle(request(2, "ping", None)).await.unwrap();
        assert_eq!(resp.error.as_ref().map(|err| err.code), Some(-32603));
    }
}
