//! MCP protocol layer: JSON-RPC framing, wire types, and the per-session
//! protocol engine.

mod engine;
mod jsonrpc;
mod types;

pub use engine::{
    EngineConfig, ProtocolEngine, ToolDispatchError, ToolHandler, PROTOCOL_VERSION_LATEST,
    SUPPORTED_PROTOCOL_VERSIONS,
};
pub use jsonrpc::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
pub use types::{
    CallToolParams, CallToolResult, ContentBlock, Implementation, InitializeParams,
    InitializeResult, ListToolsResult, Tool,
};
