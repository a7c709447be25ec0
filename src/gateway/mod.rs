//! Transport bindings over the protocol engine.
//!
//! Two bindings exist: stdio (one session for the process lifetime) and
//! HTTP (many concurrent sessions keyed by `Mcp-Session-Id`). Both drive
//! the same per-session [`ProtocolEngine`]; the bindings own framing,
//! session identity, and auth, nothing protocol-level.

pub mod auth;
pub mod http;
pub mod session;
pub mod stdio;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::mcp::{EngineConfig, ProtocolEngine, ToolHandler};
use session::SessionTable;

/// Shared state behind the HTTP router and the stdio loop.
pub struct ServerContext {
    pub sessions: SessionTable,
    pub tools: Arc<dyn ToolHandler>,
    pub engine_config: EngineConfig,
    pub api_token: Option<String>,
    /// Set by the shutdown coordinator; new sessions are refused once true.
    pub shutting_down: AtomicBool,
}

impl ServerContext {
    pub fn new(tools: Arc<dyn ToolHandler>, api_token: Option<String>) -> Self {
        Self {
            sessions: SessionTable::new(),
            tools,
            engine_config: EngineConfig::new(
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                Some(
                    "Exposes the WordPress REST API as tools. Call tools/list \
                     for the available operations."
                        .to_string(),
                ),
            ),
            api_token,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Build a fresh engine for a new session.
    pub fn new_engine(&self) -> ProtocolEngine {
        ProtocolEngine::new(self.engine_config.clone(), Arc::clone(&self.tools))
    }
}
