//! Session table for the HTTP binding.
//!
//! A session is created by an `initialize` request and published to the
//! table only after the engine has produced the initialize response, so
//! no other request can observe a half-built session. Close is
//! idempotent: the push channel is torn down first, then the engine.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::mcp::{JsonRpcResponse, ProtocolEngine};

/// Buffered server-to-client messages per session before pushes block.
const PUSH_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closed,
}

pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    state: std::sync::Mutex<SessionState>,
    pub engine: Mutex<ProtocolEngine>,
    push_tx: std::sync::Mutex<Option<mpsc::Sender<JsonRpcResponse>>>,
    push_rx: std::sync::Mutex<Option<mpsc::Receiver<JsonRpcResponse>>>,
}

impl Session {
    pub fn new(engine: ProtocolEngine) -> Self {
        let (tx, rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            state: std::sync::Mutex::new(SessionState::Active),
            engine: Mutex::new(engine),
            push_tx: std::sync::Mutex::new(Some(tx)),
            push_rx: std::sync::Mutex::new(Some(rx)),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Take the push receiver to attach an SSE stream. Only one stream may
    /// be attached at a time; a take while one is attached returns `None`.
    pub fn take_push_receiver(&self) -> Option<mpsc::Receiver<JsonRpcResponse>> {
        self.push_rx.lock().unwrap().take()
    }

    /// Hand the push receiver back after the attached stream is dropped,
    /// so the client can reconnect. Refused once the session is closed.
    pub fn restore_push_receiver(&self, rx: mpsc::Receiver<JsonRpcResponse>) {
        if self.state() == SessionState::Closed {
            return;
        }
        self.push_rx.lock().unwrap().replace(rx);
        debug!(session_id = %self.id, "push stream detached");
    }

    /// Close the session: transport side first, then the engine. Safe to
    /// call more than once.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        // Dropping the sender ends the SSE stream, if one is attached.
        self.push_tx.lock().unwrap().take();
        self.push_rx.lock().unwrap().take();
        self.engine.lock().await.close();
        let age_secs = (Utc::now() - self.created_at).num_seconds();
        debug!(session_id = %self.id, age_secs, "session closed");
    }
}

/// Registry of live HTTP sessions keyed by the `Mcp-Session-Id` value.
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a fully initialized session. Returns the shared handle.
    pub fn publish(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        let mut sessions = self.sessions.write().unwrap();
        sessions.insert(session.id.clone(), Arc::clone(&session));
        info!(session_id = %session.id, total = sessions.len(), "session published");
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(id).cloned()
    }

    /// Remove the session from the table without closing it. The caller
    /// closes the returned handle so teardown happens outside the lock.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.write().unwrap().remove(id)
    }

    /// Take every session out of the table at once, for shutdown.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.write().unwrap();
        sessions.drain().map(|(_, s)| s).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{EngineConfig, ToolDispatchError, ToolHandler};
    use async_trait::async_trait;

    struct NoTools;

    #[async_trait]
    impl ToolHandler for NoTools {
        fn tools(&self) -> Vec<crate::mcp::Tool> {
            Vec::new()
        }

        async fn call(
            &self,
            params: crate::mcp::CallToolParams,
        ) -> Result<crate::mcp::CallToolResult, ToolDispatchError> {
            Err(ToolDispatchError::UnknownTool(params.name))
        }
    }

    fn session() -> Session {
        let config = EngineConfig::new("test", "0.0.0", None);
        Session::new(ProtocolEngine::new(config, Arc::new(NoTools)))
    }

    #[tokio::test]
    async fn publish_then_get_then_remove() {
        let table = SessionTable::new();
        let published = table.publish(session());
        assert_eq!(table.len(), 1);

        let fetched = table.get(&published.id).unwrap();
        assert_eq!(fetched.id, published.id);
        assert_eq!(fetched.state(), SessionState::Active);

        assert!(table.remove(&published.id).is_some());
        assert!(table.get(&published.id).is_none());
        assert!(table.remove(&published.id).is_none());
    }

    #[tokio::test]
    async fn session_ids_are_distinct() {
        let table = SessionTable::new();
        let a = table.publish(session());
        let b = table.publish(session());
        assert_ne!(a.id, b.id);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_closes_the_engine() {
        let s = session();
        s.close().await;
        assert_eq!(s.state(), SessionState::Closed);
        assert!(s.engine.lock().await.is_closed());
        // Second close is a no-op.
        s.close().await;
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn push_receiver_is_exclusive_until_restored() {
        let s = session();
        let rx = s.take_push_receiver().unwrap();
        assert!(s.take_push_receiver().is_none());

        s.restore_push_receiver(rx);
        assert!(s.take_push_receiver().is_some());
    }

    #[tokio::test]
    async fn closed_session_refuses_a_restored_receiver() {
        let s = session();
        let rx = s.take_push_receiver().unwrap();
        s.close().await;
        s.restore_push_receiver(rx);
        assert!(s.take_push_receiver().is_none());
    }

    #[tokio::test]
    async fn drain_empties_the_table() {
        let table = SessionTable::new();
        table.publish(session());
        table.publish(session());
        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
