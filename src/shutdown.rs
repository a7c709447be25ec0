//! Coordinated process shutdown.
//!
//! One coordinator owns the cancellation token and the fault channel.
//! The first trigger (signal, reported fault, or the server loop ending
//! on its own) starts cleanup: refuse new sessions, close every live
//! session, stop the listener. Cleanup is bounded; a second signal
//! during cleanup exits immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::gateway::session::SessionTable;
use crate::gateway::ServerContext;

/// Upper bound on session teardown and listener drain.
pub const CLEANUP_TIMEOUT_SECS: u64 = 10;

/// Upper bound on closing one session. A session whose engine is held by
/// an in-flight tool call can exceed this; it is abandoned, not waited on.
const SESSION_CLOSE_TIMEOUT_SECS: u64 = 5;

const FAULT_CHANNEL_CAPACITY: usize = 4;

/// Handed to server tasks so they can report a fatal fault. Reporting is
/// fire-and-forget; only the first report matters.
#[derive(Clone)]
pub struct FaultHandle {
    tx: mpsc::Sender<String>,
}

impl FaultHandle {
    pub fn report(&self, reason: impl Into<String>) {
        let _ = self.tx.try_send(reason.into());
    }
}

enum Trigger {
    Signal,
    Fault(String),
    ServerExit(bool),
}

pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    triggered: Arc<AtomicBool>,
    fault_tx: mpsc::Sender<String>,
    fault_rx: mpsc::Receiver<String>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (fault_tx, fault_rx) = mpsc::channel(FAULT_CHANNEL_CAPACITY);
        Self {
            cancel: CancellationToken::new(),
            triggered: Arc::new(AtomicBool::new(false)),
            fault_tx,
            fault_rx,
        }
    }

    /// Token cancelled when shutdown begins. Server loops select on this.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn fault_handle(&self) -> FaultHandle {
        FaultHandle {
            tx: self.fault_tx.clone(),
        }
    }

    /// Wait for the first trigger, run bounded cleanup, and return the
    /// process exit code: 0 for graceful shutdown, 1 for a fault or a
    /// cleanup that did not finish in time.
    pub async fn run(mut self, ctx: Arc<ServerContext>, mut server: JoinHandle<anyhow::Result<()>>) -> i32 {
        let trigger = tokio::select! {
            _ = wait_for_signal() => Trigger::Signal,
            reason = self.fault_rx.recv() => {
                Trigger::Fault(reason.unwrap_or_else(|| "fault channel closed".to_string()))
            }
            result = &mut server => {
                let clean = match result {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        error!(error = %e, "server loop failed");
                        false
                    }
                    Err(e) => {
                        error!(error = %e, "server task panicked");
                        false
                    }
                };
                Trigger::ServerExit(clean)
            }
        };

        if self.triggered.swap(true, Ordering::SeqCst) {
            // Already shutting down; nothing more to coordinate.
            return 1;
        }
        ctx.shutting_down.store(true, Ordering::SeqCst);

        let (mut code, server_done) = match trigger {
            Trigger::Signal => {
                info!("shutdown signal received, closing sessions");
                (0, false)
            }
            Trigger::Fault(reason) => {
                error!(%reason, "fault reported, shutting down");
                (1, false)
            }
            Trigger::ServerExit(clean) => {
                info!("server loop ended, cleaning up");
                (if clean { 0 } else { 1 }, true)
            }
        };

        // A second signal during cleanup aborts the process outright,
        // keeping the exit code already chosen for the first trigger.
        let chosen = code;
        tokio::spawn(async move {
            wait_for_signal().await;
            error!("second shutdown signal, exiting immediately");
            std::process::exit(chosen);
        });

        self.cancel.cancel();
        let cleanup = async {
            close_all(&ctx.sessions).await;
            if !server_done {
                if let Err(e) = server.await {
                    warn!(error = %e, "server task did not stop cleanly");
                }
            }
        };
        if timeout(Duration::from_secs(CLEANUP_TIMEOUT_SECS), cleanup)
            .await
            .is_err()
        {
            error!(
                timeout_secs = CLEANUP_TIMEOUT_SECS,
                "cleanup did not finish in time"
            );
            code = 1;
        }

        info!(exit_code = code, "shutdown complete");
        code
    }
}

/// Close every session in the table. Sessions are closed concurrently and
/// each close is bounded, one slow or broken session never blocks the
/// others from closing.
pub async fn close_all(sessions: &SessionTable) {
    let drained = sessions.drain();
    if drained.is_empty() {
        return;
    }
    info!(count = drained.len(), "closing sessions");
    let closes = drained.into_iter().map(|session| async move {
        match timeout(Duration::from_secs(SESSION_CLOSE_TIMEOUT_SECS), session.close()).await {
            Ok(()) => debug!(session_id = %session.id, "closed"),
            Err(_) => warn!(session_id = %session.id, "session close timed out, abandoning it"),
        }
    });
    futures::future::join_all(closes).await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return std::future::pending().await;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            return std::future::pending().await;
        }
    };
    let mut sigquit = match signal(SignalKind::quit()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGQUIT handler");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => debug!("received SIGTERM"),
        _ = sigint.recv() => debug!("received SIGINT"),
        _ = sigquit.recv() => debug!("received SIGQUIT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::session::{Session, SessionState};
    use crate::mcp::{CallToolParams, CallToolResult, EngineConfig, ProtocolEngine, Tool, ToolDispatchError, ToolHandler};
    use async_trait::async_trait;

    struct NoTools;

    #[async_trait]
    impl ToolHandler for NoTools {
        fn tools(&self) -> Vec<Tool> {
            Vec::new()
        }

        async fn call(&self, params: CallToolParams) -> Result<CallToolResult, ToolDispatchError> {
            Err(ToolDispatchError::UnknownTool(params.name))
        }
    }

    #[tokio::test]
    async fn close_all_closes_every_session_and_empties_the_table() {
        let table = SessionTable::new();
        let config = EngineConfig::new("test", "0.0.0", None);
        let a = table.publish(Session::new(ProtocolEngine::new(
            config.clone(),
            Arc::new(NoTools),
        )));
        let b = table.publish(Session::new(ProtocolEngine::new(config, Arc::new(NoTools))));

        close_all(&table).await;

        assert!(table.is_empty());
        assert_eq!(a.state(), SessionState::Closed);
        assert_eq!(b.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_session_does_not_block_closing_the_rest() {
        let table = SessionTable::new();
        let config = EngineConfig::new("test", "0.0.0", None);
        let busy = table.publish(Session::new(ProtocolEngine::new(
            config.clone(),
            Arc::new(NoTools),
        )));
        let idle_a = table.publish(Session::new(ProtocolEngine::new(
            config.clone(),
            Arc::new(NoTools),
        )));
        let idle_b = table.publish(Session::new(ProtocolEngine::new(config, Arc::new(NoTools))));

        // Hold the busy engine's lock, as an in-flight tool call would.
        let guard = busy.engine.lock().await;

        close_all(&table).await;

        assert!(table.is_empty());
        assert_eq!(idle_a.state(), SessionState::Closed);
        assert_eq!(idle_b.state(), SessionState::Closed);
        assert!(idle_a.engine.lock().await.is_closed());
        drop(guard);
    }

    #[tokio::test]
    async fn fault_handle_is_fire_and_forget() {
        let coordinator = ShutdownCoordinator::new();
        let handle = coordinator.fault_handle();
        for _ in 0..16 {
            handle.report("boom");
        }
        // Channel overflow above must not panic or block.
    }
}
