//! Stdio binding: one session bound to the process lifetime.
//!
//! Frames are newline-delimited JSON on stdin/stdout. Logging goes to
//! stderr so the protocol stream stays clean. I/O failures end the loop
//! but never skip the engine close.

use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ServerContext;
use crate::mcp::{JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcResponse, ProtocolEngine};

/// Decode one input line. `Err` carries the error envelope to write back.
fn decode_frame(line: &str) -> Result<JsonRpcMessage, JsonRpcResponse> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|_| {
        JsonRpcResponse::err(
            JsonRpcId::Null,
            JsonRpcError {
                code: -32700,
                message: "parse error".to_string(),
                data: None,
            },
        )
    })?;

    if value.is_array() {
        // Batch frames are not supported on this transport.
        return Err(JsonRpcResponse::err(
            JsonRpcId::Null,
            JsonRpcError {
                code: -32600,
                message: "batch requests are not supported".to_string(),
                data: None,
            },
        ));
    }

    serde_json::from_value(value).map_err(|_| {
        JsonRpcResponse::err(
            JsonRpcId::Null,
            JsonRpcError {
                code: -32600,
                message: "invalid request".to_string(),
                data: None,
            },
        )
    })
}

async fn write_frame<W>(writer: &mut W, reply: &JsonRpcResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = serde_json::to_vec(reply)?;
    out.push(b'\n');
    writer.write_all(&out).await?;
    writer.flush().await
}

/// Drive one engine over a framed reader/writer pair until EOF, an I/O
/// failure, or cancellation. The engine is closed on every exit path.
async fn session_loop<R, W>(
    engine: &mut ProtocolEngine,
    reader: R,
    mut writer: W,
    cancel: CancellationToken,
) where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("stdio loop cancelled");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("stdin closed, ending session");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed, ending session");
                    break;
                }
            },
        };

        if line.trim().is_empty() {
            continue;
        }

        let reply = match decode_frame(&line) {
            Ok(msg) => engine.handle(msg).await,
            Err(envelope) => {
                warn!("rejecting malformed frame");
                Some(envelope)
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = write_frame(&mut writer, &reply).await {
                warn!(error = %e, "stdout write failed, ending session");
                break;
            }
        }
    }

    engine.close();
}

/// Run the stdio session until EOF, I/O failure, or cancellation.
pub async fn run(ctx: Arc<ServerContext>, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut engine = ctx.new_engine();
    info!("serving MCP on stdio");
    session_loop(
        &mut engine,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        cancel,
    )
    .await;
    Ok(())
}
