//! Standard I/O transport.
//!
//! One JSON object per line on stdin, responses and notifications as one
//! JSON object per line on stdout. Diagnostics never touch stdout; the
//! binary routes tracing to stderr. Exactly one session per process;
//! starting a second stdio transport fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::McpServer;

static STDIO_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Serves a [`McpServer`] over stdin/stdout.
#[derive(Debug)]
pub struct StdioTransport {
    server: Arc<McpServer>,
}

impl StdioTransport {
    /// Wrap a server.
    pub fn new(server: Arc<McpServer>) -> Self {
        Self { server }
    }

    /// Run until stdin closes or a shutdown signal arrives.
    ///
    /// Responses and notifications both flow through the session's outbound
    /// queue, so ordering is the enqueue order.
    pub async fn run(self) -> Result<()> {
        if STDIO_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(Error::Transport(
                "stdio transport supports exactly one session".into(),
            ));
        }
        let result = self.run_inner().await;
        STDIO_ACTIVE.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self) -> Result<()> {
        self.server.start();
        let session_id = Uuid::new_v4().to_string();
        let (session, rx) = self.server.create_session(&session_id);

        let writer = tokio::spawn(async move {
            let stdout = tokio::io::stdout();
            if let Err(err) = write_loop(rx, stdout).await {
                tracing::error!(target: "mcp.transport.stdio", error = %err, "writer failed");
            }
        });

        tracing::info!(target: "mcp.transport.stdio", session = %session_id, "stdio server running");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            if let Some(response) =
                                self.server.handle_line(line, Some(&session)).await
                            {
                                let value = serde_json::to_value(&response)
                                    .unwrap_or_else(|_| Value::Null);
                                if !session.send(value).await {
                                    break;
                                }
                            }
                        },
                        Ok(None) => {
                            tracing::info!(target: "mcp.transport.stdio", "stdin closed");
                            break;
                        },
                        Err(err) => {
                            tracing::error!(
                                target: "mcp.transport.stdio",
                                error = %err,
                                "failed to read stdin"
                            );
                            break;
                        },
                    }
                },
                _ = shutdown_signal() => {
                    tracing::info!(target: "mcp.transport.stdio", "shutdown signal received");
                    break;
                },
            }
        }

        session.close().await;
        if tokio::time::timeout(Duration::from_secs(2), writer)
            .await
            .is_err()
        {
            tracing::warn!(target: "mcp.transport.stdio", "writer did not drain in time");
        }
        self.server.remove_session(&session_id);
        self.server.stop().await;
        Ok(())
    }
}

/// Drain the outbound queue to the writer, one JSON object per line, until
/// the close sentinel.
async fn write_loop<W: AsyncWrite + Unpin>(
    mut rx: mpsc::Receiver<Option<Value>>,
    mut writer: W,
) -> Result<()> {
    while let Some(item) = rx.recv().await {
        let Some(message) = item else {
            break;
        };
        let line = serde_json::to_string(&message)
            .map_err(|e| Error::Transport(format!("failed to serialize message: {e}")))?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(_) => {
            // No SIGTERM handler; fall back to SIGINT only.
            let _ = tokio::signal::ctrl_c().await;
            return;
        },
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    // Windows: cooperative shutdown via Ctrl+C only.
    let _ = tokio::signal::ctrl_c().await;
}
