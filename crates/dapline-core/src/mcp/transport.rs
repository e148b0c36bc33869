//! Stdio transport to the tool-provider subprocess
//!
//! Spawns the child, exchanges newline-delimited JSON-RPC over its
//! stdin/stdout, and drains its stderr into the log. Stderr is diagnostic
//! output only; it is never parsed as protocol data.

use super::protocol::RpcMessage;
use crate::error::{RelayError, RelayResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One concrete way of starting the tool provider, tried in fallback order.
#[derive(Debug, Clone)]
pub struct LaunchCandidate {
    /// Human-readable origin for logs ("env override", "installed binary", ...)
    pub label: String,
    /// Executable or command name
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
    /// Optional working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

impl LaunchCandidate {
    /// Create a candidate with no cwd or env overrides
    pub fn new(label: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            args,
            cwd: None,
            env: HashMap::new(),
        }
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }
}

impl std::fmt::Display for LaunchCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} {})", self.label, self.command, self.args.join(" "))
    }
}

/// Transport trait for tool-provider communication
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Send a message
    async fn send(&mut self, message: RpcMessage) -> RelayResult<()>;

    /// Receive the next message
    async fn receive(&mut self) -> RelayResult<RpcMessage>;

    /// Close the transport
    async fn close(&mut self) -> RelayResult<()>;

    /// Whether the transport is still connected
    fn is_connected(&self) -> bool;
}

/// Stdio transport over a spawned subprocess
#[derive(Debug)]
pub struct StdioTransport {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<()>>,
    line_buffer: String,
    connected: bool,
}

impl StdioTransport {
    /// Spawn the candidate's subprocess and wire up its streams.
    pub async fn spawn(candidate: &LaunchCandidate) -> RelayResult<Self> {
        let mut cmd = Command::new(&candidate.command);
        cmd.args(&candidate.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &candidate.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &candidate.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            RelayError::connection(format!(
                "failed to spawn tool provider '{}': {}",
                candidate.command, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RelayError::connection("failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::connection("failed to get stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RelayError::connection("failed to get stderr handle"))?;

        // Forward diagnostics to the log, never to the protocol layer
        let label = candidate.label.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "dapline::tool", candidate = %label, "{}", line);
            }
        });

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            stdout: Some(BufReader::new(stdout)),
            stderr_task: Some(stderr_task),
            line_buffer: String::new(),
            connected: true,
        })
    }
}

#[async_trait]
impl ToolTransport for StdioTransport {
    async fn send(&mut self, message: RpcMessage) -> RelayResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RelayError::connection("tool transport not open"))?;

        let json = serde_json::to_string(&message)?;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> RelayResult<RpcMessage> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| RelayError::connection("tool transport not open"))?;

        self.line_buffer.clear();
        let bytes_read = stdout.read_line(&mut self.line_buffer).await?;
        if bytes_read == 0 {
            self.connected = false;
            return Err(RelayError::connection("tool provider closed its stdout"));
        }

        serde_json::from_str(self.line_buffer.trim()).map_err(|e| {
            RelayError::protocol(format!("unparsable message from tool provider: {}", e))
        })
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.connected = false;

        // Closing stdin signals EOF so the child can exit on its own
        self.stdin.take();

        if let Some(mut child) = self.child.take() {
            tokio::select! {
                result = child.wait() => {
                    if let Err(e) = result {
                        warn!("error waiting for tool provider exit: {}", e);
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    warn!("tool provider did not exit; killing");
                    child.kill().await.ok();
                }
            }
        }
        // The stderr task ends on its own once the pipe closes
        self.stderr_task.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // Best effort cleanup
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}
