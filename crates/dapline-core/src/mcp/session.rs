//! Tool-provider session lifecycle
//!
//! [`ToolSession`] owns at most one live tool-provider subprocess. It is
//! created lazily: the first call that needs the provider walks an ordered
//! list of launch candidates until one spawns and completes the handshake.
//! Concurrent callers share a single in-flight connect attempt. Once
//! [`ToolSession::shutdown`] runs, the session is terminal and every later
//! call fails with [`RelayError::Shutdown`].

use super::client::ToolClient;
use super::protocol::{ToolCallResult, ToolDescriptor};
use super::transport::{LaunchCandidate, StdioTransport};
use crate::error::{RelayError, RelayResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Well-known name of the published tool-provider binary
pub const TOOL_BINARY: &str = "dapline-tools";

/// Relative directory for the run-from-source fallback
pub const TOOL_SOURCE_DIR: &str = "tools/dapline-tools";

/// Window for the subprocess protocol handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment-driven launch overrides (see [`crate::config::RelayConfig`])
#[derive(Debug, Clone, Default)]
pub struct ToolLaunchConfig {
    /// Explicit command overriding candidate resolution
    pub command: Option<String>,
    /// Arguments for the override command
    pub args: Vec<String>,
    /// Working directory for the override command
    pub cwd: Option<PathBuf>,
}

type ConnectFuture = Shared<BoxFuture<'static, RelayResult<()>>>;

struct SessionInner {
    launch: ToolLaunchConfig,
    /// Fixed candidate list, bypassing resolution (tests, embedding)
    candidates: Option<Vec<LaunchCandidate>>,
    client: RwLock<Option<Arc<ToolClient>>>,
    tools: RwLock<Vec<ToolDescriptor>>,
    shutdown: AtomicBool,
    connecting: Mutex<Option<ConnectFuture>>,
    spawn_attempts: AtomicUsize,
}

/// Manages the lifecycle of the one tool-provider subprocess.
pub struct ToolSession {
    inner: Arc<SessionInner>,
}

impl ToolSession {
    /// Create a session resolving candidates from the launch config
    pub fn new(launch: ToolLaunchConfig) -> Self {
        Self::build(launch, None)
    }

    /// Create a session with an explicit, fixed candidate list
    pub fn with_candidates(candidates: Vec<LaunchCandidate>) -> Self {
        Self::build(ToolLaunchConfig::default(), Some(candidates))
    }

    fn build(launch: ToolLaunchConfig, candidates: Option<Vec<LaunchCandidate>>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                launch,
                candidates,
                client: RwLock::new(None),
                tools: RwLock::new(Vec::new()),
                shutdown: AtomicBool::new(false),
                connecting: Mutex::new(None),
                spawn_attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// Ensure a live, handshaken provider, connecting if necessary.
    ///
    /// Concurrent callers issued before the first attempt settles all await
    /// the same underlying attempt; the shared handle is cleared once it
    /// settles, on either success or failure.
    pub async fn ensure_ready(&self) -> RelayResult<()> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(RelayError::Shutdown);
        }
        if self.inner.client.read().await.is_some() {
            return Ok(());
        }

        let attempt = {
            let mut connecting = self.inner.connecting.lock();
            match connecting.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let fut: ConnectFuture = connect(inner).boxed().shared();
                    *connecting = Some(fut.clone());
                    fut
                }
            }
        };
        attempt.await
    }

    /// Return the tool catalog, querying the provider only when the cache
    /// is empty or a refresh is forced.
    pub async fn list_tools(&self, force_refresh: bool) -> RelayResult<Vec<ToolDescriptor>> {
        self.ensure_ready().await?;

        if !force_refresh {
            let cached = self.inner.tools.read().await;
            if !cached.is_empty() {
                return Ok(cached.clone());
            }
        }

        let client = self.current_client().await?;
        match client.list_tools().await {
            Ok(tools) => {
                *self.inner.tools.write().await = tools.clone();
                Ok(tools)
            }
            Err(e) => {
                self.handle_transport_failure(&e).await;
                Err(e)
            }
        }
    }

    /// Call a tool by name, ensuring readiness first.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> RelayResult<ToolCallResult> {
        self.ensure_ready().await?;

        let client = self.current_client().await?;
        match client.call_tool(name, arguments).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(tool = %name, error = %e, "tool call failed");
                self.handle_transport_failure(&e).await;
                Err(e)
            }
        }
    }

    /// Terminal shutdown: flag first so concurrent `ensure_ready` calls
    /// begin failing immediately, then best-effort close, then clear state.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);

        let client = self.inner.client.write().await.take();
        if let Some(client) = client {
            if let Err(e) = client.close().await {
                warn!(error = %e, "error closing tool provider during shutdown");
            }
        }
        self.inner.tools.write().await.clear();
        info!("tool session shut down");
    }

    /// Whether the session has reached the terminal state
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    async fn current_client(&self) -> RelayResult<Arc<ToolClient>> {
        self.inner
            .client
            .read()
            .await
            .clone()
            .ok_or_else(|| RelayError::connection("tool provider not connected"))
    }

    /// On an unexpected transport loss, clear cached state so the next call
    /// reconnects transparently. Skipped after shutdown.
    async fn handle_transport_failure(&self, error: &RelayError) {
        if !matches!(error, RelayError::Connection { .. }) {
            return;
        }
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        warn!("tool transport lost; clearing state for transparent reconnect");
        self.inner.client.write().await.take();
        self.inner.tools.write().await.clear();
    }
}

/// Resolve the ordered candidate list for this session.
fn launch_candidates(inner: &SessionInner) -> Vec<LaunchCandidate> {
    if let Some(fixed) = &inner.candidates {
        return fixed.clone();
    }

    let mut candidates = Vec::new();
    if let Some(command) = &inner.launch.command {
        let mut candidate =
            LaunchCandidate::new("env override", command.clone(), inner.launch.args.clone());
        if let Some(cwd) = &inner.launch.cwd {
            candidate = candidate.with_cwd(cwd.clone());
        }
        candidates.push(candidate);
    }
    candidates.push(LaunchCandidate::new("installed binary", TOOL_BINARY, vec![]));
    if Path::new(TOOL_SOURCE_DIR).is_dir() {
        candidates.push(LaunchCandidate::new(
            "run from source",
            "cargo",
            vec![
                "run".to_string(),
                "--quiet".to_string(),
                "--manifest-path".to_string(),
                format!("{}/Cargo.toml", TOOL_SOURCE_DIR),
            ],
        ));
    }
    candidates
}

/// Walk the candidates in order, adopting the first that spawns and
/// completes the handshake. Runs as the one shared connect attempt.
async fn connect(inner: Arc<SessionInner>) -> RelayResult<()> {
    let result = connect_candidates(&inner).await;
    // Clear the shared handle now that the attempt has settled
    inner.connecting.lock().take();
    result
}

async fn connect_candidates(inner: &Arc<SessionInner>) -> RelayResult<()> {
    if inner.shutdown.load(Ordering::SeqCst) {
        return Err(RelayError::Shutdown);
    }

    let candidates = launch_candidates(inner);
    let mut attempts = 0;
    let mut last_error = RelayError::connection("no launch candidates available");

    for candidate in &candidates {
        attempts += 1;
        inner.spawn_attempts.fetch_add(1, Ordering::SeqCst);
        info!(candidate = %candidate, "attempting tool provider launch");

        let transport = match StdioTransport::spawn(candidate).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(candidate = %candidate, error = %e, "launch candidate failed to spawn");
                last_error = e;
                continue;
            }
        };

        let client = ToolClient::new(Box::new(transport));
        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, client.initialize()).await;
        let handshake = match handshake {
            Ok(result) => result,
            Err(_) => Err(RelayError::timeout(HANDSHAKE_TIMEOUT.as_secs())),
        };

        match handshake {
            Ok(()) => {
                if inner.shutdown.load(Ordering::SeqCst) {
                    // Shutdown raced the connect; do not adopt
                    client.close().await.ok();
                    return Err(RelayError::Shutdown);
                }
                info!(candidate = %candidate, "tool provider ready");
                *inner.client.write().await = Some(Arc::new(client));
                return Ok(());
            }
            Err(e) => {
                warn!(candidate = %candidate, error = %e, "handshake failed");
                // Close errors on a failed candidate are swallowed
                if let Err(close_err) = client.close().await {
                    debug!(error = %close_err, "error closing failed candidate");
                }
                last_error = e;
            }
        }
    }

    Err(RelayError::subprocess_launch(attempts, last_error.to_string()))
}
