//! Environment-driven relay configuration
//!
//! Everything is optional: with no environment set, the relay uses the
//! default timeouts and the well-known tool-provider binary.
//!
//! Recognized variables:
//! - `DAPLINE_TOOL_COMMAND`: explicit tool-provider command override
//! - `DAPLINE_TOOL_ARGS`: whitespace-delimited arguments for the override
//! - `DAPLINE_TOOL_CWD`: working directory for the override
//! - `DAPLINE_REQUEST_TIMEOUT_SECS`: request/response correlation window
//! - `DAPLINE_LISTEN_TIMEOUT_MS`: default bounded event-listen window

use crate::connection::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{RelayError, RelayResult};
use crate::mcp::ToolLaunchConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Default window for bounded event listening
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Tool-provider launch overrides
    pub tool_launch: ToolLaunchConfig,
    /// Request/response correlation window
    pub request_timeout: Duration,
    /// Default bounded event-listen window
    pub listen_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            tool_launch: ToolLaunchConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
        }
    }
}

impl RelayConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> RelayResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> RelayResult<Self> {
        let mut config = Self::default();

        if let Some(command) = lookup("DAPLINE_TOOL_COMMAND") {
            if !command.trim().is_empty() {
                config.tool_launch.command = Some(command);
            }
        }
        if let Some(args) = lookup("DAPLINE_TOOL_ARGS") {
            config.tool_launch.args = args
                .split_whitespace()
                .map(|s| s.to_string())
                .collect();
        }
        if let Some(cwd) = lookup("DAPLINE_TOOL_CWD") {
            if !cwd.trim().is_empty() {
                config.tool_launch.cwd = Some(PathBuf::from(cwd));
            }
        }
        if let Some(secs) = lookup("DAPLINE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                RelayError::config("invalid DAPLINE_REQUEST_TIMEOUT_SECS value")
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = lookup("DAPLINE_LISTEN_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| RelayError::config("invalid DAPLINE_LISTEN_TIMEOUT_MS value"))?;
            config.listen_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}
