//! Relay error types

use thiserror::Error;

/// Result alias used throughout the relay.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors produced by the relay core.
///
/// All variants are `Clone` so a single failure can be fanned out to every
/// caller sharing an in-flight operation (e.g. a shared connect attempt).
#[derive(Debug, Error, Clone)]
pub enum RelayError {
    /// Socket connect/read/write failure
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No response arrived within the correlation window
    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Malformed or unparsable framed message
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Operation attempted after terminal shutdown
    #[error("Session has been shut down")]
    Shutdown,

    /// Every subprocess launch candidate failed
    #[error("All {attempts} tool launch candidates failed; last error: {last}")]
    SubprocessLaunch { attempts: usize, last: String },

    /// Error reported by the tool provider itself
    #[error("Tool provider error {code}: {message}")]
    Server { code: i32, message: String },

    /// Requested tool is not in the provider's catalog
    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    /// Bad operation name or malformed invocation arguments
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// JSON encode/decode failure outside the framer
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl RelayError {
    /// Create a new Connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new Timeout error
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    /// Create a new Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new SubprocessLaunch error
    pub fn subprocess_launch(attempts: usize, last: impl Into<String>) -> Self {
        Self::SubprocessLaunch {
            attempts,
            last: last.into(),
        }
    }

    /// Create a new Server error
    pub fn server(code: i32, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// Create a new ToolNotFound error
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    /// Create a new InvalidRequest error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the outer dispatch boundary
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "RELAY_CONNECTION",
            Self::Timeout { .. } => "RELAY_TIMEOUT",
            Self::Protocol { .. } => "RELAY_PROTOCOL",
            Self::Shutdown => "RELAY_SHUTDOWN",
            Self::SubprocessLaunch { .. } => "RELAY_SUBPROCESS_LAUNCH",
            Self::Server { .. } => "RELAY_SERVER",
            Self::ToolNotFound { .. } => "RELAY_TOOL_NOT_FOUND",
            Self::InvalidRequest { .. } => "RELAY_INVALID_REQUEST",
            Self::Serialization { .. } => "RELAY_SERIALIZATION",
            Self::Config { .. } => "RELAY_CONFIG",
        }
    }

    /// Whether the failure may clear up on a fresh connection attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::SubprocessLaunch { .. }
        )
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::connection(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
