//! Tool-provider subprocess support
//!
//! One external subprocess offers named tools over a JSON-RPC envelope on
//! its standard input/output. This module owns its full lifecycle: ordered
//! launch-candidate fallback, the stdio transport, the call-by-name client,
//! and the session state machine with terminal shutdown.

pub mod client;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::ToolClient;
pub use protocol::{RpcMessage, RpcRequest, RpcResponse, ToolCallResult, ToolDescriptor};
pub use session::{ToolLaunchConfig, ToolSession};
pub use transport::{LaunchCandidate, StdioTransport, ToolTransport};
