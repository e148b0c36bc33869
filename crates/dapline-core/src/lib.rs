//! dapline-core: Debug Adapter Protocol relay
//!
//! Multiplexes connections to debugger backends reachable over TCP
//! (CRLF-delimited JSON DAP messages) or through a tool-providing
//! subprocess speaking a call-by-name protocol on stdio. Forwards
//! commands, correlates responses, and fans unsolicited events out to
//! listeners and subscriptions.
//!
//! The composing server owns a [`context::RelayContext`] and drives it
//! through [`invoke::invoke`]; there is no global state.

pub mod codec;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod events;
pub mod invoke;
pub mod mcp;
pub mod protocol;

pub use config::RelayConfig;
pub use connection::{ConnectionRegistry, Endpoint};
pub use context::RelayContext;
pub use error::{RelayError, RelayResult};
pub use events::{EventCallback, EventDispatcher, EventFilter};
pub use invoke::{invoke, FixedResolver, Resolver};
pub use protocol::{DapEvent, DapMessage, DapRequest, DapResponse, EventPayload};
