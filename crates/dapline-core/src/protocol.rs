//! DAP wire message types
//!
//! Messages are JSON objects tagged by a `type` field with three variants:
//! requests, responses, and events. Argument and body payloads stay opaque
//! (`serde_json::Value`) on the wire; the known event vocabulary can be
//! decoded into typed payloads with [`DapEvent::payload`], falling back to
//! [`EventPayload::Opaque`] for backend-specific events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

/// DAP sequence number
pub type Seq = i64;

/// A framed DAP message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DapMessage {
    /// Request message
    Request(DapRequest),
    /// Response message
    Response(DapResponse),
    /// Event message
    Event(DapEvent),
}

/// Outgoing command to a debugger backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DapRequest {
    /// Sequence number
    pub seq: Seq,
    /// Command name
    pub command: String,
    /// Command arguments, backend-specific
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl DapRequest {
    /// Create a new request
    pub fn new(seq: Seq, command: impl Into<String>) -> Self {
        Self {
            seq,
            command: command.into(),
            arguments: None,
        }
    }

    /// Add arguments to the request
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }
}

/// Backend reply correlated to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DapResponse {
    /// Sequence number of the response itself
    pub seq: Seq,
    /// Sequence number of the request being answered
    pub request_seq: Seq,
    /// Whether the request succeeded
    pub success: bool,
    /// Command name echoed back
    pub command: String,
    /// Error message when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Unsolicited event from a debugger backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DapEvent {
    /// Sequence number
    pub seq: Seq,
    /// Event name
    pub event: String,
    /// Event body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl DapEvent {
    /// Decode the body into a typed payload for the known event vocabulary.
    ///
    /// Unknown events, and known events whose body does not match the
    /// expected shape, decode to [`EventPayload::Opaque`] so backend-specific
    /// payloads pass through unharmed.
    pub fn payload(&self) -> EventPayload {
        let body = self.body.clone().unwrap_or(Value::Null);
        match self.event.as_str() {
            events::INITIALIZED => EventPayload::Initialized,
            events::TERMINATED => EventPayload::Terminated,
            events::STOPPED => serde_json::from_value(body)
                .map(EventPayload::Stopped)
                .unwrap_or_else(|_| self.opaque()),
            events::CONTINUED => serde_json::from_value(body)
                .map(EventPayload::Continued)
                .unwrap_or_else(|_| self.opaque()),
            events::EXITED => serde_json::from_value(body)
                .map(EventPayload::Exited)
                .unwrap_or_else(|_| self.opaque()),
            events::OUTPUT => serde_json::from_value(body)
                .map(EventPayload::Output)
                .unwrap_or_else(|_| self.opaque()),
            _ => self.opaque(),
        }
    }

    fn opaque(&self) -> EventPayload {
        EventPayload::Opaque {
            event: self.event.clone(),
            body: self.body.clone(),
        }
    }
}

/// Typed view over the known DAP event vocabulary
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Adapter is ready for configuration
    Initialized,
    /// Execution stopped
    Stopped(StoppedBody),
    /// Execution resumed
    Continued(ContinuedBody),
    /// Debuggee exited with a code
    Exited(ExitedBody),
    /// Debug session ended
    Terminated,
    /// Debuggee or adapter output
    Output(OutputBody),
    /// Any other (or malformed known) event, raw
    Opaque {
        /// Event name
        event: String,
        /// Raw body
        body: Option<Value>,
    },
}

/// Body of a `stopped` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedBody {
    /// Why execution stopped (breakpoint, step, exception, ...)
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_threads_stopped: Option<bool>,
}

/// Body of a `continued` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuedBody {
    pub thread_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_threads_continued: Option<bool>,
}

/// Body of an `exited` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedBody {
    pub exit_code: i64,
}

/// Body of an `output` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub output: String,
}

/// DAP event names
pub mod events {
    /// Adapter initialized
    pub const INITIALIZED: &str = "initialized";
    /// Execution stopped
    pub const STOPPED: &str = "stopped";
    /// Execution continued
    pub const CONTINUED: &str = "continued";
    /// Debuggee exited
    pub const EXITED: &str = "exited";
    /// Session terminated
    pub const TERMINATED: &str = "terminated";
    /// Output produced
    pub const OUTPUT: &str = "output";
}

/// DAP command names used by the relay and its callers
pub mod commands {
    pub const INITIALIZE: &str = "initialize";
    pub const LAUNCH: &str = "launch";
    pub const CONTINUE: &str = "continue";
    pub const STACK_TRACE: &str = "stackTrace";
    pub const THREADS: &str = "threads";
    pub const EVALUATE: &str = "evaluate";
}

/// Strictly increasing request sequence allocator.
///
/// Starts at 1 and never reuses a value for the lifetime of the owning
/// context.
#[derive(Debug)]
pub struct SeqAllocator {
    next: AtomicI64,
}

impl SeqAllocator {
    /// Create a new allocator starting at 1
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Allocate the next sequence number
    pub fn next_seq(&self) -> Seq {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for SeqAllocator {
    fn default() -> Self {
        Self::new()
    }
}
