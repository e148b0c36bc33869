//! Named-operation invocation surface
//!
//! The outer dispatch layer calls [`invoke`] with an operation name and an
//! argument object; every outcome is a structured success payload or a
//! structured error, never an unhandled failure. Endpoint resolution is
//! delegated to an external [`Resolver`] collaborator.

use crate::connection::Endpoint;
use crate::context::RelayContext;
use crate::error::{RelayError, RelayResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Operation names understood by the relay core
pub mod operations {
    /// Send a DAP request and await its response
    pub const SEND_REQUEST: &str = "send_request";
    /// Collect events for a bounded window
    pub const LISTEN_EVENTS: &str = "listen_events";
    /// Close one backend connection
    pub const DISCONNECT: &str = "disconnect";
    /// Close every backend connection and clear subscriptions
    pub const CLOSE_ALL: &str = "close_all";
    /// Return the tool-provider catalog
    pub const LIST_TOOLS: &str = "list_tools";
    /// Forward a call to the tool provider
    pub const CALL_TOOL: &str = "call_tool";
}

/// Decides which live backend an operation targets.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve optional explicit host/port to a concrete endpoint.
    async fn resolve(&self, host: Option<&str>, port: Option<u16>) -> RelayResult<Endpoint>;
}

/// Resolver with a fixed default, overridden by explicit host/port.
pub struct FixedResolver {
    default: Endpoint,
}

impl FixedResolver {
    /// Create a resolver defaulting to the given endpoint
    pub fn new(default: Endpoint) -> Self {
        Self { default }
    }
}

#[async_trait]
impl Resolver for FixedResolver {
    async fn resolve(&self, host: Option<&str>, port: Option<u16>) -> RelayResult<Endpoint> {
        Ok(Endpoint::new(
            host.unwrap_or(&self.default.host),
            port.unwrap_or(self.default.port),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TargetArgs {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct SendRequestArgs {
    #[serde(flatten)]
    target: TargetArgs,
    command: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListenEventsArgs {
    #[serde(flatten)]
    target: TargetArgs,
    event_types: Vec<String>,
    timeout_ms: Option<u64>,
    max_events: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ListToolsArgs {
    #[serde(default)]
    force_refresh: bool,
}

#[derive(Debug, Deserialize)]
struct CallToolArgs {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn parse_args<T: serde::de::DeserializeOwned>(operation: &str, arguments: Value) -> RelayResult<T> {
    serde_json::from_value(arguments).map_err(|e| {
        RelayError::invalid_request(format!("bad arguments for {}: {}", operation, e))
    })
}

/// Execute one named operation against the context.
pub async fn invoke(
    ctx: &RelayContext,
    resolver: &dyn Resolver,
    operation: &str,
    arguments: Value,
) -> RelayResult<Value> {
    match operation {
        operations::SEND_REQUEST => {
            let args: SendRequestArgs = parse_args(operation, arguments)?;
            let endpoint = resolver
                .resolve(args.target.host.as_deref(), args.target.port)
                .await?;
            let response = ctx
                .registry()
                .send_request(&endpoint, &args.command, args.arguments)
                .await?;
            Ok(serde_json::to_value(response)?)
        }
        operations::LISTEN_EVENTS => {
            let args: ListenEventsArgs = parse_args(operation, arguments)?;
            let endpoint = resolver
                .resolve(args.target.host.as_deref(), args.target.port)
                .await?;
            // The connection must exist for events to arrive at all
            ctx.registry().ensure_connection(&endpoint).await?;

            let timeout = args
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(ctx.config().listen_timeout);
            let max_events = args.max_events.unwrap_or(usize::MAX);
            let events = ctx
                .dispatcher()
                .listen_for_events(&args.event_types, timeout, max_events)
                .await;
            Ok(json!({
                "count": events.len(),
                "events": events,
            }))
        }
        operations::DISCONNECT => {
            let args: TargetArgs = parse_args(operation, arguments)?;
            let endpoint = resolver.resolve(args.host.as_deref(), args.port).await?;
            let disconnected = ctx.registry().disconnect(&endpoint).await;
            Ok(json!({ "disconnected": disconnected }))
        }
        operations::CLOSE_ALL => {
            let closed = ctx.registry().close_all().await;
            Ok(json!({ "closed": closed }))
        }
        operations::LIST_TOOLS => {
            let args: ListToolsArgs = parse_args(operation, arguments)?;
            let tools = ctx.tools().list_tools(args.force_refresh).await?;
            Ok(json!({ "tools": tools }))
        }
        operations::CALL_TOOL => {
            let args: CallToolArgs = parse_args(operation, arguments)?;
            let result = ctx.tools().call_tool(&args.name, args.arguments).await?;
            Ok(serde_json::to_value(result)?)
        }
        unknown => Err(RelayError::invalid_request(format!(
            "unknown operation: {}",
            unknown
        ))),
    }
}

/// Render an error as the structured shape the outer boundary emits.
pub fn error_to_value(error: &RelayError) -> Value {
    json!({
        "error": {
            "code": error.error_code(),
            "message": error.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn context() -> RelayContext {
        RelayContext::new(RelayConfig::default())
    }

    fn resolver() -> FixedResolver {
        FixedResolver::new(Endpoint::new("127.0.0.1", 0))
    }

    #[tokio::test]
    async fn test_unknown_operation_is_invalid_request() {
        let ctx = context();
        let err = invoke(&ctx, &resolver(), "explode", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_invalid_request() {
        let ctx = context();
        let err = invoke(
            &ctx,
            &resolver(),
            operations::SEND_REQUEST,
            json!({"command": 42}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_close_all_on_empty_registry() {
        let ctx = context();
        let result = invoke(&ctx, &resolver(), operations::CLOSE_ALL, json!({}))
            .await
            .unwrap();
        assert_eq!(result["closed"], 0);
    }

    #[tokio::test]
    async fn test_resolver_explicit_target_wins() {
        let resolver = FixedResolver::new(Endpoint::new("127.0.0.1", 4711));
        let resolved = resolver.resolve(Some("10.0.0.1"), Some(9000)).await.unwrap();
        assert_eq!(resolved, Endpoint::new("10.0.0.1", 9000));

        let defaulted = resolver.resolve(None, None).await.unwrap();
        assert_eq!(defaulted, Endpoint::new("127.0.0.1", 4711));
    }

    #[test]
    fn test_error_to_value_shape() {
        let value = error_to_value(&RelayError::timeout(30));
        assert_eq!(value["error"]["code"], "RELAY_TIMEOUT");
        assert!(value["error"]["message"]
            .as_str()
            .unwrap()
            .contains("30 seconds"));
    }
}
