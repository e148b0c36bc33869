//! Relay context: the single owner of all shared relay state
//!
//! There are no process-wide singletons. The composing server constructs
//! one [`RelayContext`] and passes it into every operation; independent
//! contexts (e.g. under test) share no connections, subscriptions,
//! sequence numbers, or tool sessions.

use crate::config::RelayConfig;
use crate::connection::ConnectionRegistry;
use crate::events::EventDispatcher;
use crate::mcp::ToolSession;
use std::sync::Arc;
use tracing::info;

/// Owns the connection registry, event dispatcher, and tool session.
pub struct RelayContext {
    config: RelayConfig,
    dispatcher: Arc<EventDispatcher>,
    registry: ConnectionRegistry,
    tools: ToolSession,
}

impl RelayContext {
    /// Build a context from the given configuration
    pub fn new(config: RelayConfig) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new());
        let registry = ConnectionRegistry::with_request_timeout(
            Arc::clone(&dispatcher),
            config.request_timeout,
        );
        let tools = ToolSession::new(config.tool_launch.clone());
        Self {
            config,
            dispatcher,
            registry,
            tools,
        }
    }

    /// Build a context from process environment configuration
    pub fn from_env() -> crate::error::RelayResult<Self> {
        Ok(Self::new(RelayConfig::from_env()?))
    }

    /// The active configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The event dispatcher
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// The connection registry
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The tool-provider session
    pub fn tools(&self) -> &ToolSession {
        &self.tools
    }

    /// Process shutdown contract: shut the tool session down, then close
    /// every registered connection.
    pub async fn shutdown(&self) {
        info!("relay shutting down");
        self.tools.shutdown().await;
        let closed = self.registry.close_all().await;
        info!(connections_closed = closed, "relay shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DapEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_contexts_are_independent() {
        let a = RelayContext::new(RelayConfig::default());
        let b = RelayContext::new(RelayConfig::default());

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        a.dispatcher().subscribe_to_event(
            "stopped",
            None,
            Arc::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // Dispatching in b must not reach a's subscription
        b.dispatcher().dispatch(&DapEvent {
            seq: 1,
            event: "stopped".to_string(),
            body: None,
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        a.dispatcher().dispatch(&DapEvent {
            seq: 1,
            event: "stopped".to_string(),
            body: None,
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal_for_tools() {
        let ctx = RelayContext::new(RelayConfig::default());
        ctx.shutdown().await;

        assert!(ctx.tools().is_shut_down());
        let err = ctx.tools().ensure_ready().await.unwrap_err();
        assert!(matches!(err, crate::error::RelayError::Shutdown));
        assert_eq!(ctx.registry().connection_count(), 0);
    }
}
