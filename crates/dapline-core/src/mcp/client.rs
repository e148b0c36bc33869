//! Call-by-name client over a tool transport

use super::protocol::{
    methods, RpcMessage, RpcNotification, RpcRequest, ToolCallResult, ToolDescriptor,
    PROTOCOL_VERSION,
};
use super::transport::ToolTransport;
use crate::error::{RelayError, RelayResult};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Client speaking the JSON-RPC tool protocol over one transport.
pub struct ToolClient {
    transport: Mutex<Box<dyn ToolTransport>>,
    next_id: AtomicI64,
}

impl ToolClient {
    /// Create a client over the given transport
    pub fn new(transport: Box<dyn ToolTransport>) -> Self {
        Self {
            transport: Mutex::new(transport),
            next_id: AtomicI64::new(1),
        }
    }

    /// Perform the protocol handshake.
    pub async fn initialize(&self) -> RelayResult<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "dapline",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let _: Value = self.call(methods::INITIALIZE, Some(params)).await?;
        self.notify(methods::INITIALIZED, None).await?;
        Ok(())
    }

    /// Query the tool catalog.
    pub async fn list_tools(&self) -> RelayResult<Vec<ToolDescriptor>> {
        let result: Value = self.call(methods::TOOLS_LIST, None).await?;
        let tools = serde_json::from_value(result["tools"].clone())
            .map_err(|e| RelayError::protocol(format!("malformed tool catalog: {}", e)))?;
        Ok(tools)
    }

    /// Call a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> RelayResult<ToolCallResult> {
        let params = json!({
            "name": name,
            "arguments": arguments,
        });
        let result: ToolCallResult = self.call(methods::TOOLS_CALL, Some(params)).await?;
        Ok(result)
    }

    /// Close the underlying transport.
    pub async fn close(&self) -> RelayResult<()> {
        let mut transport = self.transport.lock().await;
        transport.close().await
    }

    /// Make a request and wait for its response.
    async fn call<T>(&self, method: &str, params: Option<Value>) -> RelayResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut request = RpcRequest::new(id, method);
        if let Some(params) = params {
            request = request.with_params(params);
        }

        let mut transport = self.transport.lock().await;
        transport.send(RpcMessage::Request(request)).await?;

        // The transport is locked for the whole exchange, so the next
        // response with our id belongs to us.
        loop {
            match transport.receive().await? {
                RpcMessage::Response(response) => {
                    if response.id.to_string() != id.to_string() {
                        warn!(
                            expected = id,
                            got = %response.id,
                            "dropping response with unexpected id"
                        );
                        continue;
                    }
                    return match response.into_result() {
                        Ok(value) => serde_json::from_value(value).map_err(RelayError::from),
                        Err(e) => Err(RelayError::server(e.code, e.message)),
                    };
                }
                RpcMessage::Notification(notification) => {
                    debug!(method = %notification.method, "tool provider notification");
                }
                RpcMessage::Request(request) => {
                    warn!(method = %request.method, "ignoring request from tool provider");
                }
            }
        }
    }

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> RelayResult<()> {
        let mut notification = RpcNotification::new(method);
        notification.params = params;
        let mut transport = self.transport.lock().await;
        transport.send(RpcMessage::Notification(notification)).await
    }
}
