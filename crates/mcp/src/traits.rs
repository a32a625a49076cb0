//! Seams between the connection cache, the MCP client and its transport.

use std::sync::Arc;

use {async_trait::async_trait, secrecy::Secret, serde_json::Value};

use crate::{
    cache::ConnectionKey,
    client::McpClientState,
    error::Result,
    types::{JsonRpcResponse, McpToolDef, ToolsCallResult},
};

/// JSON-RPC transport to one remote MCP endpoint.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its response. JSON-RPC errors are returned
    /// as `McpTransportError::Rpc`.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    async fn is_alive(&self) -> bool;

    /// End the remote session.
    async fn kill(&self);
}

/// An initialized MCP session for one (user, app) pair.
#[async_trait]
pub trait McpClientTrait: Send + Sync {
    /// App slug this client talks to.
    fn server_name(&self) -> &str;

    fn state(&self) -> McpClientState;

    async fn list_tools(&self) -> Result<Vec<McpToolDef>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult>;

    async fn is_alive(&self) -> bool;

    async fn shutdown(&self);
}

pub type SharedClient = Arc<dyn McpClientTrait>;

/// Opens authenticated MCP sessions. The cache calls this at most once per
/// key at a time.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, key: &ConnectionKey, access_token: &Secret<String>)
    -> Result<SharedClient>;
}
