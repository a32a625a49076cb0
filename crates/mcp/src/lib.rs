//! Remote tool access for Pipedream apps over MCP.
//!
//! - Streamable HTTP transport with the Pipedream routing headers (`sse_transport`)
//! - MCP handshake and tool calls (`client`)
//! - Per-user, per-app session cache bound to the current access token (`cache`)
//! - Discovery and error-isolated execution (`tool_bridge`)
//! - Connected-app catalog (`apps`)

pub mod apps;
pub mod cache;
pub mod client;
pub mod error;
pub mod sse_transport;
pub mod tool_bridge;
pub mod traits;
pub mod types;

pub use {
    apps::{AppCatalog, StaticAppCatalog},
    cache::{ClientHandle, ConnectionCache, ConnectionKey},
    client::{HttpClientFactory, McpClient, McpClientState},
    error::{Error, Result},
    tool_bridge::{BridgeTimeouts, ToolBridge, ToolDescriptor, ToolExecution, full_tool_name},
    traits::{ClientFactory, McpClientTrait, McpTransport, SharedClient},
};
