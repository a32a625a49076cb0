//! MCP client: handshake and tool calls against one app endpoint.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    secrecy::Secret,
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    cache::ConnectionKey,
    error::{Context, Error, Result},
    sse_transport::{EndpointAuth, SseTransport},
    traits::{ClientFactory, McpClientTrait, McpTransport, SharedClient},
    types::{
        ClientCapabilities, ImplementationInfo, InitializeParams, InitializeResult, McpToolDef,
        PROTOCOL_VERSION, ToolsCallParams, ToolsCallResult, ToolsListResult,
    },
};

/// Name announced in `clientInfo`.
const CLIENT_NAME: &str = "pipebridge";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum McpClientState {
    /// Transport open, handshake not finished.
    Connected = 0,
    /// `initialize` answered and `notifications/initialized` sent.
    Ready = 1,
    Closed = 2,
}

impl McpClientState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connected,
            1 => Self::Ready,
            _ => Self::Closed,
        }
    }
}

/// A session with one remote app endpoint.
pub struct McpClient {
    server_name: String,
    transport: Arc<dyn McpTransport>,
    state: AtomicU8,
    server_info: Option<InitializeResult>,
}

impl McpClient {
    /// Open a session over streamable HTTP and run the handshake.
    pub async fn connect(
        server_name: &str,
        url: &str,
        auth: &EndpointAuth,
        timeout: Duration,
    ) -> Result<Self> {
        info!(server = %server_name, url = %url, "connecting to MCP endpoint");
        let transport = SseTransport::new(url, auth, timeout)?;
        Self::handshake(server_name, transport).await
    }

    /// Run the handshake over an existing transport.
    pub async fn handshake(server_name: &str, transport: Arc<dyn McpTransport>) -> Result<Self> {
        let mut client = Self {
            server_name: server_name.into(),
            transport,
            state: AtomicU8::new(McpClientState::Connected as u8),
            server_info: None,
        };

        if let Err(e) = client.initialize().await {
            warn!(server = %server_name, error = %e, "MCP initialize handshake failed");
            client.transport.kill().await;
            return Err(e);
        }
        Ok(client)
    }

    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ImplementationInfo {
                name: CLIENT_NAME.into(),
                version: Some(env!("CARGO_PKG_VERSION").into()),
            },
        };

        let resp = self
            .transport
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult =
            serde_json::from_value(resp.result.context("initialize returned no result")?)?;

        debug!(
            server = %self.server_name,
            protocol = %result.protocol_version,
            remote = %result.server_info.name,
            "MCP endpoint initialized"
        );
        self.server_info = Some(result);

        self.transport
            .notify("notifications/initialized", None)
            .await?;
        self.state
            .store(McpClientState::Ready as u8, Ordering::SeqCst);
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            McpClientState::Ready => Ok(()),
            state => Err(Error::message(format!(
                "MCP client for '{}' is not ready (state: {state:?})",
                self.server_name
            ))),
        }
    }
}

#[async_trait]
impl McpClientTrait for McpClient {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn state(&self) -> McpClientState {
        McpClientState::from_u8(self.state.load(Ordering::SeqCst))
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        self.ensure_ready()?;
        let resp = self.transport.request("tools/list", None).await?;
        let result: ToolsListResult =
            serde_json::from_value(resp.result.context("tools/list returned no result")?)?;
        debug!(server = %self.server_name, count = result.tools.len(), "listed MCP tools");
        Ok(result.tools)
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolsCallResult> {
        self.ensure_ready()?;
        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };
        let resp = self
            .transport
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(serde_json::from_value(
            resp.result.context("tools/call returned no result")?,
        )?)
    }

    async fn is_alive(&self) -> bool {
        self.state() == McpClientState::Ready && self.transport.is_alive().await
    }

    async fn shutdown(&self) {
        let previous = self
            .state
            .swap(McpClientState::Closed as u8, Ordering::SeqCst);
        if McpClientState::from_u8(previous) != McpClientState::Closed {
            self.transport.kill().await;
        }
    }
}

/// Opens sessions at `{mcp_server_url}/{app}` with the Pipedream headers.
pub struct HttpClientFactory {
    base_url: String,
    project_id: Option<String>,
    environment: String,
    request_timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(
        base_url: impl Into<String>,
        project_id: Option<String>,
        environment: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            project_id,
            environment: environment.into(),
            request_timeout,
        }
    }

    /// Endpoint URL for one app slug.
    pub fn endpoint(&self, app: &str) -> Result<String> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|()| Error::message(format!("'{}' cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .push(app);
        Ok(url.to_string())
    }
}

#[async_trait]
impl ClientFactory for HttpClientFactory {
    async fn connect(
        &self,
        key: &ConnectionKey,
        access_token: &Secret<String>,
    ) -> Result<SharedClient> {
        let auth = EndpointAuth {
            access_token: access_token.clone(),
            external_user_id: key.user_id.clone(),
            project_id: self.project_id.clone(),
            environment: self.environment.clone(),
        };
        let url = self.endpoint(&key.app)?;
        let client = McpClient::connect(&key.app, &url, &auth, self.request_timeout).await?;
        Ok(Arc::new(client))
    }
}
