//! Streamable HTTP transport for remote MCP endpoints.
//!
//! Requests are JSON-RPC over HTTP POST; responses come back either as plain
//! JSON or as a single-message event stream. A fixed header set (bearer token
//! and Pipedream routing headers) is attached to every request.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    reqwest::{
        Client, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
    },
    secrecy::{ExposeSecret, Secret},
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

use crate::{
    error::{Context, Error, Result},
    traits::McpTransport,
    types::{
        JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpTransportError, PROTOCOL_VERSION,
    },
};

const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";
const STREAMABLE_ACCEPT: &str = "application/json, text/event-stream";
const MAX_ERROR_BODY: usize = 500;

/// Headers every request to a remote endpoint carries.
#[derive(Clone)]
pub struct EndpointAuth {
    pub access_token: Secret<String>,
    pub external_user_id: String,
    pub project_id: Option<String>,
    pub environment: String,
}

impl EndpointAuth {
    fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.access_token.expose_secret()))
            .context("access token is not a valid header value")?;
        headers.insert(AUTHORIZATION, bearer);
        insert(&mut headers, "x-external-user-id", &self.external_user_id)?;
        if let Some(project_id) = &self.project_id {
            insert(&mut headers, "x-pipedream-project-id", project_id)?;
        }
        insert(&mut headers, "x-pipedream-environment", &self.environment)?;
        Ok(headers)
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .with_context(|| format!("invalid value for header {name}"))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

/// HTTP transport bound to one endpoint URL and one access token.
pub struct SseTransport {
    client: Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
    session_id: RwLock<Option<String>>,
}

impl SseTransport {
    pub fn new(url: &str, auth: &EndpointAuth, timeout: Duration) -> Result<Arc<Self>> {
        let client = Client::builder()
            .default_headers(auth.header_map()?)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for MCP transport")?;

        Ok(Arc::new(Self {
            client,
            url: url.to_string(),
            timeout,
            next_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
        }))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, method: &str, body: &impl serde::Serialize) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header("Accept", STREAMABLE_ACCEPT)
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);
        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(MCP_SESSION_ID_HEADER, session_id);
        }

        let resp = req.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::from(McpTransportError::Timeout {
                    method: method.to_string(),
                    secs: self.timeout.as_secs(),
                })
            } else {
                Error::external(format!("POST to '{}' for '{method}' failed", self.url), e)
            }
        })?;

        self.remember_session(&resp).await;

        if resp.status() == StatusCode::UNAUTHORIZED {
            let www_authenticate = resp
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            return Err(McpTransportError::Unauthorized { www_authenticate }.into());
        }
        Ok(resp)
    }

    async fn remember_session(&self, resp: &reqwest::Response) {
        let Some(session_id) = resp
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return;
        };

        let mut slot = self.session_id.write().await;
        if slot.as_deref() != Some(session_id) {
            debug!(url = %self.url, session_id, "MCP session established");
            *slot = Some(session_id.to_string());
        }
    }

    fn is_event_stream(resp: &reqwest::Response) -> bool {
        resp.headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|base| base.trim() == "text/event-stream")
    }

    /// Pull the first JSON-RPC response out of an event-stream body.
    fn parse_event_stream(body: &str, method: &str) -> Result<JsonRpcResponse> {
        let mut data = String::new();
        let mut events: Vec<String> = Vec::new();

        for line in body.lines() {
            let line = line.trim_end();
            if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
            } else if line.is_empty() && !data.is_empty() {
                events.push(std::mem::take(&mut data));
            }
        }
        if !data.is_empty() {
            events.push(data);
        }

        events
            .iter()
            .find_map(|event| serde_json::from_str::<JsonRpcResponse>(event).ok())
            .with_context(|| format!("no JSON-RPC response in event stream for '{method}'"))
    }
}

#[async_trait::async_trait]
impl McpTransport for SseTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(method, id, url = %self.url, "MCP request");

        let resp = self
            .post(method, &JsonRpcRequest::new(id, method, params))
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpTransportError::Http {
                method: method.to_string(),
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            }
            .into());
        }

        let parsed = if Self::is_event_stream(&resp) {
            let body = resp
                .text()
                .await
                .with_context(|| format!("failed to read event stream for '{method}'"))?;
            Self::parse_event_stream(&body, method)?
        } else {
            resp.json::<JsonRpcResponse>()
                .await
                .with_context(|| format!("invalid JSON-RPC response for '{method}'"))?
        };

        if let Some(err) = parsed.error {
            return Err(McpTransportError::Rpc {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            }
            .into());
        }
        Ok(parsed)
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        debug!(method, url = %self.url, "MCP notification");
        let resp = self
            .post(method, &JsonRpcNotification::new(method, params))
            .await?;
        if !resp.status().is_success() {
            warn!(method, status = %resp.status(), "MCP notification not accepted");
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let mut req = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(5))
            .header("Accept", STREAMABLE_ACCEPT)
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);
        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(MCP_SESSION_ID_HEADER, session_id);
        }
        match req.send().await {
            Ok(resp) => resp.status() != StatusCode::UNAUTHORIZED,
            Err(_) => false,
        }
    }

    async fn kill(&self) {
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };

        let result = self
            .client
            .delete(&self.url)
            .timeout(Duration::from_secs(5))
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(MCP_SESSION_ID_HEADER, session_id)
            .send()
            .await;
        if let Err(e) = result {
            warn!(url = %self.url, error = %e, "failed to close MCP session");
        }
    }
}
