//! The Pipedream boundary service the HTTP routes delegate to.
//! `NoopPipedreamService` answers when no OAuth client is configured, so the
//! gateway still starts and reports why the integration is unavailable.

use std::sync::Arc;

use {
    async_trait::async_trait,
    axum::http::StatusCode,
    serde_json::{Value, json},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{connector::Connector, pages};

/// Error type returned by service methods.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Missing or malformed input. 400.
    #[error("{message}")]
    BadRequest { message: String },
    /// No usable credential for the user. 401 with `requiresAuth`.
    #[error("{message}")]
    Unauthorized { message: String },
    #[error("{message}")]
    Message { message: String },
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl ServiceError {
    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl std::fmt::Display) -> Self {
        Self::BadRequest {
            message: message.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Message { .. } | Self::Serde(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn requires_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// JSON error envelope.
    pub fn body(&self) -> Value {
        let mut body = json!({ "success": false, "error": self.to_string() });
        if self.requires_auth() {
            body["requiresAuth"] = Value::Bool(true);
        }
        body
    }
}

impl From<pipebridge_mcp::Error> for ServiceError {
    fn from(err: pipebridge_mcp::Error) -> Self {
        use pipebridge_oauth::Error as OAuthError;

        if err.requires_auth() {
            return Self::Unauthorized {
                message: "User not authenticated with Pipedream".into(),
            };
        }
        match err {
            pipebridge_mcp::Error::OAuth(
                e @ (OAuthError::Validation { .. } | OAuthError::AuthState { .. }),
            ) => Self::bad_request(e),
            other => Self::message(other),
        }
    }
}

impl From<pipebridge_oauth::Error> for ServiceError {
    fn from(err: pipebridge_oauth::Error) -> Self {
        pipebridge_mcp::Error::from(err).into()
    }
}

pub type ServiceResult<T = Value> = Result<T, ServiceError>;

/// Boundary operations. Params are JSON objects with camelCase keys
/// (`userId`, `scopes`, `app`, `toolName`, `args`); replies are `{success, ...}`.
#[async_trait]
pub trait PipedreamService: Send + Sync {
    fn is_configured(&self) -> bool;
    async fn auth_start(&self, params: Value) -> ServiceResult;
    /// Complete the redirect leg. `Ok` is the success page's HTML.
    async fn oauth_callback(&self, params: Value) -> ServiceResult<String>;
    async fn auth_status(&self, params: Value) -> ServiceResult;
    async fn tools_discover(&self, params: Value) -> ServiceResult;
    async fn tools_execute(&self, params: Value) -> ServiceResult;
    async fn auth_disconnect(&self, params: Value) -> ServiceResult;
    async fn apps_list(&self, params: Value) -> ServiceResult;
    /// Run a sweep and report liveness.
    async fn health(&self) -> ServiceResult;
}

fn not_configured() -> ServiceError {
    ServiceError::message("Pipedream not configured")
}

pub struct NoopPipedreamService;

#[async_trait]
impl PipedreamService for NoopPipedreamService {
    fn is_configured(&self) -> bool {
        false
    }

    async fn auth_start(&self, _params: Value) -> ServiceResult {
        Err(not_configured())
    }

    async fn oauth_callback(&self, _params: Value) -> ServiceResult<String> {
        Err(not_configured())
    }

    async fn auth_status(&self, _params: Value) -> ServiceResult {
        Err(not_configured())
    }

    async fn tools_discover(&self, _params: Value) -> ServiceResult {
        Err(not_configured())
    }

    async fn tools_execute(&self, _params: Value) -> ServiceResult {
        Err(not_configured())
    }

    async fn auth_disconnect(&self, _params: Value) -> ServiceResult {
        Err(not_configured())
    }

    async fn apps_list(&self, _params: Value) -> ServiceResult {
        Err(not_configured())
    }

    async fn health(&self) -> ServiceResult {
        Err(not_configured())
    }
}

/// Non-empty string param.
fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// `scopes` as an array of strings or a space separated string.
fn scopes_param(params: &Value) -> Vec<String> {
    match params.get("scopes") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        Some(Value::String(s)) => s.split_whitespace().map(String::from).collect(),
        _ => Vec::new(),
    }
}

fn require_user(params: &Value) -> ServiceResult<&str> {
    str_param(params, "userId").ok_or_else(|| ServiceError::bad_request("User ID is required"))
}

pub struct LivePipedreamService {
    connector: Arc<Connector>,
}

impl LivePipedreamService {
    pub fn new(connector: Arc<Connector>) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }
}

#[async_trait]
impl PipedreamService for LivePipedreamService {
    fn is_configured(&self) -> bool {
        true
    }

    async fn auth_start(&self, params: Value) -> ServiceResult {
        let user_id = require_user(&params)?;
        let request = self
            .connector
            .start_authorization(user_id, &scopes_param(&params))
            .await?;
        Ok(json!({
            "success": true,
            "authUrl": request.url,
            "message": "Navigate to the provided URL to authorize Pipedream access",
        }))
    }

    async fn oauth_callback(&self, params: Value) -> ServiceResult<String> {
        if let Some(error) = str_param(&params, "error") {
            warn!(error, "provider rejected Pipedream authorization");
            return Err(ServiceError::bad_request(format!("OAuth error: {error}")));
        }
        let (Some(code), Some(state)) = (str_param(&params, "code"), str_param(&params, "state"))
        else {
            return Err(ServiceError::bad_request(
                "Missing authorization code or state",
            ));
        };

        let user_id = self.connector.complete_authorization(code, state).await?;
        info!(user_id = %user_id, "Pipedream authorization completed");
        Ok(pages::success_page())
    }

    async fn auth_status(&self, params: Value) -> ServiceResult {
        let user_id = require_user(&params)?;
        let authenticated = self.connector.is_authenticated(user_id).await;
        let available_apps = if authenticated {
            self.connector.list_connected_apps(user_id).await
        } else {
            Vec::new()
        };
        Ok(json!({
            "success": true,
            "authenticated": authenticated,
            "availableApps": available_apps,
        }))
    }

    async fn tools_discover(&self, params: Value) -> ServiceResult {
        let (Some(user_id), Some(app)) = (str_param(&params, "userId"), str_param(&params, "app"))
        else {
            return Err(ServiceError::bad_request("User ID and app are required"));
        };
        let tools = self.connector.discover_tools(user_id, app).await?;
        Ok(json!({
            "success": true,
            "app": app,
            "tools": tools,
        }))
    }

    async fn tools_execute(&self, params: Value) -> ServiceResult {
        let (Some(user_id), Some(app), Some(tool_name)) = (
            str_param(&params, "userId"),
            str_param(&params, "app"),
            str_param(&params, "toolName"),
        ) else {
            return Err(ServiceError::bad_request(
                "User ID, app, and tool name are required",
            ));
        };
        let args = params.get("args").cloned().unwrap_or(Value::Null);
        let execution = self
            .connector
            .execute_tool(user_id, app, tool_name, args, &CancellationToken::new())
            .await?;
        Ok(serde_json::to_value(execution)?)
    }

    async fn auth_disconnect(&self, params: Value) -> ServiceResult {
        let user_id = require_user(&params)?;
        self.connector.disconnect(user_id).await?;
        Ok(json!({
            "success": true,
            "message": "User disconnected from Pipedream",
        }))
    }

    async fn apps_list(&self, params: Value) -> ServiceResult {
        let user_id = require_user(&params)?;
        let apps = self.connector.list_connected_apps(user_id).await;
        Ok(json!({ "success": true, "apps": apps }))
    }

    async fn health(&self) -> ServiceResult {
        let report = self.connector.sweep().await;
        Ok(json!({
            "success": true,
            "message": "Pipedream MCP server is healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "sweep": report,
        }))
    }
}
