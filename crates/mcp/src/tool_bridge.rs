//! Discover and run remote tools for a user, through cached sessions.

use std::{sync::Arc, time::Duration};

use {
    serde::Serialize,
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    apps::AppCatalog,
    cache::{ConnectionCache, validate_key},
    error::{Error, Result},
    types::{McpToolDef, McpTransportError},
};

/// Prefix of the agent-facing name of every bridged tool.
pub const TOOL_NAME_PREFIX: &str = "pipedream";

/// Agent-facing name: `pipedream-{app}-{tool}`.
pub fn full_tool_name(app: &str, tool: &str) -> String {
    format!("{TOOL_NAME_PREFIX}-{app}-{tool}")
}

/// A remote tool, as offered to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub app: String,
    pub full_name: String,
}

impl ToolDescriptor {
    pub fn from_def(app: &str, def: McpToolDef) -> Self {
        let description = def
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("{app} tool: {}", def.name));
        Self {
            full_name: full_tool_name(app, &def.name),
            name: def.name,
            description,
            input_schema: def.input_schema,
            app: app.to_string(),
        }
    }
}

/// Outcome of one tool call. Remote failures land in `error`, never in `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExecution {
    pub success: bool,
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecution {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BridgeTimeouts {
    pub discover: Duration,
    pub tool_call: Duration,
}

impl Default for BridgeTimeouts {
    fn default() -> Self {
        Self {
            discover: Duration::from_secs(30),
            tool_call: Duration::from_secs(120),
        }
    }
}

pub struct ToolBridge {
    cache: Arc<ConnectionCache>,
    catalog: Arc<dyn AppCatalog>,
    timeouts: BridgeTimeouts,
}

impl ToolBridge {
    pub fn new(cache: Arc<ConnectionCache>, catalog: Arc<dyn AppCatalog>) -> Self {
        Self {
            cache,
            catalog,
            timeouts: BridgeTimeouts::default(),
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: BridgeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    /// Fail with `AuthRequired` unless a credential is stored for the user.
    async fn require_credential(&self, user_id: &str) -> Result<()> {
        if self.cache.tokens().is_authenticated(user_id).await {
            Ok(())
        } else {
            Err(pipebridge_oauth::Error::auth_required(user_id).into())
        }
    }

    /// List the tools `app` exposes to this user. An empty list is valid.
    pub async fn discover_tools(&self, user_id: &str, app: &str) -> Result<Vec<ToolDescriptor>> {
        validate_key(user_id, app)?;
        self.require_credential(user_id).await?;

        let handle = self
            .cache
            .get_or_create(user_id, app)
            .await
            .map_err(|e| e.into_remote(app))?;

        let listed = match tokio::time::timeout(
            self.timeouts.discover,
            handle.client().list_tools(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(McpTransportError::Timeout {
                method: "tools/list".into(),
                secs: self.timeouts.discover.as_secs(),
            }
            .into()),
        };

        let defs = match listed {
            Ok(defs) => defs,
            Err(e) => {
                let e = e.into_remote(app);
                if e.loses_session() {
                    self.cache.invalidate(user_id, app).await;
                }
                warn!(user_id, app, error = %e, "tool discovery failed");
                return Err(e);
            },
        };

        debug!(user_id, app, count = defs.len(), "discovered tools");
        Ok(defs
            .into_iter()
            .map(|def| ToolDescriptor::from_def(app, def))
            .collect())
    }

    /// Run `tool_name` with `args`. Only missing ids and a missing credential
    /// are raised; everything past that is reported in the result.
    pub async fn execute_tool(
        &self,
        user_id: &str,
        app: &str,
        tool_name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<ToolExecution> {
        validate_key(user_id, app)?;
        if tool_name.trim().is_empty() {
            return Err(pipebridge_oauth::Error::missing("Tool name").into());
        }
        self.require_credential(user_id).await?;

        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };

        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = self.call(user_id, app, tool_name, args) => result,
        };

        Ok(match outcome {
            Ok(execution) => execution,
            Err(e) => {
                if e.loses_session() {
                    self.cache.invalidate(user_id, app).await;
                }
                warn!(user_id, app, tool = tool_name, error = %e, "tool execution failed");
                ToolExecution::failed(e.to_string())
            },
        })
    }

    async fn call(
        &self,
        user_id: &str,
        app: &str,
        tool_name: &str,
        args: Value,
    ) -> Result<ToolExecution> {
        let handle = self.cache.get_or_create(user_id, app).await?;
        let result = tokio::time::timeout(
            self.timeouts.tool_call,
            handle.client().call_tool(tool_name, args),
        )
        .await
        .map_err(|_| McpTransportError::Timeout {
            method: "tools/call".into(),
            secs: self.timeouts.tool_call.as_secs(),
        })??;

        if result.is_error {
            let text = result.text();
            let detail = if text.is_empty() {
                "tool reported an error".to_string()
            } else {
                text
            };
            return Ok(ToolExecution::failed(detail));
        }

        info!(user_id, app, tool = tool_name, "tool executed");
        Ok(ToolExecution::ok(result.into_value()))
    }

    /// Apps to offer this user: the catalog's list, plus any app a session
    /// was opened to. Empty when the user isn't authenticated.
    pub async fn list_connected_apps(&self, user_id: &str) -> Vec<String> {
        if !self.cache.tokens().is_authenticated(user_id).await {
            return Vec::new();
        }
        let mut apps = self.catalog.list_connected_apps(user_id).await;
        for app in self.cache.available_apps(user_id) {
            if !apps.contains(&app) {
                apps.push(app);
            }
        }
        apps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults_description() {
        let def = McpToolDef {
            name: "send_message".into(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        };
        let d = ToolDescriptor::from_def("slack", def);
        assert_eq!(d.description, "slack tool: send_message");
        assert_eq!(d.full_name, "pipedream-slack-send_message");
    }

    #[test]
    fn descriptor_serializes_camel_case() {
        let def = McpToolDef {
            name: "find_row".into(),
            description: Some("Find a row".into()),
            input_schema: serde_json::json!({}),
        };
        let json = serde_json::to_value(ToolDescriptor::from_def("google-sheets", def)).unwrap_or_default();
        assert_eq!(json["fullName"], "pipedream-google-sheets-find_row");
        assert_eq!(json["description"], "Find a row");
        assert!(json.get("inputSchema").is_some());
    }

    #[test]
    fn failed_execution_has_no_data() {
        let e = ToolExecution::failed("boom");
        assert!(!e.success);
        assert!(e.data.is_none());
        assert_eq!(e.error.as_deref(), Some("boom"));
    }
}
