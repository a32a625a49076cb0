//! Agent-facing Pipedream capability: one discovery/execute tool when the
//! integration is configured, a setup-instructions tool when it isn't.

use std::{fmt::Write as _, sync::Arc};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde_json::{Value, json},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    connector::Connector,
    tool_registry::{AgentTool, ToolRegistry},
};

pub const DISCOVERY_TOOL_NAME: &str = "pipedream-tool-discovery";
pub const AUTH_REQUIRED_TOOL_NAME: &str = "pipedream-auth-required";
/// Source tag of the capability tools in a [`ToolRegistry`].
pub const CAPABILITY_SOURCE: &str = "pipedream";
pub const PIPEDREAM_SERVER_FLOW: &str = "@@mcp_pipedream";
/// User the agent acts for when neither the call nor the session names one.
pub const DEFAULT_USER: &str = "default-user";

/// Flow names of the MCP servers an agent can load: `@@mcp_{name}` for every
/// standard server, plus Pipedream when it is configured.
pub fn active_servers(standard: &[String], pipedream_configured: bool) -> Vec<String> {
    let mut servers: Vec<String> = standard.iter().map(|n| format!("@@mcp_{n}")).collect();
    if pipedream_configured {
        servers.push(PIPEDREAM_SERVER_FLOW.to_string());
    }
    servers
}

/// Register the Pipedream capability: the discovery tool when `connector`
/// is present, the setup tool otherwise. Replaces an earlier registration.
pub fn register_capability(
    registry: &mut ToolRegistry,
    connector: Option<Arc<Connector>>,
    session_user: Option<String>,
) {
    registry.unregister_source(CAPABILITY_SOURCE);
    let tool: Arc<dyn AgentTool> = match connector {
        Some(connector) => Arc::new(PipedreamDiscoveryTool::new(connector, session_user)),
        None => Arc::new(AuthRequiredTool),
    };
    registry.register_from(CAPABILITY_SOURCE, tool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    AuthStatus,
    Connect,
    Discover,
    Execute,
}

impl Action {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auth_status" => Some(Self::AuthStatus),
            "connect" => Some(Self::Connect),
            "discover" => Some(Self::Discover),
            "execute" => Some(Self::Execute),
            _ => None,
        }
    }
}

fn str_arg<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Discover and run Pipedream tools, replying in markdown.
pub struct PipedreamDiscoveryTool {
    connector: Arc<Connector>,
    session_user: Option<String>,
}

impl PipedreamDiscoveryTool {
    pub fn new(connector: Arc<Connector>, session_user: Option<String>) -> Self {
        Self {
            connector,
            session_user,
        }
    }

    fn user_id<'a>(&'a self, params: &'a Value) -> &'a str {
        str_arg(params, "user_id")
            .or(self.session_user.as_deref())
            .unwrap_or(DEFAULT_USER)
    }

    async fn auth_url(&self, user_id: &str) -> pipebridge_mcp::Result<String> {
        Ok(self.connector.start_authorization(user_id, &[]).await?.url)
    }

    async fn run(&self, params: &Value) -> pipebridge_mcp::Result<String> {
        let user_id = self.user_id(params);
        let raw_action = str_arg(params, "action").unwrap_or_default();
        let app = str_arg(params, "app");
        info!(user_id, action = raw_action, "pipedream capability invoked");

        let Some(action) = Action::parse(raw_action) else {
            return Ok(unknown_action(raw_action));
        };

        match action {
            Action::AuthStatus => {
                if !self.connector.is_authenticated(user_id).await {
                    let url = self.auth_url(user_id).await?;
                    return Ok(format!(
                        "🔐 **Authentication Required**\n\n\
                         You need to authenticate with Pipedream to access APIs. Please visit:\n\
                         {url}\n\n\
                         After authentication you'll have access to apps such as Slack, Gmail, \
                         Notion, Google Sheets and GitHub."
                    ));
                }
                let apps = self.connector.list_connected_apps(user_id).await;
                Ok(format!(
                    "✅ **Authenticated with Pipedream**\n\n\
                     Available apps: {}\n\n\
                     You can now use tools like:\n\
                     • \"discover slack\" - See available Slack tools\n\
                     • \"execute slack send_message\" - Send Slack messages",
                    apps.join(", ")
                ))
            },
            Action::Connect => {
                let Some(app) = app else {
                    return Ok("❓ **App required** - Specify which app to connect (e.g., 'slack', \
                               'gmail', 'notion')"
                        .into());
                };
                if !self.connector.is_authenticated(user_id).await {
                    let url = self.auth_url(user_id).await?;
                    return Ok(format!("🔐 **Please authenticate first:** {url}"));
                }
                Ok(format!(
                    "🔌 **Connecting to {app}...**\n\n\
                     Once connected, you'll be able to use {app} tools directly through the agent."
                ))
            },
            Action::Discover => {
                let Some(app) = app else {
                    let apps = self.connector.list_connected_apps(user_id).await;
                    let mut out = String::from("📋 **Available Pipedream Apps:**\n\n");
                    for name in &apps {
                        let _ = writeln!(out, "• **{name}** - Use \"discover {name}\" to see tools");
                    }
                    return Ok(out);
                };
                if !self.connector.is_authenticated(user_id).await {
                    let url = self.auth_url(user_id).await?;
                    return Ok(format!("🔐 **Authentication required:** {url}"));
                }
                let tools = self.connector.discover_tools(user_id, app).await?;
                if tools.is_empty() {
                    return Ok(format!(
                        "📋 **No tools found for {app}** - The app may need additional setup or \
                         permissions."
                    ));
                }
                let mut out = format!("🔧 **{app} Tools:**\n\n");
                for tool in &tools {
                    let _ = writeln!(out, "• **{}** - {}", tool.name, tool.description);
                }
                let _ = write!(out, "\nUse \"execute {app} <tool_name>\" to run a tool.");
                Ok(out)
            },
            Action::Execute => {
                let (Some(app), Some(tool_name)) = (app, str_arg(params, "tool_name")) else {
                    return Ok("❓ **App and tool name required** - e.g., 'execute slack \
                               send_message'"
                        .into());
                };
                if !self.connector.is_authenticated(user_id).await {
                    let url = self.auth_url(user_id).await?;
                    return Ok(format!("🔐 **Authentication required:** {url}"));
                }
                let args = params.get("args").cloned().unwrap_or(Value::Null);
                let result = self
                    .connector
                    .execute_tool(user_id, app, tool_name, args, &CancellationToken::new())
                    .await?;
                if result.success {
                    let data = match result.data {
                        Some(Value::String(s)) => s,
                        Some(other) => serde_json::to_string_pretty(&other)?,
                        None => String::new(),
                    };
                    Ok(format!(
                        "✅ **{app}:{tool_name} executed successfully**\n\n{data}"
                    ))
                } else {
                    Ok(format!(
                        "❌ **{app}:{tool_name} failed**\n\nError: {}",
                        result.error.unwrap_or_default()
                    ))
                }
            },
        }
    }
}

fn unknown_action(action: &str) -> String {
    format!(
        "❓ **Unknown action:** {action}\n\n\
         Available actions:\n\
         • **auth_status** - Check authentication status\n\
         • **connect** - Connect to an app\n\
         • **discover** - Discover available tools\n\
         • **execute** - Execute a specific tool"
    )
}

#[async_trait]
impl AgentTool for PipedreamDiscoveryTool {
    fn name(&self) -> &str {
        DISCOVERY_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Access thousands of APIs through Pipedream with OAuth2 handled for you. Supports \
         Slack, Gmail, Notion, GitHub, Google Sheets, Discord, HubSpot, Airtable and many more."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["discover", "execute", "auth_status", "connect"],
                    "description": "Action to perform: discover tools, execute a tool, check auth status, or connect to an app"
                },
                "app": {
                    "type": "string",
                    "description": "App slug (e.g., 'slack', 'gmail', 'notion', 'github', 'google-sheets')"
                },
                "tool_name": {
                    "type": "string",
                    "description": "Name of the tool to execute"
                },
                "args": {
                    "type": "object",
                    "description": "Arguments to pass to the tool"
                },
                "user_id": {
                    "type": "string",
                    "description": "User identifier for authentication (defaults to session user)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let reply = match self.run(&params).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "pipedream capability failed");
                format!(
                    "❌ **Pipedream tool failed:** {e}\n\n\
                     This might be due to:\n\
                     • Authentication issues - Check your Pipedream connection\n\
                     • Invalid app or tool name\n\
                     • Missing required parameters"
                )
            },
        };
        Ok(Value::String(reply))
    }
}

/// Stands in for the discovery tool while no OAuth client is configured.
pub struct AuthRequiredTool;

#[async_trait]
impl AgentTool for AuthRequiredTool {
    fn name(&self) -> &str {
        AUTH_REQUIRED_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Authenticate with Pipedream to access thousands of APIs and tools"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["authenticate"],
                    "description": "Action to perform"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, _params: Value) -> Result<Value> {
        Ok(Value::String(
            "🔐 **Pipedream Authentication Required**\n\n\
             To use Pipedream's APIs and tools, configure OAuth2 credentials:\n\n\
             1. **Get Pipedream OAuth credentials** at https://pipedream.com/settings/account \
             and copy the Client ID and Client Secret.\n\n\
             2. **Configure environment variables:**\n   \
             - PIPEDREAM_CLIENT_ID=your_client_id\n   \
             - PIPEDREAM_CLIENT_SECRET=your_client_secret\n   \
             - PIPEDREAM_PROJECT_ID=your_project_id (optional)\n\n\
             3. **Restart pipebridge** to enable the integration."
                .into(),
        ))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_servers_appends_pipedream_when_configured() {
        let standard = vec!["docker".to_string()];
        assert_eq!(active_servers(&standard, false), vec!["@@mcp_docker"]);
        assert_eq!(active_servers(&standard, true), vec![
            "@@mcp_docker",
            "@@mcp_pipedream"
        ]);
    }

    #[test]
    fn actions_parse_case_insensitively() {
        assert_eq!(Action::parse("AUTH_STATUS"), Some(Action::AuthStatus));
        assert_eq!(Action::parse(" execute "), Some(Action::Execute));
        assert_eq!(Action::parse("list_workflows"), None);
    }

    #[tokio::test]
    async fn unconfigured_registry_exposes_setup_tool() {
        let mut reg = ToolRegistry::new();
        register_capability(&mut reg, None, None);
        assert_eq!(reg.tool_names(), vec![AUTH_REQUIRED_TOOL_NAME]);
        let reply = reg
            .call(AUTH_REQUIRED_TOOL_NAME, json!({"action": "authenticate"}))
            .await
            .unwrap();
        assert!(reply.as_str().unwrap().contains("PIPEDREAM_CLIENT_SECRET"));
    }
}
