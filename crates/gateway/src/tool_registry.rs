use std::{collections::HashMap, sync::Arc};

use {
    anyhow::{Result, anyhow},
    async_trait::async_trait,
    pipebridge_mcp::ToolDescriptor,
    serde_json::{Value, json},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::connector::Connector;

/// Source tag for tools registered without one.
pub const BUILTIN_SOURCE: &str = "builtin";

/// Agent-callable tool.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value) -> Result<Value>;
}

struct Entry {
    tool: Arc<dyn AgentTool>,
    source: String,
}

/// Registry of available tools for an agent run.
///
/// Every tool carries the tag of the source that registered it, so several
/// sources aggregate into one registry and one source can be dropped whole.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn AgentTool>) {
        self.register_from(BUILTIN_SOURCE, Arc::from(tool));
    }

    /// Register `tool` under `source`. A tool with the same name is replaced.
    pub fn register_from(&mut self, source: impl Into<String>, tool: Arc<dyn AgentTool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, Entry {
            tool,
            source: source.into(),
        });
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Drop every tool `source` registered. Returns how many went away.
    pub fn unregister_source(&mut self, source: &str) -> usize {
        let before = self.tools.len();
        self.tools.retain(|_, entry| entry.source != source);
        before - self.tools.len()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(name).map(|e| Arc::clone(&e.tool))
    }

    pub fn source_of(&self, name: &str) -> Option<&str> {
        self.tools.get(name).map(|e| e.source.as_str())
    }

    /// Resolve `name` and run it.
    pub async fn call(&self, name: &str, params: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| anyhow!("unknown tool: {name}"))?;
        tool.execute(params).await
    }

    /// Schemas sorted by tool name.
    pub fn list_schemas(&self) -> Vec<Value> {
        let mut entries: Vec<_> = self.tools.values().collect();
        entries.sort_by(|a, b| a.tool.name().cmp(b.tool.name()));
        entries
            .into_iter()
            .map(|e| {
                json!({
                    "name": e.tool.name(),
                    "description": e.tool.description(),
                    "parameters": e.tool.parameters_schema(),
                    "source": e.source,
                })
            })
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// A discovered remote tool bound to the user it was discovered for.
#[derive(Debug, Clone)]
pub struct PipedreamToolDescriptor {
    pub user_id: String,
    pub tool: ToolDescriptor,
}

/// Runs any bridged tool by descriptor, so no tool needs its own code.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, descriptor: &PipedreamToolDescriptor, args: Value) -> Result<Value>;
}

#[async_trait]
impl ToolInvoker for Connector {
    /// Returns the execution envelope `{success, data, error}`; remote
    /// failures are data, not `Err`.
    async fn invoke(&self, descriptor: &PipedreamToolDescriptor, args: Value) -> Result<Value> {
        let execution = self
            .execute_tool(
                &descriptor.user_id,
                &descriptor.tool.app,
                &descriptor.tool.name,
                args,
                &CancellationToken::new(),
            )
            .await?;
        Ok(serde_json::to_value(execution)?)
    }
}

struct BridgedTool {
    descriptor: PipedreamToolDescriptor,
    invoker: Arc<dyn ToolInvoker>,
}

#[async_trait]
impl AgentTool for BridgedTool {
    fn name(&self) -> &str {
        &self.descriptor.tool.full_name
    }

    fn description(&self) -> &str {
        &self.descriptor.tool.description
    }

    fn parameters_schema(&self) -> Value {
        self.descriptor.tool.input_schema.clone()
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        self.invoker.invoke(&self.descriptor, params).await
    }
}

/// Source tag for one user's tools of one app.
pub fn app_source(user_id: &str, app: &str) -> String {
    format!("pipedream:{user_id}:{app}")
}

/// Replace the registry entries for (`user_id`, `app`) with one entry per
/// descriptor, each resolving to `invoker` at call time.
pub fn register_descriptors(
    registry: &mut ToolRegistry,
    user_id: &str,
    app: &str,
    tools: Vec<ToolDescriptor>,
    invoker: Arc<dyn ToolInvoker>,
) -> usize {
    let source = app_source(user_id, app);
    registry.unregister_source(&source);
    let count = tools.len();
    for tool in tools {
        registry.register_from(
            source.clone(),
            Arc::new(BridgedTool {
                descriptor: PipedreamToolDescriptor {
                    user_id: user_id.to_string(),
                    tool,
                },
                invoker: Arc::clone(&invoker),
            }),
        );
    }
    debug!(user_id, app, count, "registered bridged tools");
    count
}

/// Discover `app`'s tools for `user_id` and register them.
pub async fn register_app_tools(
    registry: &mut ToolRegistry,
    connector: &Arc<Connector>,
    user_id: &str,
    app: &str,
) -> pipebridge_mcp::Result<usize> {
    let tools = connector.discover_tools(user_id, app).await?;
    let invoker: Arc<dyn ToolInvoker> = Arc::clone(connector) as Arc<dyn ToolInvoker>;
    Ok(register_descriptors(registry, user_id, app, tools, invoker))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Echo(&'static str);

    #[async_trait]
    impl AgentTool for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "echo"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, params: Value) -> Result<Value> {
            Ok(params)
        }
    }

    #[derive(Default)]
    struct RecordingInvoker {
        calls: Mutex<Vec<(String, String, String, Value)>>,
    }

    #[async_trait]
    impl ToolInvoker for RecordingInvoker {
        async fn invoke(&self, d: &PipedreamToolDescriptor, args: Value) -> Result<Value> {
            self.calls.lock().unwrap().push((
                d.user_id.clone(),
                d.tool.app.clone(),
                d.tool.name.clone(),
                args,
            ));
            Ok(json!({"success": true}))
        }
    }

    fn descriptor(app: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor::from_def(app, pipebridge_mcp::types::McpToolDef {
            name: name.into(),
            description: None,
            input_schema: json!({"type": "object"}),
        })
    }

    #[tokio::test]
    async fn register_and_call() {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(Echo("echo")));
        assert_eq!(reg.source_of("echo"), Some(BUILTIN_SOURCE));
        assert_eq!(reg.call("echo", json!({"a": 1})).await.unwrap(), json!({"a": 1}));
        assert!(reg.call("missing", json!({})).await.is_err());
        assert!(reg.unregister("echo"));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn descriptors_resolve_through_invoker() {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(Echo("echo")));
        let invoker = Arc::new(RecordingInvoker::default());

        let n = register_descriptors(
            &mut reg,
            "u1",
            "slack",
            vec![descriptor("slack", "send_message"), descriptor("slack", "list_channels")],
            invoker.clone(),
        );
        assert_eq!(n, 2);
        assert_eq!(reg.tool_names(), vec![
            "echo",
            "pipedream-slack-list_channels",
            "pipedream-slack-send_message",
        ]);

        reg.call("pipedream-slack-send_message", json!({"text": "hi"}))
            .await
            .unwrap();
        let calls = invoker.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(
            "u1".to_string(),
            "slack".to_string(),
            "send_message".to_string(),
            json!({"text": "hi"})
        )]);
    }

    #[test]
    fn re_registering_an_app_replaces_its_tools() {
        let mut reg = ToolRegistry::new();
        let invoker = Arc::new(RecordingInvoker::default());
        register_descriptors(
            &mut reg,
            "u1",
            "slack",
            vec![descriptor("slack", "old_tool")],
            invoker.clone(),
        );
        register_descriptors(
            &mut reg,
            "u1",
            "gmail",
            vec![descriptor("gmail", "send_email")],
            invoker.clone(),
        );
        register_descriptors(
            &mut reg,
            "u1",
            "slack",
            vec![descriptor("slack", "new_tool")],
            invoker,
        );

        assert_eq!(reg.tool_names(), vec![
            "pipedream-gmail-send_email",
            "pipedream-slack-new_tool",
        ]);
        assert_eq!(reg.unregister_source(&app_source("u1", "gmail")), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn schemas_carry_source() {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(Echo("b")));
        reg.register_from("custom", Arc::new(Echo("a")));
        let schemas = reg.list_schemas();
        assert_eq!(schemas[0]["name"], "a");
        assert_eq!(schemas[0]["source"], "custom");
        assert_eq!(schemas[1]["source"], "builtin");
    }
}
