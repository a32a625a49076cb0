//! MCP wire types (JSON-RPC 2.0 over streamable HTTP).

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// MCP protocol version we speak.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ── JSON-RPC 2.0 ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: Value::from(id),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Transport-level failures that callers branch on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum McpTransportError {
    #[error("remote endpoint rejected the access token")]
    Unauthorized { www_authenticate: Option<String> },
    #[error("'{method}' timed out after {secs}s")]
    Timeout { method: String, secs: u64 },
    #[error("HTTP {status} for '{method}': {body}")]
    Http {
        method: String,
        status: u16,
        body: String,
    },
    #[error("JSON-RPC error {code} on '{method}': {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
}

// ── Handshake ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ImplementationInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: ImplementationInfo,
}

// ── Tools ───────────────────────────────────────────────────────────

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolsCallResult {
    fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|c| match c {
            ToolContent::Text { text } => Some(text.as_str()),
            ToolContent::Image { .. } | ToolContent::Resource { .. } => None,
        })
    }

    /// Text parts joined by newlines, for error reporting.
    pub fn text(&self) -> String {
        self.texts().collect::<Vec<_>>().join("\n")
    }

    /// Collapse the content into one JSON value: a lone text part is parsed
    /// as JSON when possible, otherwise kept as a string; several parts become
    /// `{"content": [...]}`.
    pub fn into_value(self) -> Value {
        let texts: Vec<&str> = self.texts().collect();
        match texts.as_slice() {
            [single] => serde_json::from_str(single).unwrap_or_else(|_| Value::from(*single)),
            [] if !self.content.is_empty() => {
                serde_json::json!({ "content": self.content })
            },
            many => serde_json::json!({ "content": many }),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_numeric_id() {
        let req = JsonRpcRequest::new(7, "tools/list", None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["jsonrpc"], "2.0");
        assert!(json.get("params").is_none());
    }

    #[test]
    fn tool_without_schema_gets_empty_object() {
        let tool: McpToolDef = serde_json::from_str(r#"{"name":"send_message"}"#).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.description.is_none());
    }

    #[test]
    fn single_json_text_is_parsed() {
        let result: ToolsCallResult =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"{\"ok\":true}"}]}"#)
                .unwrap();
        assert_eq!(result.into_value(), serde_json::json!({"ok": true}));
    }

    #[test]
    fn single_plain_text_stays_a_string() {
        let result: ToolsCallResult =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"sent"}]}"#).unwrap();
        assert_eq!(result.into_value(), serde_json::json!("sent"));
    }

    #[test]
    fn several_texts_are_wrapped() {
        let result: ToolsCallResult = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"a"},{"type":"text","text":"b"}],"isError":true}"#,
        )
        .unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), "a\nb");
        assert_eq!(
            result.into_value(),
            serde_json::json!({"content": ["a", "b"]})
        );
    }

    #[test]
    fn initialize_params_use_camel_case() {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ImplementationInfo {
                name: "pipebridge".into(),
                version: Some("0.3.0".into()),
            },
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(json["clientInfo"]["name"], "pipebridge");
    }
}
