/// Config schema types (pipedream credentials, timeouts, sweeper, server, storage).
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipebridgeConfig {
    pub pipedream: PipedreamConfig,
    pub timeouts: TimeoutsConfig,
    pub sweeper: SweeperConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

/// OAuth client + remote tool endpoint settings for the Pipedream platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipedreamConfig {
    pub client_id: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
    pub project_id: Option<String>,
    /// Project environment sent as `X-Pipedream-Environment`. Defaults to "production".
    pub environment: String,
    /// Base URL of the OAuth authorization server.
    pub base_url: String,
    /// Base URL of the remote MCP endpoint; the app slug is appended as a path segment.
    pub mcp_server_url: String,
    pub redirect_uri: String,
    /// Scopes requested when the caller does not pass any.
    pub default_scopes: Vec<String>,
    /// App slugs reported as connected for authenticated users.
    pub apps: Vec<String>,
}

impl PipedreamConfig {
    /// Both halves of the OAuth client credentials are present.
    pub fn is_configured(&self) -> bool {
        self.client_id.as_deref().is_some_and(|id| !id.is_empty())
            && self
                .client_secret
                .as_ref()
                .is_some_and(|s| !s.expose_secret().is_empty())
    }
}

impl Default for PipedreamConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            project_id: None,
            environment: "production".into(),
            base_url: "https://api.pipedream.com".into(),
            mcp_server_url: "https://mcp.pipedream.com".into(),
            redirect_uri: "http://localhost:3001/api/oauth/pipedream/callback".into(),
            default_scopes: vec!["read:apps".into(), "write:apps".into()],
            apps: default_apps(),
        }
    }
}

fn default_apps() -> Vec<String> {
    [
        "slack",
        "gmail",
        "notion",
        "google-sheets",
        "github",
        "discord",
        "twitter",
        "linkedin",
        "hubspot",
        "salesforce",
        "airtable",
        "trello",
        "asana",
        "zoom",
        "calendar",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Upper bounds for remote calls, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// OAuth token endpoint requests.
    pub token_request_secs: u64,
    /// Opening an MCP session (initialize handshake).
    pub connect_secs: u64,
    /// `tools/list`.
    pub discover_secs: u64,
    /// `tools/call`.
    pub tool_call_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            token_request_secs: 30,
            connect_secs: 30,
            discover_secs: 30,
            tool_call_secs: 120,
        }
    }
}

/// Background cleanup of expired credentials and stale state nonces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15 * 60,
        }
    }
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 3001,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `pipedream_tokens.json`. Falls back to the user data dir.
    pub data_dir: Option<PathBuf>,
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_hosted_platform() {
        let cfg = PipedreamConfig::default();
        assert_eq!(cfg.environment, "production");
        assert_eq!(cfg.base_url, "https://api.pipedream.com");
        assert_eq!(cfg.mcp_server_url, "https://mcp.pipedream.com");
        assert_eq!(cfg.default_scopes, vec!["read:apps", "write:apps"]);
        assert!(cfg.apps.contains(&"slack".to_string()));
        assert!(!cfg.is_configured());
    }

    #[test]
    fn configured_requires_non_empty_id_and_secret() {
        let mut cfg = PipedreamConfig {
            client_id: Some("id".into()),
            ..Default::default()
        };
        assert!(!cfg.is_configured());
        cfg.client_secret = Some(Secret::new(String::new()));
        assert!(!cfg.is_configured());
        cfg.client_secret = Some(Secret::new("secret".into()));
        assert!(cfg.is_configured());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: PipebridgeConfig = toml::from_str(
            r#"
            [pipedream]
            client_id = "abc"
            client_secret = "shh"

            [timeouts]
            tool_call_secs = 5
            "#,
        )
        .unwrap();
        assert!(cfg.pipedream.is_configured());
        assert_eq!(cfg.pipedream.environment, "production");
        assert_eq!(cfg.timeouts.tool_call_secs, 5);
        assert_eq!(cfg.timeouts.connect_secs, 30);
        assert!(cfg.sweeper.enabled);
    }

    #[test]
    fn secret_round_trips_through_toml() {
        let cfg = PipebridgeConfig {
            pipedream: PipedreamConfig {
                client_secret: Some(Secret::new("hidden".into())),
                ..Default::default()
            },
            ..Default::default()
        };
        let raw = toml::to_string_pretty(&cfg).unwrap();
        let back: PipebridgeConfig = toml::from_str(&raw).unwrap();
        assert_eq!(
            back.pipedream.client_secret.unwrap().expose_secret(),
            "hidden"
        );
    }
}
