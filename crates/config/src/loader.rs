use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::expand,
    error::{Error, Result},
    schema::PipebridgeConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "pipebridge.toml",
    "pipebridge.yaml",
    "pipebridge.yml",
    "pipebridge.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<PipebridgeConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.display().to_string(),
        source,
    })?;
    let expanded = expand(&raw);
    if !expanded.unresolved.is_empty() {
        warn!(
            path = %path.display(),
            vars = ?expanded.unresolved,
            "config references unset environment variables, expanding them to empty"
        );
    }
    parse_config(&expanded.text, path)
}

/// Discover and load config from standard locations, then apply env overrides.
///
/// Search order:
/// 1. `./pipebridge.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/pipebridge/pipebridge.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `PipebridgeConfig::default()` when nothing is found or the
/// file fails to parse.
pub fn discover_and_load() -> PipebridgeConfig {
    let mut config = match find_config_file() {
        Some(path) => load_or_default(&path),
        None => {
            debug!("no config file found, using defaults");
            PipebridgeConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

/// Load an explicit config path, falling back to defaults on error, then apply env overrides.
pub fn load_from(path: &Path) -> PipebridgeConfig {
    let mut config = load_or_default(path);
    apply_env_overrides(&mut config);
    config
}

fn load_or_default(path: &Path) -> PipebridgeConfig {
    debug!(path = %path.display(), "loading config");
    match load_config(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            PipebridgeConfig::default()
        },
    }
}

/// Override config values from the process environment.
pub fn apply_env_overrides(config: &mut PipebridgeConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

/// Same as [`apply_env_overrides`] with a custom lookup, so tests don't touch
/// the process environment.
pub fn apply_env_overrides_with(
    config: &mut PipebridgeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let pd = &mut config.pipedream;

    if let Some(v) = get("PIPEDREAM_CLIENT_ID") {
        pd.client_id = Some(v);
    }
    if let Some(v) = get("PIPEDREAM_CLIENT_SECRET") {
        pd.client_secret = Some(Secret::new(v));
    }
    if let Some(v) = get("PIPEDREAM_PROJECT_ID") {
        pd.project_id = Some(v);
    }
    if let Some(v) = get("PIPEDREAM_PROJECT_ENVIRONMENT") {
        pd.environment = v;
    }
    if let Some(v) = get("PIPEDREAM_OAUTH_REDIRECT_URI") {
        pd.redirect_uri = v;
    }
    if let Some(v) = get("PIPEDREAM_BASE_URL") {
        pd.base_url = v;
    }
    if let Some(v) = get("PIPEDREAM_MCP_SERVER_URL") {
        pd.mcp_server_url = v;
    }
    if let Some(v) = get("STORAGE_DIR") {
        config.storage.data_dir = Some(PathBuf::from(v));
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/pipebridge/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "pipebridge").map(|d| d.config_dir().to_path_buf())
}

/// Directory for persisted state. `storage.data_dir` wins over the platform default.
pub fn data_dir(config: &PipebridgeConfig) -> PathBuf {
    if let Some(dir) = &config.storage.data_dir {
        return dir.clone();
    }
    directories::ProjectDirs::from("", "", "pipebridge")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("storage"))
}

fn parse_config(raw: &str, path: &Path) -> Result<PipebridgeConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    let parsed = match ext {
        "toml" => toml::from_str(raw).map_err(|e| e.to_string()),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
        "json" => serde_json::from_str(raw).map_err(|e| e.to_string()),
        _ => {
            return Err(Error::UnsupportedFormat {
                extension: ext.to_string(),
            });
        },
    };
    parsed.map_err(|detail| Error::Parse {
        path: path.display().to_string(),
        detail,
    })
}
