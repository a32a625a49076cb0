//! Configuration loading and env substitution.
//!
//! Config files: `pipebridge.toml`, `pipebridge.yaml`, or `pipebridge.json`
//! Searched in `./` then `~/.config/pipebridge/`.
//!
//! Supports `${ENV_VAR}` substitution in the raw file text (unset variables
//! expand to nothing), plus the `PIPEDREAM_*` / `STORAGE_DIR` environment
//! overrides.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, apply_env_overrides_with, config_dir, data_dir, discover_and_load,
        load_config, load_from,
    },
    schema::{
        PipebridgeConfig, PipedreamConfig, ServerConfig, StorageConfig, SweeperConfig,
        TimeoutsConfig,
    },
};
