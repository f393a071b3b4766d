//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.goose-host/config.json`). A missing
//! file means defaults; every field is optional.

use crate::env::EnvMap;
use crate::probe::ProbePolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level host config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// How the backend executable is found and invoked.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Readiness probe budget.
    #[serde(default)]
    pub probe: ProbeConfig,
}

/// Backend executable, subcommand, working directory and extra environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Explicit backend executable. When unset the locator searches (see `locate`).
    #[serde(default)]
    pub binary_path: Option<PathBuf>,

    /// Subcommand passed as the only argument (default "agent").
    #[serde(default = "default_subcommand")]
    pub subcommand: String,

    /// Default working directory for instances (default: the user's home directory).
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra variables for every instance. Per-launch variables override these.
    #[serde(default)]
    pub env: EnvMap,
}

/// Readiness probe settings; see [`ProbePolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_subcommand() -> String {
    "agent".to_string()
}

fn default_max_attempts() -> u32 {
    ProbePolicy::default().max_attempts
}

fn default_interval_ms() -> u64 {
    ProbePolicy::default().interval.as_millis() as u64
}

fn default_request_timeout_ms() -> u64 {
    ProbePolicy::default().request_timeout.as_millis() as u64
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            subcommand: default_subcommand(),
            working_dir: None,
            env: EnvMap::new(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ProbeConfig {
    pub fn policy(&self) -> ProbePolicy {
        ProbePolicy {
            max_attempts: self.max_attempts,
            interval: Duration::from_millis(self.interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("GOOSE_HOST_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".goose-host").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// The user's home directory, falling back to the current directory.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Working directory for an instance: explicit request, then config, then home.
pub fn resolve_working_dir(config: &Config, requested: Option<&Path>) -> PathBuf {
    requested
        .map(Path::to_path_buf)
        .or_else(|| {
            config
                .backend
                .working_dir
                .clone()
                .filter(|d| !d.as_os_str().is_empty())
        })
        .unwrap_or_else(home_dir)
}

/// Load config from the given path, or the default path (or GOOSE_HOST_CONFIG_PATH).
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
