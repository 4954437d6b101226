//! Process-wide configuration, built once at startup and passed around by `Arc`.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, WebhookError};

pub const DEFAULT_ALLOWED_BRANCH: &str = "master";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_BUILDER: &str = "website-builder";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";

/// Settings that may come from the optional TOML file pointed to by `GW_CONFIG`.
/// Environment variables win over anything set here.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct FileConfig {
    pub github_token: Option<String>,
    pub github_secret: Option<String>,
    pub base_dir: Option<PathBuf>,
    pub allowed_branches: Option<Vec<String>>,
    pub api_url: Option<String>,
    pub builder: Option<String>,
    pub bind_address: Option<String>,
    pub log_dir: Option<PathBuf>,
}

/// Credentials passed through to `telegram-notify` by its own environment.
/// Only their joint presence matters here.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyConfig {
    pub token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub github_token: Option<String>,
    pub github_secret: Option<String>,
    pub base_dir: Option<PathBuf>,
    pub allowed_branches: Vec<String>,
    pub api_url: String,
    pub builder: String,
    pub bind_address: String,
    pub log_dir: Option<PathBuf>,
    pub notify: Option<NotifyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github_token: None,
            github_secret: None,
            base_dir: None,
            allowed_branches: vec![DEFAULT_ALLOWED_BRANCH.to_string()],
            api_url: DEFAULT_API_URL.to_string(),
            builder: DEFAULT_BUILDER.to_string(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            log_dir: None,
            notify: None,
        }
    }
}

/// Load and parse a TOML configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<FileConfig> {
    let path = path.as_ref();
    let config_str = fs::read_to_string(path).map_err(|e| {
        WebhookError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config: FileConfig = toml::from_str(&config_str)?;
    Ok(config)
}

/// Splits a comma-separated branch list, dropping empty entries.
pub fn parse_branch_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Builds the configuration from the process environment, reading the
    /// `GW_CONFIG` file first when it is set.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let file = match vars.get("GW_CONFIG") {
            Some(path) if !path.is_empty() => load_config(path)?,
            _ => FileConfig::default(),
        };
        Ok(Self::from_sources(file, &vars))
    }

    /// Layers environment values over file values over defaults.
    pub fn from_sources(file: FileConfig, vars: &HashMap<String, String>) -> Self {
        let var = |key: &str| vars.get(key).cloned();
        let defaults = Config::default();

        let allowed_branches = match var("GW_ALLOWED_BRANCHES") {
            Some(list) => parse_branch_list(&list),
            None => file.allowed_branches.unwrap_or(defaults.allowed_branches),
        };

        let notify = match (var("TELEGRAM_NOTIFY_TOKEN"), var("TELEGRAM_NOTIFY_CHAT_ID")) {
            (Some(token), Some(chat_id)) => Some(NotifyConfig { token, chat_id }),
            _ => None,
        };

        Self {
            github_token: var("GITHUB_TOKEN").or(file.github_token),
            github_secret: var("GITHUB_SECRET").or(file.github_secret),
            base_dir: var("GW_BASEDIR").map(PathBuf::from).or(file.base_dir),
            allowed_branches,
            api_url: var("GW_GITHUB_API_URL")
                .or(file.api_url)
                .unwrap_or(defaults.api_url),
            builder: var("GW_BUILDER").or(file.builder).unwrap_or(defaults.builder),
            bind_address: var("GW_BIND_ADDRESS")
                .or(file.bind_address)
                .unwrap_or(defaults.bind_address),
            log_dir: var("GW_LOG_DIR").map(PathBuf::from).or(file.log_dir),
            notify,
        }
    }

    /// Returns the shared secret when it is set and non-empty.
    pub fn secret(&self) -> Option<&str> {
        self.github_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Returns true if `branch` is on the allow-list.
    /// An empty branch (tag pushes) never matches.
    pub fn is_branch_allowed(&self, branch: &str) -> bool {
        !branch.is_empty() && self.allowed_branches.iter().any(|b| b == branch)
    }

    /// Resolves the directory under which `builds/` and `htdocs/` live.
    pub fn resolve_base_dir(&self) -> Result<PathBuf> {
        let base_dir = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        if !base_dir.is_absolute() {
            return Err(WebhookError::ConfigError(format!(
                "GW_BASEDIR must be absolute path, got '{}'",
                base_dir.display()
            )));
        }
        Ok(base_dir)
    }
}
