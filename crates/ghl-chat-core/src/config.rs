//! Client configuration.
//!
//! Loaded from a JSON file with per-field defaults, then overridden by
//! `GHL_CHAT_*` environment variables.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::ReconnectPolicy;

/// Default chat endpoint of the dashboard backend.
pub const DEFAULT_URL: &str = "ws://localhost:8000/ws/chat";

/// Default conversation the client posts to.
pub const DEFAULT_CONVERSATION_ID: &str = "default";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
    #[error("Endpoint URL must use ws:// or wss://: {0}")]
    Scheme(String),
}

/// Chat client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Duplex endpoint, fixed for the lifetime of a client.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_conversation_id")]
    pub conversation_id: String,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Whether outbound requests may carry file attachments.
    #[serde(default)]
    pub attachments: bool,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_conversation_id() -> String {
    DEFAULT_CONVERSATION_ID.to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            conversation_id: default_conversation_id(),
            reconnect: ReconnectPolicy::default(),
            attachments: false,
        }
    }
}

impl ChatConfig {
    /// Per-user config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ghl-chat").join("config.json"))
    }

    /// Load configuration.
    ///
    /// Reads `path` if given, otherwise [`Self::default_path`] when it exists,
    /// otherwise starts from defaults. Environment overrides are applied last.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, or an override is
    /// malformed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.is_file()),
        };

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not valid config JSON.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `GHL_CHAT_*` overrides from `lookup`.
    ///
    /// # Errors
    /// Returns error if a numeric or boolean override does not parse.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("GHL_CHAT_URL") {
            self.url = url;
        }
        if let Some(id) = lookup("GHL_CHAT_CONVERSATION_ID") {
            self.conversation_id = id;
        }
        if let Some(value) = lookup("GHL_CHAT_MAX_ATTEMPTS") {
            self.reconnect.max_attempts = value.parse().map_err(|_| ConfigError::Env {
                var: "GHL_CHAT_MAX_ATTEMPTS",
                value,
            })?;
        }
        if let Some(value) = lookup("GHL_CHAT_BASE_DELAY_MS") {
            let ms: u64 = value.parse().map_err(|_| ConfigError::Env {
                var: "GHL_CHAT_BASE_DELAY_MS",
                value,
            })?;
            self.reconnect.base_delay = Duration::from_millis(ms);
        }
        if let Some(value) = lookup("GHL_CHAT_ATTACHMENTS") {
            self.attachments = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Env {
                        var: "GHL_CHAT_ATTACHMENTS",
                        value,
                    });
                }
            };
        }
        Ok(())
    }

    /// Check the endpoint scheme.
    ///
    /// # Errors
    /// Returns error if the URL is not a WebSocket URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.starts_with("ws://") || self.url.starts_with("wss://") {
            Ok(())
        } else {
            Err(ConfigError::Scheme(self.url.clone()))
        }
    }
}
