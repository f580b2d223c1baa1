//! Configuration Management
//!
//! Persistent connection settings for the client.

use crate::client::{Manager, TransportConfig, DEFAULT_BASE_URL};
use crate::logging::LogLevel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the stored token
pub const TOKEN_ENV: &str = "BCC_TOKEN";

/// Environment variable overriding the stored base URL
pub const BASE_URL_ENV: &str = "BCC_BASE_URL";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Control plane endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    /// Bearer token
    #[serde(default)]
    pub token: Option<String>,
    /// CA certificate, as a path or inline PEM
    #[serde(default)]
    pub ca_cert: Option<String>,
    #[serde(default)]
    pub client_cert: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("bcc").join("config.json"))
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from `path`. Missing or unreadable files yield defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Effective base URL (env > config > default)
    pub fn effective_base_url(&self) -> String {
        std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// Effective token (env > config)
    pub fn effective_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.token.clone())
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            ca_cert: self.ca_cert.clone(),
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.clone(),
            insecure: self.insecure,
            ..TransportConfig::default()
        }
    }

    /// Build a manager from the effective settings
    pub fn manager(&self) -> Result<Manager> {
        let token = self
            .effective_token()
            .with_context(|| format!("No API token configured. Set {} or add it to the config file", TOKEN_ENV))?;

        let manager = Manager::new(token, &self.transport())
            .context("Failed to create HTTP client")?
            .with_base_url(self.effective_base_url());

        Ok(manager)
    }
}
