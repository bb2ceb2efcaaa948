//! # Configuration Management
//!
//! Configuration for the mirroring feed server:
//!
//! - [`ServerConfig`]: bind address and the scheme used in generated URLs
//! - [`StorageConfig`]: where packages are kept
//! - [`MirrorConfig`]: whether and from where packages are mirrored
//! - [`SearchConfig`]: page size limits for search
//!
//! ## Loading Configuration
//!
//! ```rust,no_run
//! # use mirror_server::config::Config;
//! // Load from file with fallback to defaults
//! let config = Config::load_or_default("config.json")?;
//!
//! // Load from file (fails if file doesn't exist)
//! let config = Config::load("config.json")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The `mirror` and `search` sections may be omitted; their defaults match
//! the bundled `config.json`.

use crate::error::AppResult;
use crate::upstream::UpstreamConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Default host/IP address to bind to (e.g., "0.0.0.0" or "localhost")
    pub default_host: String,
    pub default_port: u16,
    /// URL scheme ("http" or "https")
    pub scheme: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all package storage
    pub default_data_dir: PathBuf,
}

/// Upstream mirroring settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// When false the server only serves what it already has.
    pub enabled: bool,
    /// URL of the upstream feed's v3 service index
    pub package_source: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_take: usize,
    pub max_take: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_host: "0.0.0.0".to_string(),
            default_port: 5000,
            scheme: "http".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            package_source: "https://api.nuget.org/v3/index.json".to_string(),
            timeout_secs: 600,
            user_agent: "mirror-server".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_take: 20,
            max_take: 1000,
        }
    }
}

impl MirrorConfig {
    /// Connection settings for the upstream client.
    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            package_source: self.package_source.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: format!("{}/{}", self.user_agent, env!("CARGO_PKG_VERSION")),
        }
    }
}

impl SearchConfig {
    /// Requested page size, or the default, capped at `max_take`.
    pub fn clamp_take(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_take).min(self.max_take)
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse as a
    /// configuration document.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config_str = fs::read_to_string(path)?;
        let config = serde_json::from_str(&config_str)?;
        Ok(config)
    }

    /// Load configuration from file with fallback to defaults.
    ///
    /// A missing file yields [`Config::default`]; a file that exists but
    /// cannot be parsed is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Base URL clients use to reach this server.
    pub fn public_url(&self, host: &str, port: u16) -> String {
        let host = if host == "0.0.0.0" { "localhost" } else { host };
        format!("{}://{}:{}", self.server.scheme, host, port)
    }
}
