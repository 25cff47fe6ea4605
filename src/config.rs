//! Configuration
//!
//! Settings are read from `config.json` in the project config directory
//! (`~/.config/moodlenav/` on Linux) and then overridden by command-line flags
//! and environment variables. Every field has a default, so a missing file or a
//! partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::data::html::HtmlSelectors;
use crate::data::RetryPolicy;

/// Errors that can occur when loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("No portal URL configured; pass --base-url or set base_url in {0}")]
    MissingBaseUrl(String),
}

/// How the course list is obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Moodle AJAX web service (needs the sesskey)
    #[default]
    Api,
    /// Scrape the "My courses" page (needs the session cookie)
    Html,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Portal root, e.g. `https://courseweb.example.edu`
    pub base_url: Option<String>,
    pub source: SourceKind,
    /// Course cache time-to-live in seconds
    pub ttl_secs: u64,
    /// Attempts per refresh, first try included
    pub max_attempts: u32,
    /// Backoff unit in milliseconds
    pub backoff_unit_ms: u64,
    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,
    pub html: HtmlSelectors,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            source: SourceKind::default(),
            ttl_secs: 60 * 60,
            max_attempts: 3,
            backoff_unit_ms: 1000,
            request_timeout_secs: 30,
            html: HtmlSelectors::default(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "moodlenav").map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Loads the config from `path`, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads from the default location, or defaults if there is none
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_unit_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The configured portal URL, or an error naming where to set it
    pub fn require_base_url(&self) -> Result<&str, ConfigError> {
        self.base_url.as_deref().ok_or_else(|| {
            let location = Self::default_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "config.json".to_string());
            ConfigError::MissingBaseUrl(location)
        })
    }
}
