//! Uploader configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/hugeup/config.toml`
//! - Windows: `%APPDATA%/hugeup/config.toml`
//!
//! Every field is optional. Command-line options override the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Upload API base URL.
    #[serde(default)]
    pub endpoint: String,

    /// Chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Retries per chunk.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay before each retry, in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Per-request timeout, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Extra fields merged into the init request.
    #[serde(default)]
    pub extra_fields: toml::Table,
}

fn default_chunk_size() -> u64 {
    hugeup_transfer::DEFAULT_CHUNK_SIZE
}

fn default_retries() -> u32 {
    hugeup_transfer::DEFAULT_RETRIES
}

fn default_retry_delay_secs() -> u64 {
    hugeup_transfer::DEFAULT_RETRY_DELAY.as_secs()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            chunk_size: default_chunk_size(),
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            timeout_secs: default_timeout_secs(),
            headers: HashMap::new(),
            extra_fields: toml::Table::new(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the platform default
    /// location. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_path(),
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("invalid {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Extra init fields as a JSON object.
    pub fn extra_fields_json(&self) -> anyhow::Result<Map<String, Value>> {
        match serde_json::to_value(&self.extra_fields)? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("extra_fields must be a table"),
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("hugeup").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("hugeup")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.endpoint.is_empty());
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.retries, 5);
        assert_eq!(config.retry_delay_secs, 5);
        assert_eq!(config.timeout_secs, 60);
        assert!(config.headers.is_empty());
        assert!(config.extra_fields.is_empty());
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"endpoint = "https://api.example.com/media""#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint, "https://api.example.com/media");
        assert_eq!(config.retries, 5);
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
    }

    #[test]
    fn config_full_toml() {
        let toml_str = r#"
            endpoint = "https://api.example.com/media"
            chunk_size = 1048576
            retries = 2
            retry_delay_secs = 1
            timeout_secs = 30

            [headers]
            Authorization = "Bearer abc"

            [extra_fields]
            channel_id = "161049754137003364"
            public = true
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.retries, 2);
        assert_eq!(config.headers["Authorization"], "Bearer abc");

        let extra = config.extra_fields_json().unwrap();
        assert_eq!(extra["channel_id"], "161049754137003364");
        assert_eq!(extra["public"], true);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config, Config::default());
        assert!(!path.exists());
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "retries = 9\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.retries, 9);
    }

    #[test]
    fn load_rejects_malformed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "retries = \"many\"\n").unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn config_path_not_empty() {
        assert!(config_path().to_string_lossy().contains("hugeup"));
    }
}
