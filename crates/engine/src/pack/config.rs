//! Archive configuration via `sqlpack.toml`
//!
//! Every setting has a default, so an empty file (or no file at all) gives
//! the stock behavior: 4096-byte chunks and retry-until-clear on contention.

use serde::{Deserialize, Serialize};
use sqlpack_core::{PackError, PackResult, DEFAULT_CHUNK_SIZE};
use sqlpack_storage::RetryConfig;
use std::path::Path;
use std::time::Duration;

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "sqlpack.toml";

/// Archive configuration loaded from `sqlpack.toml`.
///
/// # Example
///
/// ```toml
/// chunk_size = 4096
/// busy_timeout_ms = 0
///
/// [retry]
/// base_delay_ms = 0
/// max_delay_ms = 50
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackConfig {
    /// Chunk size for streaming import/export and blob-stream buffers.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Backend busy handler timeout. `0` hands every busy signal straight to
    /// the retry driver.
    #[serde(default)]
    pub busy_timeout_ms: u64,
    /// Busy-retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            busy_timeout_ms: 0,
            retry: RetryConfig::default(),
        }
    }
}

impl PackConfig {
    /// Check values that deserialize fine but cannot be used.
    pub fn validate(&self) -> PackResult<()> {
        if self.chunk_size == 0 {
            return Err(PackError::config("chunk_size must be greater than zero"));
        }
        Ok(())
    }

    /// Set the streaming chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Backend busy timeout as a duration
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# sqlpack archive configuration
#
# Chunk size in bytes for streaming import/export and blob stream buffers.
chunk_size = 4096

# Backend busy timeout in milliseconds. 0 surfaces lock contention to the
# retry driver immediately.
busy_timeout_ms = 0

[retry]
# Maximum retries on a busy backend. Leave unset to retry until the lock clears.
# max_retries = 100
# Exponential backoff between retries; 0 retries immediately.
base_delay_ms = 0
max_delay_ms = 50
"#
    }

    /// Parse and validate config text.
    pub fn from_toml_str(content: &str) -> PackResult<Self> {
        let config: PackConfig = toml::from_str(content)
            .map_err(|e| PackError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> PackResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PackError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            PackError::Config(msg) => {
                PackError::config(format!("{} (in '{}')", msg, path.display()))
            }
            other => other,
        })
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> PackResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PackError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            PackError::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
