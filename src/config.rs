//! Application configuration.
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! case_sensitive = true
//! body_limit = 1048576
//! read_timeout_ms = 5000
//! ```

use crate::router::path::RouteOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// `/Foo` and `/foo` are different routes when enabled.
    pub case_sensitive: bool,
    /// `/foo` and `/foo/` are different routes when enabled.
    pub strict_routing: bool,
    /// Percent-decode the request path before matching.
    pub unescape_path: bool,
    /// Value of the `Server` response header, omitted when empty.
    pub server_header: String,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
    /// Maximum number of concurrent connections.
    pub concurrency: usize,
    /// Maximum size of the request line plus headers.
    pub read_buffer_size: usize,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    /// Reject every non-GET request at the transport level.
    pub get_only: bool,
    pub disable_default_date: bool,
    pub disable_default_content_type: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            strict_routing: false,
            unescape_path: false,
            server_header: String::new(),
            body_limit: 4 * 1024 * 1024,
            concurrency: 256 * 1024,
            read_buffer_size: 4096,
            read_timeout_ms: None,
            write_timeout_ms: None,
            get_only: false,
            disable_default_date: false,
            disable_default_content_type: false,
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.body_limit == 0 {
            return Err(ConfigError::Validation("body_limit must be greater than 0".into()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Validation("concurrency must be greater than 0".into()));
        }
        if self.read_buffer_size < 64 {
            return Err(ConfigError::Validation(
                "read_buffer_size must be at least 64 bytes".into(),
            ));
        }
        Ok(())
    }

    pub fn route_options(&self) -> RouteOptions {
        RouteOptions {
            case_sensitive: self.case_sensitive,
            strict_routing: self.strict_routing,
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }
}
