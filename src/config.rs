//! Engine configuration, persisted as TOML.
//!
//! Everything the engine needs from its environment is injected through
//! [`SyncConfig`]; nothing is read from process-wide settings.
//!
//! ```toml
//! [endpoint]
//! url = "http://localhost:3030/ric"
//! username = "admin"
//! password = "secret"
//! query_timeout_secs = 30
//! ask_timeout_secs = 10
//!
//! [mapping]
//! base_uri = "https://archives.example.org/ric/"
//!
//! [ledger]
//! data_dir = "/var/lib/ric-sync"
//! triggered_by = "scheduler"
//! ```

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read sync config: {path}")]
    #[diagnostic(
        code(ric::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse sync config: {path}: {message}")]
    #[diagnostic(
        code(ric::config::parse),
        help("Check the TOML syntax and the section names ([endpoint], [mapping], [ledger]).")
    )]
    Parse { path: String, message: String },

    #[error("invalid sync config: {message}")]
    #[diagnostic(
        code(ric::config::invalid),
        help("Timeouts must be at least one second and the endpoint URL must be http(s).")
    )]
    Invalid { message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Connection settings for the SPARQL endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Dataset URL; `/query` and `/update` are appended.
    #[serde(default = "default_url")]
    pub url: String,
    /// Basic-auth user. No `Authorization` header is sent when absent.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Timeout for SELECT and update requests.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Timeout for ASK requests.
    #[serde(default = "default_ask_timeout_secs")]
    pub ask_timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:3030/ric".into()
}
fn default_query_timeout_secs() -> u64 {
    30
}
fn default_ask_timeout_secs() -> u64 {
    10
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: None,
            password: None,
            query_timeout_secs: default_query_timeout_secs(),
            ask_timeout_secs: default_ask_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("ask_timeout_secs", &self.ask_timeout_secs)
            .finish()
    }
}

/// Linked-data namespace settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default = "default_base_uri")]
    pub base_uri: String,
}

fn default_base_uri() -> String {
    "https://archives.example.org/ric/".into()
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            base_uri: default_base_uri(),
        }
    }
}

/// Where the sync ledger lives and how its entries are attributed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Directory for the ledger database. In-memory when absent.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Recorded as `triggered_by` on every log entry.
    #[serde(default = "default_triggered_by")]
    pub triggered_by: String,
}

fn default_triggered_by() -> String {
    "system".into()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            triggered_by: default_triggered_by(),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl SyncConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse and validate TOML text. `origin` names the source in errors.
    pub fn parse(content: &str, origin: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: format!("failed to serialize config: {e}"),
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let url = &self.endpoint.url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                message: format!("endpoint url \"{url}\" is not http(s)"),
            });
        }
        self.validate_timeouts()
    }

    /// The checks that hold for any transport. `endpoint.url` is only read
    /// by the HTTP transport and is not looked at here.
    pub fn validate_timeouts(&self) -> ConfigResult<()> {
        if self.endpoint.query_timeout_secs == 0 || self.endpoint.ask_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "timeouts must be at least one second".into(),
            });
        }
        Ok(())
    }
}
