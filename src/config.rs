//! Configuration for dispatcher and processor instances
//!
//! One TOML file can describe either role (or both, for single-host setups).
//! Sections are validated on load; role-specific lookups fail with a
//! configuration error when the section for that role is absent.

use crate::observability::logging::LogCategory;
use crate::protocol::messages::{MarketId, ReportFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub logging: LoggingSection,
    pub dispatcher: Option<DispatcherSection>,
    pub processor: Option<ProcessorSection>,
}

/// Logging section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// Categories whose events are suppressed
    #[serde(default)]
    pub excluded_categories: BTreeSet<LogCategory>,
}

/// Dispatcher section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatcherSection {
    /// Address the dispatcher HTTP surface binds to
    pub bind_address: SocketAddr,
    /// Timeout for calls forwarded to processors
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retries for forwarded calls that fail at the transport level
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
}

impl DispatcherSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Processor section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorSection {
    /// Unique key this processor registers under (must match [a-zA-Z0-9._-]+)
    pub server_key: String,
    /// URI the dispatcher uses to reach this processor
    pub public_uri: String,
    /// Address the processor HTTP surface binds to
    pub bind_address: SocketAddr,
    /// Dispatcher base URI for self-registration
    pub dispatcher_url: String,
    /// Maximum number of filings processed concurrently
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Seconds between intake polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    pub folders: FolderSection,
    pub rules: RulesSection,
    #[serde(default)]
    pub export: ExportSection,
    /// Markets known to the built-in market catalog
    #[serde(default)]
    pub markets: Vec<MarketEntry>,
    /// Remove the registration on a graceful shutdown. Unregistering leaves
    /// every owned market unassigned; keep the registration across planned
    /// restarts so the markets are restored on start.
    #[serde(default = "default_unregister_on_shutdown")]
    pub unregister_on_shutdown: bool,
}

impl ProcessorSection {
    /// Whether a graceful shutdown should unregister, given the operator's
    /// request to keep the registration for this run
    pub fn should_unregister_on_shutdown(&self, keep_registration: bool) -> bool {
        self.unregister_on_shutdown && !keep_registration
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Folders a processor depends on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FolderSection {
    /// Filings arrive here, one subfolder per market
    pub intake: PathBuf,
    /// Staged filings are moved here before rule processing
    pub processing: PathBuf,
    /// Exported report artifacts are written here
    pub reports: PathBuf,
}

/// Rule set used for every filing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RulesSection {
    /// Directory holding rule definitions and the `<name>.rul` manifest
    pub directory: PathBuf,
    /// Repository name
    #[serde(default = "default_rule_set_name")]
    pub name: String,
}

/// Defaults for reports written after a filing passes its rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportSection {
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub format: ReportFormat,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            lang: default_lang(),
            format: ReportFormat::default(),
        }
    }
}

/// One market served by this processor's catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketEntry {
    pub id: MarketId,
    pub name: String,
    /// Base taxonomy loaded when the market is assigned
    #[serde(default)]
    pub taxonomy_path: Option<PathBuf>,
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_retry_attempts() -> usize {
    2
}

fn default_unregister_on_shutdown() -> bool {
    true
}

fn default_pool_size() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    30
}

fn default_rule_set_name() -> String {
    "default".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid server key format: {0}")]
    InvalidServerKey(String),
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("Missing [{0}] section")]
    MissingSection(&'static str),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoordinatorConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CoordinatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field formats and cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.is_none() && self.processor.is_none() {
            return Err(ConfigError::InvalidConfig(
                "configuration must contain a [dispatcher] or [processor] section".to_string(),
            ));
        }

        if let Some(processor) = &self.processor {
            validate_server_key(&processor.server_key)?;
            validate_uri(&processor.public_uri)?;
            validate_uri(&processor.dispatcher_url)?;

            if processor.pool_size == 0 {
                return Err(ConfigError::InvalidConfig(
                    "processor.pool_size must be at least 1".to_string(),
                ));
            }
            if processor.poll_interval_secs == 0 {
                return Err(ConfigError::InvalidConfig(
                    "processor.poll_interval_secs must be at least 1".to_string(),
                ));
            }
            if processor.rules.name.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "processor.rules.name must not be empty".to_string(),
                ));
            }

            let mut seen = BTreeSet::new();
            for market in &processor.markets {
                if !seen.insert(market.id) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "market {} is listed more than once",
                        market.id
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn require_dispatcher(&self) -> Result<&DispatcherSection, ConfigError> {
        self.dispatcher
            .as_ref()
            .ok_or(ConfigError::MissingSection("dispatcher"))
    }

    pub fn require_processor(&self) -> Result<&ProcessorSection, ConfigError> {
        self.processor
            .as_ref()
            .ok_or(ConfigError::MissingSection("processor"))
    }
}

/// Validate a processor server key: [a-zA-Z0-9._-]+
pub fn validate_server_key(server_key: &str) -> Result<(), ConfigError> {
    let valid_chars = server_key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if server_key.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidServerKey(format!(
            "Server key '{server_key}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

/// Validate that a URI is an absolute http(s) URL
pub fn validate_uri(uri: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(uri).map_err(|e| ConfigError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidUri {
            uri: uri.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}
