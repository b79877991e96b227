//! TOML Configuration File Support
//!
//! Centralized configuration loading for the gateway, supporting a TOML
//! configuration file at `~/.config/switchboard/switchboard.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (when applicable)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! The configuration file follows XDG Base Directory specification:
//! - `$XDG_CONFIG_HOME/switchboard/switchboard.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! provider_order = ["Ollama", "Gemini"]
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! outcome_log_capacity = 100
//! model_cache_ttl_secs = 3600
//!
//! [providers.gemini]
//! api_key = "..."
//! requests_per_minute = 15
//!
//! [providers.ollama]
//! base_url = "http://gpu-box:11434"
//! default_model = "llama3.2"
//! unlimited = true
//!
//! [providers.huggingface]
//! enabled = false
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::quota::Quota;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Provider Kinds
// =============================================================================

/// The backends the gateway knows how to talk to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Google Gemini
    Gemini,
    /// HuggingFace inference router
    HuggingFace,
    /// OpenRouter
    OpenRouter,
    /// Local Ollama server
    Ollama,
}

impl ProviderKind {
    /// Every kind, in default priority order
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Gemini,
        ProviderKind::HuggingFace,
        ProviderKind::OpenRouter,
        ProviderKind::Ollama,
    ];

    /// Provider name; also the quota key
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Gemini => "Gemini",
            Self::HuggingFace => "HuggingFace",
            Self::OpenRouter => "OpenRouter",
            Self::Ollama => "Ollama",
        }
    }

    /// Case-insensitive lookup by name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Model used for `"auto"` unless configured
    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.0-flash",
            Self::HuggingFace => "microsoft/Phi-3-mini-4k-instruct",
            Self::OpenRouter => "mistralai/mistral-7b-instruct:free",
            Self::Ollama => "llama2",
        }
    }

    /// Free-tier limits
    #[must_use]
    pub fn default_quota(self) -> Quota {
        match self {
            Self::Gemini => Quota::new(10, 1000),
            Self::HuggingFace => Quota::new(100, 1000),
            Self::OpenRouter => Quota::new(20, 200),
            Self::Ollama => Quota::new(999_999, 999_999),
        }
    }

    /// Environment variable holding the API key
    #[must_use]
    pub fn api_key_var(self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::HuggingFace => Some("HF_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::Ollama => None,
        }
    }

    /// Prefix of the `<PREFIX>_QUOTA_RPM` / `<PREFIX>_QUOTA_RPD` variables
    #[must_use]
    pub fn quota_var_prefix(self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some("GEMINI"),
            Self::HuggingFace => Some("HF"),
            Self::OpenRouter => Some("OPENROUTER"),
            Self::Ollama => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Address to bind
    pub host: Option<String>,

    /// Port to listen on
    pub port: Option<u16>,

    /// Outcome records kept for the dashboard
    pub outcome_log_capacity: Option<usize>,

    /// How long per-provider model lists are cached
    pub model_cache_ttl_secs: Option<u64>,
}

/// One `[providers.<name>]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    /// Register this provider at all
    pub enabled: Option<bool>,

    /// Model used for `"auto"`
    pub default_model: Option<String>,

    /// API root override
    pub base_url: Option<String>,

    /// API key
    pub api_key: Option<String>,

    /// Requests per minute
    pub requests_per_minute: Option<u64>,

    /// Requests per day
    pub requests_per_day: Option<u64>,

    /// Remove the quota entirely
    pub unlimited: Option<bool>,
}

/// Complete TOML configuration file structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardToml {
    /// Priority order by provider name
    pub provider_order: Option<Vec<String>>,

    /// Server settings
    pub server: ServerToml,

    /// Per-provider settings keyed by provider name
    pub providers: HashMap<String, ProviderToml>,
}

// =============================================================================
// Main Configuration Structs
// =============================================================================

/// HTTP front door settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSettings {
    /// Address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Outcome records kept for the dashboard
    pub outcome_log_capacity: usize,
    /// How long per-provider model lists are cached
    pub model_cache_ttl: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            outcome_log_capacity: crate::routing::outcome::DEFAULT_OUTCOME_CAPACITY,
            model_cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Resolved settings for one provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Which adapter to build
    pub kind: ProviderKind,
    /// Register this provider at all
    pub enabled: bool,
    /// Model used for `"auto"`
    pub default_model: String,
    /// API root override (Ollama: the server URL)
    pub base_url: Option<String>,
    /// API key, if any
    pub api_key: Option<String>,
    /// Limits; `None` means unlimited
    pub quota: Option<Quota>,
}

impl ProviderSettings {
    /// Built-in settings for `kind`
    #[must_use]
    pub fn defaults(kind: ProviderKind) -> Self {
        Self {
            kind,
            enabled: true,
            default_model: kind.default_model().to_string(),
            base_url: None,
            api_key: None,
            quota: Some(kind.default_quota()),
        }
    }
}

/// Full gateway configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Server settings
    pub server: ServerSettings,

    /// Every known provider, in priority order
    pub providers: Vec<ProviderSettings>,

    /// Path to the config file (if loaded from file)
    pub config_file_path: Option<PathBuf>,

    /// Source of the configuration (for debugging)
    source: ConfigSource,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            providers: ProviderKind::ALL
                .into_iter()
                .map(ProviderSettings::defaults)
                .collect(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl GatewayConfig {
    /// Create a new config with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the configuration source
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Settings of one provider
    #[must_use]
    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.kind == kind)
    }

    fn provider_mut(&mut self, kind: ProviderKind) -> Option<&mut ProviderSettings> {
        self.providers.iter_mut().find(|p| p.kind == kind)
    }

    /// Enabled providers, in priority order
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderSettings> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Reorder providers; names missing from `order` follow in their current order
    fn set_order(&mut self, order: &[String]) -> Result<(), ConfigError> {
        if order.is_empty() {
            return Err(ConfigError::ValidationError(
                "provider_order must not be empty".to_string(),
            ));
        }

        let mut kinds = Vec::with_capacity(order.len());
        for name in order {
            let kind = ProviderKind::from_name(name).ok_or_else(|| {
                ConfigError::ValidationError(format!("Unknown provider in provider_order: {name}"))
            })?;
            if kinds.contains(&kind) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate provider in provider_order: {name}"
                )));
            }
            kinds.push(kind);
        }

        let mut ordered = Vec::with_capacity(self.providers.len());
        for kind in &kinds {
            if let Some(pos) = self.providers.iter().position(|p| p.kind == *kind) {
                ordered.push(self.providers.remove(pos));
            }
        }
        ordered.append(&mut self.providers);
        self.providers = ordered;
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/switchboard/switchboard.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("switchboard").join("switchboard.toml"))
}

/// Load configuration from the default path, then the process environment
///
/// # Errors
///
/// Returns error if the config file exists but cannot be read, parsed or validated.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the process environment
///
/// A missing file is not an error; defaults are used.
///
/// # Errors
///
/// Returns error if the config file exists but cannot be read, parsed or validated.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Returns error if the config file exists but cannot be read, parsed or validated.
pub fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<GatewayConfig, ConfigError> {
    // Start with defaults
    let mut config = GatewayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: SwitchboardToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Environment overrides file values
    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut GatewayConfig, toml: &SwitchboardToml) -> Result<(), ConfigError> {
    if let Some(ref host) = toml.server.host {
        config.server.host = host.clone();
    }
    if let Some(port) = toml.server.port {
        config.server.port = port;
    }
    if let Some(capacity) = toml.server.outcome_log_capacity {
        config.server.outcome_log_capacity = capacity;
    }
    if let Some(ttl) = toml.server.model_cache_ttl_secs {
        config.server.model_cache_ttl = Duration::from_secs(ttl);
    }

    for (name, section) in &toml.providers {
        let kind = ProviderKind::from_name(name).ok_or_else(|| {
            ConfigError::ValidationError(format!("Unknown provider section: {name}"))
        })?;
        let Some(settings) = config.provider_mut(kind) else {
            continue;
        };

        if let Some(enabled) = section.enabled {
            settings.enabled = enabled;
        }
        if let Some(ref model) = section.default_model {
            settings.default_model = model.clone();
        }
        if section.base_url.is_some() {
            settings.base_url = section.base_url.clone();
        }
        if section.api_key.is_some() {
            settings.api_key = section.api_key.clone();
        }
        if section.unlimited == Some(true) {
            settings.quota = None;
        } else {
            let base = settings.quota.unwrap_or_else(|| kind.default_quota());
            if section.requests_per_minute.is_some() || section.requests_per_day.is_some() {
                settings.quota = Some(Quota::new(
                    section.requests_per_minute.unwrap_or(base.requests_per_minute),
                    section.requests_per_day.unwrap_or(base.requests_per_day),
                ));
            }
        }
    }

    if let Some(ref order) = toml.provider_order {
        config.set_order(order)?;
    }

    Ok(())
}

/// Apply environment variable overrides to the config
///
/// Unparseable numeric values are ignored.
fn apply_env_config(config: &mut GatewayConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(port) = env("PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
        config.server.port = port;
        config.source = ConfigSource::Env;
    }

    let mut touched = false;
    for settings in &mut config.providers {
        let kind = settings.kind;

        if let Some(key) = kind.api_key_var().and_then(&env) {
            settings.api_key = Some(key);
            touched = true;
        }

        if let Some(prefix) = kind.quota_var_prefix() {
            let rpm = env(&format!("{prefix}_QUOTA_RPM")).and_then(|v| v.trim().parse::<u64>().ok());
            let rpd = env(&format!("{prefix}_QUOTA_RPD")).and_then(|v| v.trim().parse::<u64>().ok());
            if rpm.is_some() || rpd.is_some() {
                let base = settings.quota.unwrap_or_else(|| kind.default_quota());
                settings.quota = Some(Quota::new(
                    rpm.unwrap_or(base.requests_per_minute),
                    rpd.unwrap_or(base.requests_per_day),
                ));
                touched = true;
            }
        }
    }

    // Ollama location
    let host = env("OLLAMA_HOST").filter(|h| !h.trim().is_empty());
    let port = env("OLLAMA_PORT").and_then(|v| v.trim().parse::<u16>().ok());
    if host.is_some() || port.is_some() {
        let host = host.unwrap_or_else(|| "localhost".to_string());
        let port = port.unwrap_or(11434);
        let base_url = if host.contains("://") {
            format!("{}:{port}", host.trim_end_matches('/'))
        } else {
            format!("http://{host}:{port}")
        };
        if let Some(ollama) = config.provider_mut(ProviderKind::Ollama) {
            ollama.base_url = Some(base_url);
            touched = true;
        }
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// CLI overrides that can be applied on top of file/env config
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Override bind address
    pub host: Option<String>,

    /// Override listen port
    pub port: Option<u16>,
}

impl ConfigOverrides {
    /// Create empty overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bind address override
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Apply overrides to a config
    pub fn apply(&self, config: &mut GatewayConfig) {
        if self.host.is_some() || self.port.is_some() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
