//! TOML Configuration File Support
//!
//! Configuration for the relay lives in
//! `$XDG_CONFIG_HOME/thinking-relay/relay.toml` (typically
//! `~/.config/thinking-relay/relay.toml`).
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Environment Variables
//!
//! | Variable                  | Setting                      |
//! |---------------------------|------------------------------|
//! | `DASHSCOPE_API_KEY`       | upstream API key (required)  |
//! | `DASHSCOPE_BASE_URL`      | upstream base URL            |
//! | `AI_MODEL`                | model identifier             |
//! | `HTTP_PORT`               | listen port                  |
//! | `RELAY_BIND_ADDRESS`      | listen address               |
//! | `RELAY_OUTBOUND_QUEUE`    | per-connection queue slots   |
//! | `RELAY_REASONING_DEFAULT` | reasoning when no directive  |
//!
//! # Example Configuration
//!
//! ```toml
//! [upstream]
//! base_url = "https://dashscope-intl.aliyuncs.com/compatible-mode/v1"
//! model = "qwen-plus"
//! request_timeout_secs = 60
//!
//! [sampling]
//! temperature = 0.75
//! top_p = 0.92
//! top_k = 45
//! reasoning_default = true
//!
//! [server]
//! bind_address = "0.0.0.0"
//! port = 8080
//! outbound_queue_capacity = 256
//! max_message_bytes = 65536
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendConfig;
use crate::hub::DEFAULT_QUEUE_CAPACITY;
use crate::params::ModelParams;

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
// TOML Configuration Structures
// =============================================================================

/// Upstream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamToml {
    /// Base URL of the OpenAI-compatible endpoint
    pub base_url: Option<String>,

    /// Model identifier
    pub model: Option<String>,

    /// API key; prefer the environment variable
    pub api_key: Option<String>,

    /// Whole-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Sampling section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingToml {
    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Nucleus sampling threshold
    pub top_p: Option<f32>,

    /// Top-k cutoff
    pub top_k: Option<u32>,

    /// Reasoning mode when a message carries no directive
    pub reasoning_default: Option<bool>,
}

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address
    pub bind_address: Option<String>,

    /// Listen port
    pub port: Option<u16>,

    /// Outbound queue slots per connection
    pub outbound_queue_capacity: Option<usize>,

    /// Largest accepted inbound message in bytes
    pub max_message_bytes: Option<usize>,
}

/// Root TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Upstream model service
    pub upstream: UpstreamToml,

    /// Sampling defaults
    pub sampling: SamplingToml,

    /// HTTP/WebSocket server
    pub server: ServerToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved relay configuration
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Upstream connection settings
    pub upstream: BackendConfig,

    /// Initial sampling parameters
    pub params: ModelParams,

    /// Listen address
    pub bind_address: String,

    /// Listen port
    pub port: u16,

    /// Outbound queue slots per connection
    pub outbound_queue_capacity: usize,

    /// Largest accepted inbound message in bytes
    pub max_message_bytes: usize,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream: BackendConfig::default(),
            params: ModelParams::default(),
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            outbound_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_message_bytes: 65536,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Get the primary source of this configuration
    #[must_use]
    pub const fn source(&self) -> ConfigSource {
        self.source
    }

    /// `address:port` to listen on
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Check the resolved values before starting
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.api_key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "DASHSCOPE_API_KEY is required".to_string(),
            ));
        }
        if self.upstream.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "upstream base_url must not be empty".to_string(),
            ));
        }
        if self.upstream.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "upstream model must not be empty".to_string(),
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "outbound_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_message_bytes must be at least 1".to_string(),
            ));
        }
        self.params
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/thinking-relay/relay.toml` or
/// `~/.config/thinking-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("thinking-relay").join("relay.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment variables through `env`
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
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

    apply_env_config(&mut config, env);

    Ok(config)
}

fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) {
    if let Some(ref url) = toml.upstream.base_url {
        config.upstream.base_url.clone_from(url);
    }
    if let Some(ref model) = toml.upstream.model {
        config.upstream.model.clone_from(model);
    }
    if let Some(ref key) = toml.upstream.api_key {
        config.upstream.api_key.clone_from(key);
    }
    if let Some(secs) = toml.upstream.request_timeout_secs {
        config.upstream.request_timeout = Duration::from_secs(secs);
    }

    if let Some(temperature) = toml.sampling.temperature {
        config.params.temperature = temperature;
    }
    if let Some(top_p) = toml.sampling.top_p {
        config.params.top_p = top_p;
    }
    if let Some(top_k) = toml.sampling.top_k {
        config.params.top_k = top_k;
    }
    if let Some(enabled) = toml.sampling.reasoning_default {
        config.params.reasoning_default = enabled;
    }

    if let Some(ref address) = toml.server.bind_address {
        config.bind_address.clone_from(address);
    }
    if let Some(port) = toml.server.port {
        config.port = port;
    }
    if let Some(capacity) = toml.server.outbound_queue_capacity {
        config.outbound_queue_capacity = capacity;
    }
    if let Some(bytes) = toml.server.max_message_bytes {
        config.max_message_bytes = bytes;
    }
}

fn apply_env_config<F>(config: &mut RelayConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = env("DASHSCOPE_API_KEY") {
        config.upstream.api_key = key;
        config.source = ConfigSource::Env;
    }
    if let Some(url) = env("DASHSCOPE_BASE_URL").filter(|v| !v.is_empty()) {
        config.upstream.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("AI_MODEL").filter(|v| !v.is_empty()) {
        config.upstream.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("HTTP_PORT") {
        match port.parse::<u16>() {
            Ok(port) => {
                config.port = port;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(value = %port, "Ignoring invalid HTTP_PORT"),
        }
    }
    if let Some(address) = env("RELAY_BIND_ADDRESS").filter(|v| !v.is_empty()) {
        config.bind_address = address;
        config.source = ConfigSource::Env;
    }
    if let Some(capacity) = env("RELAY_OUTBOUND_QUEUE") {
        if let Ok(n) = capacity.parse::<usize>() {
            config.outbound_queue_capacity = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(enabled) = env("RELAY_REASONING_DEFAULT") {
        config.params.reasoning_default = enabled != "0" && enabled.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Command-line overrides, applied last
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen port override
    pub port: Option<u16>,

    /// Listen address override
    pub bind_address: Option<String>,

    /// Model override
    pub model: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set bind address override
    #[must_use]
    pub fn with_bind_address(mut self, address: String) -> Self {
        self.bind_address = Some(address);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RelayConfig) {
        if self.port.is_some() || self.bind_address.is_some() || self.model.is_some() {
            config.source = ConfigSource::Cli;
        }

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ref address) = self.bind_address {
            config.bind_address.clone_from(address);
        }
        if let Some(ref model) = self.model {
            config.upstream.model.clone_from(model);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn no_env() -> impl Fn(&str) -> Option<String> {
        |_| None
    }

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();

        assert_eq!(
            config.upstream.base_url,
            "https://dashscope-intl.aliyuncs.com/compatible-mode/v1"
        );
        assert_eq!(config.upstream.model, "qwen-plus");
        assert_eq!(config.upstream.request_timeout, Duration::from_secs(60));
        assert_eq!(config.port, 8080);
        assert_eq!(config.outbound_queue_capacity, 256);
        assert_eq!(config.params, ModelParams::default());
        assert_eq!(config.listen_address(), "0.0.0.0:8080");
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("thinking-relay/relay.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let file = toml_file(
            r#"
[upstream]
base_url = "http://localhost:9000/v1"
model = "qwen3-32b"
request_timeout_secs = 15

[sampling]
temperature = 0.3
top_p = 0.8
top_k = 20
reasoning_default = false

[server]
bind_address = "127.0.0.1"
port = 9090
outbound_queue_capacity = 32
max_message_bytes = 1024
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env()).unwrap();

        assert_eq!(config.upstream.base_url, "http://localhost:9000/v1");
        assert_eq!(config.upstream.model, "qwen3-32b");
        assert_eq!(config.upstream.request_timeout, Duration::from_secs(15));
        assert!((config.params.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.params.top_k, 20);
        assert!(!config.params.reasoning_default);
        assert_eq!(config.listen_address(), "127.0.0.1:9090");
        assert_eq!(config.outbound_queue_capacity, 32);
        assert_eq!(config.max_message_bytes, 1024);
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = toml_file("[server]\nport = 3000\n");
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env()).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.upstream.model, "qwen-plus");
        assert_eq!(config.params, ModelParams::default());
    }

    #[test]
    fn test_missing_file_graceful() {
        let config = load_config_with_env(
            Some(PathBuf::from("/nonexistent/thinking-relay/relay.toml")),
            no_env(),
        )
        .unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = toml_file("[server\nport = \"not a number\"\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env());
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = toml_file("[upstream]\nmodel = \"file-model\"\n\n[server]\nport = 3000\n");
        let env = env_from(&[
            ("DASHSCOPE_API_KEY", "sk-env"),
            ("AI_MODEL", "env-model"),
            ("HTTP_PORT", "4000"),
            ("RELAY_OUTBOUND_QUEUE", "8"),
            ("RELAY_REASONING_DEFAULT", "false"),
        ]);

        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();

        assert_eq!(config.upstream.api_key, "sk-env");
        assert_eq!(config.upstream.model, "env-model");
        assert_eq!(config.port, 4000);
        assert_eq!(config.outbound_queue_capacity, 8);
        assert!(!config.params.reasoning_default);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_invalid_env_port_ignored() {
        let config = load_config_with_env(None, env_from(&[("HTTP_PORT", "eighty")])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = load_config_with_env(
            None,
            env_from(&[("AI_MODEL", "env-model"), ("HTTP_PORT", "4000")]),
        )
        .unwrap();

        ConfigOverrides::new()
            .with_port(5000)
            .with_model("cli-model".to_string())
            .with_bind_address("127.0.0.1".to_string())
            .apply(&mut config);

        assert_eq!(config.port, 5000);
        assert_eq!(config.upstream.model, "cli-model");
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = RelayConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_validate() {
        let mut config = RelayConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("DASHSCOPE_API_KEY")
        ));

        config.upstream.api_key = "sk-test".to_string();
        assert!(config.validate().is_ok());

        config.outbound_queue_capacity = 0;
        assert!(config.validate().is_err());
        config.outbound_queue_capacity = 1;

        config.params.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
