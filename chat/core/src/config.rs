//! TOML Configuration File Support
//!
//! Loads the client configuration from `~/.config/ai-chat/client.toml`,
//! the environment and command-line overrides.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `CHAT_API_URL` | `base_url` |
//! | `CHAT_ROUTE_PREFIX` | `route_prefix` |
//! | `CHAT_CONNECT_TIMEOUT_MS` | `connect_timeout` |
//! | `CHAT_POLL_INTERVAL_MS` | `poll_interval` |
//! | `CHAT_DEFAULT_MODEL` | `default_model` |
//! | `CHAT_USE_KNOWLEDGE` | `use_knowledge` |
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! base_url = "http://localhost:3000"
//! route_prefix = "/sdk"
//! connect_timeout_ms = 10000
//!
//! [chat]
//! default_model = "mistral"
//! use_knowledge = false
//! stream_buffer = 100
//!
//! [polling]
//! interval_ms = 5000
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default chat service address
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

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

/// Tracks where the configuration came from
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

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Chat service base URL
    pub base_url: Option<String>,

    /// Route family prefix (`""` or `"/sdk"`)
    pub route_prefix: Option<String>,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// `[chat]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatToml {
    /// Model recorded on new replies until the service reports another
    pub default_model: Option<String>,

    /// Ground replies in the knowledge base
    pub use_knowledge: Option<bool>,

    /// Capacity of each reply stream channel
    pub stream_buffer: Option<usize>,
}

/// `[polling]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingToml {
    /// Refresh period for the viewed conversation
    pub interval_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Server section
    pub server: ServerToml,

    /// Chat section
    pub chat: ChatToml,

    /// Polling section
    pub polling: PollingToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Chat service base URL, without trailing slash
    pub base_url: String,

    /// Route family prefix: empty, or starting with `/` and without trailing slash
    pub route_prefix: String,

    /// Connect timeout for every request; streamed bodies have no read timeout
    pub connect_timeout: Duration,

    /// Refresh period for the viewed conversation
    pub poll_interval: Duration,

    /// Model recorded on new replies
    pub default_model: Option<String>,

    /// Ground replies in the knowledge base
    pub use_knowledge: bool,

    /// Capacity of each reply stream channel
    pub stream_buffer: usize,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            route_prefix: String::new(),
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            default_model: None,
            use_knowledge: false,
            stream_buffer: 100,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Normalize URL and prefix, then check values are usable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a non-HTTP base URL, a
    /// zero poll interval or a zero stream buffer.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        self.route_prefix = normalize_prefix(&self.route_prefix);

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.stream_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "stream_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// `"sdk"`, `"/sdk/"` and `"/sdk"` all become `"/sdk"`; `"/"` becomes `""`
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    !(value.is_empty() || value == "0" || value == "false" || value == "no" || value == "off")
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/ai-chat/client.toml` or
/// `~/.config/ai-chat/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ai-chat").join("client.toml"))
}

/// Load configuration from the default file and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resulting values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with a custom environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
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
    config.validate()?;

    Ok(config)
}

fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    if let Some(ref url) = toml.server.base_url {
        config.base_url.clone_from(url);
    }
    if let Some(ref prefix) = toml.server.route_prefix {
        config.route_prefix.clone_from(prefix);
    }
    if let Some(ms) = toml.server.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }

    if toml.chat.default_model.is_some() {
        config.default_model.clone_from(&toml.chat.default_model);
    }
    if let Some(enabled) = toml.chat.use_knowledge {
        config.use_knowledge = enabled;
    }
    if let Some(buffer) = toml.chat.stream_buffer {
        config.stream_buffer = buffer;
    }

    if let Some(ms) = toml.polling.interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
}

fn apply_env_config<F>(config: &mut ClientConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env("CHAT_API_URL") {
        config.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(prefix) = env("CHAT_ROUTE_PREFIX") {
        config.route_prefix = prefix;
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env("CHAT_CONNECT_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.connect_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        } else {
            tracing::warn!(value = %timeout, "Ignoring invalid CHAT_CONNECT_TIMEOUT_MS");
        }
    }
    if let Some(interval) = env("CHAT_POLL_INTERVAL_MS") {
        if let Ok(ms) = interval.parse::<u64>() {
            config.poll_interval = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        } else {
            tracing::warn!(value = %interval, "Ignoring invalid CHAT_POLL_INTERVAL_MS");
        }
    }
    if let Some(model) = env("CHAT_DEFAULT_MODEL") {
        config.default_model = Some(model);
        config.source = ConfigSource::Env;
    }
    if let Some(enabled) = env("CHAT_USE_KNOWLEDGE") {
        config.use_knowledge = parse_flag(&enabled);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Base URL override
    pub base_url: Option<String>,

    /// Route prefix override
    pub route_prefix: Option<String>,

    /// Poll interval override (milliseconds)
    pub poll_interval_ms: Option<u64>,

    /// Default model override
    pub default_model: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL override
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set route prefix override
    #[must_use]
    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = Some(prefix.into());
        self
    }

    /// Set poll interval override
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = Some(ms);
        self
    }

    /// Set default model override
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override is invalid.
    pub fn apply(&self, config: &mut ClientConfig) -> Result<(), ConfigError> {
        if self.base_url.is_some()
            || self.route_prefix.is_some()
            || self.poll_interval_ms.is_some()
            || self.default_model.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.base_url {
            config.base_url.clone_from(url);
        }
        if let Some(ref prefix) = self.route_prefix {
            config.route_prefix.clone_from(prefix);
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ref model) = self.default_model {
            config.default_model = Some(model.clone());
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();

        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.route_prefix, "");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.stream_buffer, 100);
        assert!(!config.use_knowledge);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config =
            load_config_with_env(Some(PathBuf::from("/nonexistent/client.toml")), no_env).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.config_file_path.is_none());
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_toml(
            r#"
[server]
base_url = "http://chat.internal:8080/"
route_prefix = "sdk"
connect_timeout_ms = 2500

[chat]
default_model = "mistral"
use_knowledge = true
stream_buffer = 16

[polling]
interval_ms = 1000
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.base_url, "http://chat.internal:8080");
        assert_eq!(config.route_prefix, "/sdk");
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.default_model.as_deref(), Some("mistral"));
        assert!(config.use_knowledge);
        assert_eq!(config.stream_buffer, 16);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_toml("[polling]\ninterval_ms = 250\n");
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let file = write_toml("[server\nbase_url = ");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml("[server]\nbase_url = \"http://from-file:1\"\n");
        let env = env_from(&[
            ("CHAT_API_URL", "https://from-env"),
            ("CHAT_ROUTE_PREFIX", "/sdk/"),
            ("CHAT_POLL_INTERVAL_MS", "750"),
            ("CHAT_USE_KNOWLEDGE", "1"),
            ("CHAT_DEFAULT_MODEL", "qwen"),
        ]);

        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();

        assert_eq!(config.base_url, "https://from-env");
        assert_eq!(config.route_prefix, "/sdk");
        assert_eq!(config.poll_interval, Duration::from_millis(750));
        assert!(config.use_knowledge);
        assert_eq!(config.default_model.as_deref(), Some("qwen"));
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_unparseable_env_number_is_ignored() {
        let env = env_from(&[("CHAT_CONNECT_TIMEOUT_MS", "soon")]);
        let config = load_config_with_env(None, env).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_knowledge_flag_parsing() {
        for (value, expected) in [("true", true), ("yes", true), ("0", false), ("off", false)] {
            let env = env_from(&[("CHAT_USE_KNOWLEDGE", value)]);
            let config = load_config_with_env(None, env).unwrap();
            assert_eq!(config.use_knowledge, expected, "value {value:?}");
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let env = env_from(&[("CHAT_API_URL", "localhost:3000")]);
        assert!(matches!(
            load_config_with_env(None, env),
            Err(ConfigError::ValidationError(_))
        ));

        let env = env_from(&[("CHAT_POLL_INTERVAL_MS", "0")]);
        assert!(matches!(
            load_config_with_env(None, env),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = ClientConfig::default();
        ConfigOverrides::new()
            .with_base_url("http://override:9000/")
            .with_route_prefix("/")
            .with_poll_interval_ms(100)
            .with_default_model("llama")
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.base_url, "http://override:9000");
        assert_eq!(config.route_prefix, "");
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.default_model.as_deref(), Some("llama"));
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_empty_overrides_keep_source() {
        let mut config = ClientConfig::default();
        ConfigOverrides::new().apply(&mut config).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("ai-chat/client.toml"));
        }
    }
}
