use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    fn set(&mut self, value: T, source: ConfigSource) {
        self.value = value;
        self.source = source;
    }
}

/// Field client configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the local SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Base URL of the remote service (e.g. "https://agua.example.com/api")
    pub server_url: ConfigValue<Option<String>>,
    /// Bearer token forwarded to the remote service
    #[serde(skip_serializing)]
    pub api_token: ConfigValue<Option<String>>,
    /// Operator recorded on captured readings
    pub user: ConfigValue<Option<String>>,
    pub request_timeout_secs: ConfigValue<u64>,
    pub probe_interval_secs: ConfigValue<u64>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    server_url: Option<String>,
    api_token: Option<String>,
    user: Option<String>,
    request_timeout_secs: Option<u64>,
    probe_interval_secs: Option<u64>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::defaults();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
            config.apply_file(&path, file_config);
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn defaults() -> Self {
        Self {
            database_path: ConfigValue::new(
                Self::default_data_dir().join("acueducto.db"),
                ConfigSource::Default,
            ),
            server_url: ConfigValue::new(None, ConfigSource::Default),
            api_token: ConfigValue::new(None, ConfigSource::Default),
            user: ConfigValue::new(None, ConfigSource::Default),
            request_timeout_secs: ConfigValue::new(
                DEFAULT_REQUEST_TIMEOUT_SECS,
                ConfigSource::Default,
            ),
            probe_interval_secs: ConfigValue::new(
                DEFAULT_PROBE_INTERVAL_SECS,
                ConfigSource::Default,
            ),
            config_file: None,
        }
    }

    fn apply_file(&mut self, path: &std::path::Path, file: ConfigFile) {
        self.config_file = Some(path.to_path_buf());

        if let Some(db_path) = file.database_path {
            // Resolve relative paths against config file's directory
            let resolved_path = if db_path.is_relative() {
                path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
            } else {
                db_path
            };
            self.database_path.set(resolved_path, ConfigSource::File);
        }
        if let Some(url) = file.server_url {
            self.server_url.set(Some(url), ConfigSource::File);
        }
        if let Some(token) = file.api_token {
            self.api_token.set(Some(token), ConfigSource::File);
        }
        if let Some(user) = file.user {
            self.user.set(Some(user), ConfigSource::File);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout_secs.set(secs, ConfigSource::File);
        }
        if let Some(secs) = file.probe_interval_secs {
            self.probe_interval_secs.set(secs, ConfigSource::File);
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(db_path) = var("ACUEDUCTO_DATABASE_PATH") {
            self.database_path
                .set(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Some(url) = var("ACUEDUCTO_SERVER_URL") {
            self.server_url.set(Some(url), ConfigSource::Environment);
        }
        if let Some(token) = var("ACUEDUCTO_API_TOKEN") {
            self.api_token.set(Some(token), ConfigSource::Environment);
        }
        if let Some(user) = var("ACUEDUCTO_USER") {
            self.user.set(Some(user), ConfigSource::Environment);
        }
        if let Some(secs) = var("ACUEDUCTO_REQUEST_TIMEOUT_SECS") {
            let secs = parse_secs("ACUEDUCTO_REQUEST_TIMEOUT_SECS", &secs)?;
            self.request_timeout_secs.set(secs, ConfigSource::Environment);
        }
        if let Some(secs) = var("ACUEDUCTO_PROBE_INTERVAL_SECS") {
            let secs = parse_secs("ACUEDUCTO_PROBE_INTERVAL_SECS", &secs)?;
            self.probe_interval_secs.set(secs, ConfigSource::Environment);
        }
        Ok(())
    }

    /// Returns true if a remote service is configured
    pub fn is_remote_configured(&self) -> bool {
        self.server_url
            .value
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.value.max(1))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.value.max(1))
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/acueducto/
    /// - macOS: ~/Library/Application Support/acueducto/
    /// - Windows: %APPDATA%/acueducto/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("acueducto")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/acueducto/
    /// - macOS: ~/Library/Application Support/acueducto/
    /// - Windows: %APPDATA%/acueducto/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("acueducto")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv(key, value.to_string()))
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidEnv(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidEnv(key, value) => {
                write!(f, "Invalid value for {}: '{}'", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
