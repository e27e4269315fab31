//! Server configuration loading from file and environment variables.

use mindfulflow_calendar::CalendarConfig;
use mindfulflow_genai::GenAiConfig;
use mindfulflow_voice::VoiceConfig;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub genai: GenAiConfig,

    #[serde(default)]
    pub calendar: CalendarConfig,

    #[serde(default)]
    pub voice: VoiceConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Relational store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. Empty runs in local-only mode.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

impl DatabaseConfig {
    pub fn is_configured(&self) -> bool {
        !self.path.trim().is_empty()
    }
}

/// Local JSON store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the credential cache and local snapshots.
    #[serde(default = "default_local_dir")]
    pub local_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "mindfulflow_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

/// Session token settings.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for session tokens. Empty generates a random secret at
    /// startup, which invalidates tokens on restart.
    #[serde(default)]
    pub session_secret: String,

    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("session_secret", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "mindfulflow.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_local_dir() -> String {
    "mindfulflow-data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_token_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_dir: default_local_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: String::new(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file and the process environment.
///
/// Environment variable overrides:
/// - `MINDFULFLOW_HOST`, `MINDFULFLOW_PORT`
/// - `MINDFULFLOW_DB_PATH` (empty for local-only mode)
/// - `MINDFULFLOW_LOCAL_DIR`
/// - `MINDFULFLOW_LOG_LEVEL`, `MINDFULFLOW_LOG_JSON` ("true" or "1")
/// - `MINDFULFLOW_GENAI_API_KEY`, falling back to `GEMINI_API_KEY`
/// - `MINDFULFLOW_SESSION_SECRET`
///
/// The voice session uses the text-generation key unless `voice.api_key` is
/// set.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(host) = env("MINDFULFLOW_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = env("MINDFULFLOW_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = env("MINDFULFLOW_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(dir) = env("MINDFULFLOW_LOCAL_DIR") {
        config.storage.local_dir = dir;
    }
    if let Some(level) = env("MINDFULFLOW_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("MINDFULFLOW_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = env("MINDFULFLOW_GENAI_API_KEY").or_else(|| env("GEMINI_API_KEY")) {
        config.genai.api_key = key;
    }
    if let Some(secret) = env("MINDFULFLOW_SESSION_SECRET") {
        config.auth.session_secret = secret;
    }

    if config.voice.api_key.trim().is_empty() {
        config.voice.api_key = config.genai.api_key.clone();
    }

    Ok(config)
}
