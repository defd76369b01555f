//! Check-in Configuration Management
//!
//! Handles configuration from environment variables and config files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Secret used when nothing is configured; the server warns at startup when it is in use
pub const DEVELOPMENT_JWT_SECRET: &str = "development-secret-key-change-in-production";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database connection
    pub database: DatabaseConfig,

    /// Token issuance and revocation
    pub auth: AuthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("API_PORT") {
            config.server.port = parse_var("API_PORT", port)?;
        }

        // PostgreSQL
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database.postgres_url = Some(url);
            }
        }
        if let Ok(size) = std::env::var("DATABASE_POOL_SIZE") {
            config.database.pool_size = parse_var("DATABASE_POOL_SIZE", size)?;
        }
        if let Ok(ms) = std::env::var("STORE_TIMEOUT_MS") {
            config.database.store_timeout_ms = parse_var("STORE_TIMEOUT_MS", ms)?;
        }

        // Auth
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            config.auth.jwt_secret = secret;
        }
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            config.auth.jwt_issuer = issuer;
        }
        if let Ok(ttl) = std::env::var("JWT_ACCESS_TTL_SECS") {
            config.auth.access_ttl_secs = parse_var("JWT_ACCESS_TTL_SECS", ttl)?;
        }
        if let Ok(ttl) = std::env::var("JWT_REFRESH_TTL_SECS") {
            config.auth.refresh_ttl_secs = parse_var("JWT_REFRESH_TTL_SECS", ttl)?;
        }
        if let Ok(backend) = std::env::var("REVOCATION_BACKEND") {
            config.auth.revocation_backend = backend.parse()?;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = std::env::var("LOG_JSON") {
            config.logging.json_format = parse_var("LOG_JSON", json)?;
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;

        // Only override if env values differ from defaults
        if env_config.server.host != ServerConfig::default().host {
            self.server.host = env_config.server.host;
        }
        if env_config.server.port != ServerConfig::default().port {
            self.server.port = env_config.server.port;
        }
        if env_config.database.postgres_url.is_some() {
            self.database.postgres_url = env_config.database.postgres_url;
        }

        // Always use env for secrets
        if env_config.auth.jwt_secret != DEVELOPMENT_JWT_SECRET {
            self.auth.jwt_secret = env_config.auth.jwt_secret;
        }

        let is_set = |key: &str| std::env::var(key).is_ok();
        if is_set("DATABASE_POOL_SIZE") {
            self.database.pool_size = env_config.database.pool_size;
        }
        if is_set("STORE_TIMEOUT_MS") {
            self.database.store_timeout_ms = env_config.database.store_timeout_ms;
        }
        if is_set("JWT_ISSUER") {
            self.auth.jwt_issuer = env_config.auth.jwt_issuer;
        }
        if is_set("JWT_ACCESS_TTL_SECS") {
            self.auth.access_ttl_secs = env_config.auth.access_ttl_secs;
        }
        if is_set("JWT_REFRESH_TTL_SECS") {
            self.auth.refresh_ttl_secs = env_config.auth.refresh_ttl_secs;
        }
        if is_set("REVOCATION_BACKEND") {
            self.auth.revocation_backend = env_config.auth.revocation_backend;
        }
        if is_set("LOG_LEVEL") {
            self.logging.level = env_config.logging.level;
        }
        if is_set("LOG_JSON") {
            self.logging.json_format = env_config.logging.json_format;
        }

        Ok(self)
    }

    /// Reject configurations the auth subsystem cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("JWT_SECRET".to_string()));
        }
        if self.auth.access_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "JWT_ACCESS_TTL_SECS".to_string(),
                value: "0".to_string(),
            });
        }
        if self.auth.refresh_ttl_secs <= self.auth.access_ttl_secs {
            return Err(ConfigError::InvalidValue {
                key: "JWT_REFRESH_TTL_SECS".to_string(),
                value: self.auth.refresh_ttl_secs.to_string(),
            });
        }
        if self.auth.revocation_backend == RevocationBackend::Postgres
            && self.database.postgres_url.is_none()
        {
            return Err(ConfigError::MissingRequired("DATABASE_URL".to_string()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; in-memory storage is used when unset
    pub postgres_url: Option<String>,

    /// PostgreSQL connection pool size
    pub pool_size: u32,

    /// Deadline for a single store round trip in milliseconds
    pub store_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            pool_size: 10,
            store_timeout_ms: 3000,
        }
    }
}

/// Token issuance and revocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret shared by every component that signs or verifies tokens
    pub jwt_secret: String,

    /// Token issuer identifier
    pub jwt_issuer: String,

    /// Access token lifetime in seconds
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    pub refresh_ttl_secs: u64,

    /// Where revoked tokens are recorded
    pub revocation_backend: RevocationBackend,

    /// How often expired rows are removed from the PostgreSQL revocation table
    pub revocation_sweep_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEVELOPMENT_JWT_SECRET.to_string(),
            jwt_issuer: "checkin-api".to_string(),
            access_ttl_secs: 900,       // 15 minutes
            refresh_ttl_secs: 604_800, // 7 days
            revocation_backend: RevocationBackend::Memory,
            revocation_sweep_interval_secs: 300,
        }
    }
}

/// Revocation store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationBackend {
    Memory,
    Postgres,
}

impl std::str::FromStr for RevocationBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            _ => Err(ConfigError::InvalidValue {
                key: "REVOCATION_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
