//! Gatekeeper Configuration System
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub password: PasswordConfig,
    pub cache: CacheConfig,
    pub persistence: PersistenceConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "json" or "text"
    pub format: String,
    /// Default filter when RUST_LOG is unset
    pub level: String,
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            level: "info".to_string(),
            service_name: "gatekeeper".to_string(),
        }
    }
}

/// Access/refresh token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub issuer: String,
    pub audience: String,
    /// HS256 shared secret. Ignored when both RSA key paths are set.
    pub jwt_secret: String,
    pub private_key_path: String,
    pub public_key_path: String,
    pub access_token_expiry_secs: i64,
    pub refresh_token_expiry_days: i64,
    /// How long expired or revoked refresh tokens are kept before purge
    pub purge_retention_days: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            issuer: "gatekeeper".to_string(),
            audience: "gatekeeper".to_string(),
            jwt_secret: String::new(),
            private_key_path: String::new(),
            public_key_path: String::new(),
            access_token_expiry_secs: 900,
            refresh_token_expiry_days: 14,
            purge_retention_days: 7,
        }
    }
}

/// Upper bounds on token lifetimes. Larger values overflow timestamp arithmetic.
pub const MAX_ACCESS_TOKEN_EXPIRY_SECS: i64 = 86_400;
pub const MAX_REFRESH_TOKEN_EXPIRY_DAYS: i64 = 3_650;
pub const MAX_PURGE_RETENTION_DAYS: i64 = 3_650;

impl SessionConfig {
    pub fn uses_rsa(&self) -> bool {
        !self.private_key_path.is_empty() && !self.public_key_path.is_empty()
    }

    /// Token lifetimes must be positive and bounded; purge retention may be zero.
    pub fn check_lifetimes(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_ACCESS_TOKEN_EXPIRY_SECS).contains(&self.access_token_expiry_secs) {
            return Err(ConfigError::ValidationError(format!(
                "session.access_token_expiry_secs must be between 1 and {}",
                MAX_ACCESS_TOKEN_EXPIRY_SECS
            )));
        }
        if !(1..=MAX_REFRESH_TOKEN_EXPIRY_DAYS).contains(&self.refresh_token_expiry_days) {
            return Err(ConfigError::ValidationError(format!(
                "session.refresh_token_expiry_days must be between 1 and {}",
                MAX_REFRESH_TOKEN_EXPIRY_DAYS
            )));
        }
        if !(0..=MAX_PURGE_RETENTION_DAYS).contains(&self.purge_retention_days) {
            return Err(ConfigError::ValidationError(format!(
                "session.purge_retention_days must be between 0 and {}",
                MAX_PURGE_RETENTION_DAYS
            )));
        }
        Ok(())
    }
}

/// Password policy and Argon2id cost parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    /// Memory cost in KiB
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 12,
            max_length: 128,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl PasswordConfig {
    /// Cheap hashing and a lenient policy, for tests and local development.
    pub fn testing() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            require_uppercase: false,
            require_lowercase: false,
            require_digit: false,
            require_special: false,
            memory_cost: 4096,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    Redis,
    /// Every read goes straight to persistence
    Disabled,
}

/// Cache-aside configuration. TTLs are per entity kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub key_prefix: String,
    pub principal_ttl_secs: u64,
    pub role_ttl_secs: u64,
    pub permission_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "gk".to_string(),
            principal_ttl_secs: 600,
            role_ttl_secs: 3600,
            permission_ttl_secs: 3600,
            refresh_token_ttl_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicySetting {
    /// Re-baseline on the stored row version and retry the commit once
    #[default]
    RefreshAndRetry,
    /// Fail the commit with a concurrency error
    Reject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub conflict_policy: ConflictPolicySetting,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.logging.format.to_ascii_lowercase().as_str(), "json" | "text") {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be \"json\" or \"text\", got \"{}\"",
                self.logging.format
            )));
        }

        let session = &self.session;
        if session.private_key_path.is_empty() != session.public_key_path.is_empty() {
            return Err(ConfigError::ValidationError(
                "session.private_key_path and session.public_key_path must be set together".to_string(),
            ));
        }
        if !session.uses_rsa() && session.jwt_secret.len() < 32 {
            return Err(ConfigError::ValidationError(
                "session.jwt_secret must be at least 32 bytes when no RSA keys are configured".to_string(),
            ));
        }
        session.check_lifetimes()?;

        if self.password.min_length == 0 || self.password.min_length > self.password.max_length {
            return Err(ConfigError::ValidationError(
                "password.min_length must be between 1 and password.max_length".to_string(),
            ));
        }

        let cache = &self.cache;
        if cache.backend == CacheBackend::Redis && cache.redis_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "cache.redis_url is required for the redis backend".to_string(),
            ));
        }
        let ttls = [
            cache.principal_ttl_secs,
            cache.role_ttl_secs,
            cache.permission_ttl_secs,
            cache.refresh_token_ttl_secs,
        ];
        if cache.backend != CacheBackend::Disabled && ttls.contains(&0) {
            return Err(ConfigError::ValidationError(
                "cache TTLs must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Gatekeeper Configuration
# Environment variables (GATEKEEPER_*) override these settings

[logging]
format = "text"      # text or json
level = "info"
service_name = "gatekeeper"

[session]
issuer = "gatekeeper"
audience = "gatekeeper"
jwt_secret = ""      # HS256, at least 32 bytes
private_key_path = "" # RS256 (takes precedence when both paths are set)
public_key_path = ""
access_token_expiry_secs = 900
refresh_token_expiry_days = 14
purge_retention_days = 7

[password]
min_length = 12
max_length = 128
require_uppercase = true
require_lowercase = true
require_digit = true
require_special = true
memory_cost = 65536
time_cost = 3
parallelism = 4

[cache]
backend = "memory"   # memory, redis, disabled
redis_url = "redis://localhost:6379"
key_prefix = "gk"
principal_ttl_secs = 600
role_ttl_secs = 3600
permission_ttl_secs = 3600
refresh_token_ttl_secs = 120

[persistence]
conflict_policy = "refresh_and_retry"  # refresh_and_retry or reject
"#
        .to_string()
    }
}
