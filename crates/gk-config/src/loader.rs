//! Configuration loader with file and environment variable support

use crate::{AppConfig, CacheBackend, ConfigError, ConflictPolicySetting};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "gatekeeper.toml",
    "config.toml",
    "./config/gatekeeper.toml",
    "/etc/gatekeeper/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file()? {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, |key| env::var(key).ok());

        Ok(config)
    }

    /// An explicit path that does not exist is an error; search paths are optional.
    fn find_config_file(&self) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(ConfigError::ValidationError(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        if let Ok(path) = env::var("GATEKEEPER_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(Some(path));
            }
            warn!(?path, "GATEKEEPER_CONFIG points at a missing file, searching defaults");
        }

        Ok(CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists()))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_into<T: FromStr>(target: &mut T, key: &str, value: Option<String>) {
    if let Some(value) = value {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %value, "Ignoring unparsable environment override"),
        }
    }
}

/// Apply `GATEKEEPER_*` overrides using `lookup` as the variable source.
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Logging
    if let Some(val) = lookup("GATEKEEPER_LOG_FORMAT") {
        config.logging.format = val;
    }
    if let Some(val) = lookup("GATEKEEPER_LOG_LEVEL") {
        config.logging.level = val;
    }

    // Session
    if let Some(val) = lookup("GATEKEEPER_JWT_ISSUER") {
        config.session.issuer = val;
    }
    if let Some(val) = lookup("GATEKEEPER_JWT_AUDIENCE") {
        config.session.audience = val;
    }
    if let Some(val) = lookup("GATEKEEPER_JWT_SECRET") {
        config.session.jwt_secret = val;
    }
    if let Some(val) = lookup("GATEKEEPER_JWT_PRIVATE_KEY_PATH") {
        config.session.private_key_path = val;
    }
    if let Some(val) = lookup("GATEKEEPER_JWT_PUBLIC_KEY_PATH") {
        config.session.public_key_path = val;
    }
    parse_into(
        &mut config.session.access_token_expiry_secs,
        "GATEKEEPER_ACCESS_TOKEN_EXPIRY_SECS",
        lookup("GATEKEEPER_ACCESS_TOKEN_EXPIRY_SECS"),
    );
    parse_into(
        &mut config.session.refresh_token_expiry_days,
        "GATEKEEPER_REFRESH_TOKEN_EXPIRY_DAYS",
        lookup("GATEKEEPER_REFRESH_TOKEN_EXPIRY_DAYS"),
    );

    // Cache
    if let Some(val) = lookup("GATEKEEPER_CACHE_BACKEND") {
        match val.to_ascii_lowercase().as_str() {
            "memory" => config.cache.backend = CacheBackend::Memory,
            "redis" => config.cache.backend = CacheBackend::Redis,
            "disabled" | "none" => config.cache.backend = CacheBackend::Disabled,
            other => warn!(value = other, "Ignoring unknown GATEKEEPER_CACHE_BACKEND"),
        }
    }
    if let Some(val) = lookup("GATEKEEPER_REDIS_URL") {
        config.cache.redis_url = val;
    }
    if let Some(val) = lookup("GATEKEEPER_CACHE_KEY_PREFIX") {
        config.cache.key_prefix = val;
    }

    // Persistence
    if let Some(val) = lookup("GATEKEEPER_CONFLICT_POLICY") {
        match val.to_ascii_lowercase().as_str() {
            "refresh_and_retry" => {
                config.persistence.conflict_policy = ConflictPolicySetting::RefreshAndRetry
            }
            "reject" => config.persistence.conflict_policy = ConflictPolicySetting::Reject,
            other => warn!(value = other, "Ignoring unknown GATEKEEPER_CONFLICT_POLICY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("GATEKEEPER_JWT_SECRET", "s3cret"),
                ("GATEKEEPER_CACHE_BACKEND", "Redis"),
                ("GATEKEEPER_REDIS_URL", "redis://other:6380"),
                ("GATEKEEPER_REFRESH_TOKEN_EXPIRY_DAYS", "30"),
                ("GATEKEEPER_CONFLICT_POLICY", "reject"),
            ]),
        );

        assert_eq!(config.session.jwt_secret, "s3cret");
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.cache.redis_url, "redis://other:6380");
        assert_eq!(config.session.refresh_token_expiry_days, 30);
        assert_eq!(config.persistence.conflict_policy, ConflictPolicySetting::Reject);
    }

    #[test]
    fn test_unparsable_override_keeps_default() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("GATEKEEPER_ACCESS_TOKEN_EXPIRY_SECS", "soon"),
                ("GATEKEEPER_CACHE_BACKEND", "memcached"),
            ]),
        );

        assert_eq!(config.session.access_token_expiry_secs, 900);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let loader = ConfigLoader::with_path("/definitely/not/here/gatekeeper.toml");
        assert!(loader.load().is_err());
    }

    #[test]
    fn test_explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatekeeper.toml");
        std::fs::write(&path, "[session]\nissuer = \"issuer-from-file\"\n").unwrap();

        let config = ConfigLoader::with_path(&path).load().unwrap();
        assert_eq!(config.session.issuer, "issuer-from-file");
    }
}
