use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 2] = ["json", "pretty"];

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `database.path` is empty.
    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    /// `database.max_connections` is 0.
    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    /// `cache.ttl_minutes` is 0.
    #[error("Invalid cache ttl_minutes: {0}. Must be at least 1")]
    InvalidTtl(u64),

    /// `cache.max_capacity` is 0.
    #[error("Invalid cache max_capacity: {0}. Must be at least 1")]
    InvalidCapacity(u64),

    /// `logging.level` is not a tracing level.
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// `logging.format` is neither json nor pretty.
    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    /// `repository.default_page_size` is 0.
    #[error("Invalid default_page_size: {0}. Must be at least 1")]
    InvalidPageSize(u64),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .repokit/config.yaml
    /// 3. .repokit/local.yaml (optional local overrides)
    /// 4. Environment variables (REPOKIT_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        Self::extract(
            Self::base()
                .merge(Yaml::file(".repokit/config.yaml"))
                .merge(Yaml::file(".repokit/local.yaml"))
                .merge(Self::env()),
        )
        .context("Failed to extract configuration from figment")
    }

    /// Load configuration from a specific file, still honouring `REPOKIT_*` overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        Self::extract(Self::base().merge(Yaml::file(path)).merge(Self::env()))
            .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    fn base() -> Figment {
        Figment::new().merge(Serialized::defaults(Config::default()))
    }

    fn env() -> Env {
        Env::prefixed("REPOKIT_").split("__")
    }

    fn extract(figment: Figment) -> Result<Config> {
        let config: Config = figment.extract()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        if config.cache.ttl_minutes == 0 {
            return Err(ConfigError::InvalidTtl(config.cache.ttl_minutes));
        }

        if config.cache.max_capacity == 0 {
            return Err(ConfigError::InvalidCapacity(config.cache.max_capacity));
        }

        if config.repository.default_page_size == 0 {
            return Err(ConfigError::InvalidPageSize(
                config.repository.default_page_size,
            ));
        }

        if !VALID_LOG_LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if !VALID_LOG_FORMATS.contains(&config.logging.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}
