// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{GatewayError, Result};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Config file
    /// 3. Defaults (lowest)
    ///
    /// CLI overrides are applied on top by the caller.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Same as [`AppConfig::load`], reading `path` instead of the default
    /// config file. An explicit path must exist.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(&Self::default_config_path()).required(false),
        };

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            .add_source(file)
            // Override with environment variables, e.g. BLOBGATE_SERVER__PORT=9000
            .add_source(
                Environment::with_prefix("BLOBGATE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let app: AppConfig = config
            .try_deserialize()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    /// Reject settings that would make the pipeline misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.breaker.failure_threshold == 0 {
            return Err(GatewayError::Config(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        for origin in std::iter::once(&self.origins.primary).chain(&self.origins.fallbacks) {
            if origin.name.trim().is_empty() {
                return Err(GatewayError::Config("origin name must not be empty".to_string()));
            }
            reqwest::Url::parse(&origin.base_url).map_err(|e| {
                GatewayError::Config(format!("origin '{}' has an invalid base_url: {}", origin.name, e))
            })?;
            if origin.timeout_ms == 0 {
                return Err(GatewayError::Config(format!(
                    "origin '{}' timeout_ms must be positive",
                    origin.name
                )));
            }
        }

        let mut names: Vec<&str> = std::iter::once(&self.origins.primary)
            .chain(&self.origins.fallbacks)
            .map(|o| o.name.as_str())
            .collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(GatewayError::Config("origin names must be unique".to_string()));
        }

        if let Some(url) = &self.cache.backing_url {
            reqwest::Url::parse(url)
                .map_err(|e| GatewayError::Config(format!("invalid cache.backing_url: {}", e)))?;
        }

        if self.performance.max_connections_per_host == 0 {
            return Err(GatewayError::Config(
                "performance.max_connections_per_host must be at least 1".to_string(),
            ));
        }

        let buckets = &self.metrics.buckets;
        if buckets.is_empty() || buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GatewayError::Config(
                "metrics.buckets must be a non-empty, strictly increasing list".to_string(),
            ));
        }

        Ok(())
    }

    fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".blobgate")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }
}
