//! Configuration management for Ratewarden.
//!
//! Configuration is YAML. [`RatewardenConfig::load`] layers environment
//! variables over the file, using the `RATEWARDEN` prefix and `__` between
//! nested keys, e.g. `RATEWARDEN__STORE__URL=redis://cache:6379`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RatewardenError, Result};
use crate::ratelimit::{Rule, RuleConfig};
use crate::store::RedisWindowStoreConfig;

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for Ratewarden.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewardenConfig {
    /// Backing store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Named policies, each an unordered list of rules
    #[serde(default)]
    pub policies: BTreeMap<String, Vec<RuleConfig>>,
}

/// Which window store implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis store, consistent across instances
    #[default]
    Redis,
    /// In-process store for single-instance deployments
    Memory,
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Prefix for every window key
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per round-trip timeout in milliseconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// How often the memory backend purges idle windows, in milliseconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_url(),
            namespace: default_namespace(),
            connect_timeout_ms: default_connect_timeout(),
            response_timeout_ms: default_response_timeout(),
            cleanup_interval_ms: default_cleanup_interval(),
        }
    }
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_namespace() -> String {
    "ratewarden".to_string()
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_response_timeout() -> u64 {
    500
}

fn default_cleanup_interval() -> u64 {
    60_000
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Settings for [`crate::store::RedisWindowStore`].
    pub fn redis_config(&self) -> RedisWindowStoreConfig {
        RedisWindowStoreConfig {
            namespace: self.namespace.clone(),
            connect_timeout: self.connect_timeout(),
            response_timeout: self.response_timeout(),
        }
    }

    /// Validate store settings.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() || self.namespace.contains(':') {
            return Err(RatewardenError::Config(format!(
                "store namespace must be non-empty and must not contain ':' (got {:?})",
                self.namespace
            )));
        }
        if self.backend == StoreBackend::Redis
            && !["redis://", "rediss://", "unix://"]
                .iter()
                .any(|scheme| self.url.starts_with(scheme))
        {
            return Err(RatewardenError::Config(format!(
                "store url must use redis://, rediss:// or unix:// (got {:?})",
                self.url
            )));
        }
        if self.connect_timeout_ms == 0 || self.response_timeout_ms == 0 {
            return Err(RatewardenError::Config(
                "store timeouts must be positive".to_string(),
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(RatewardenError::Config(
                "store cleanup_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl RatewardenConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatewardenError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional YAML file with environment overrides,
    /// then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: RatewardenConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the store settings and every policy's rules.
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        for name in self.policies.keys() {
            self.policy(name)?;
        }
        Ok(())
    }

    /// Build the rules of a named policy.
    pub fn policy(&self, name: &str) -> Result<Vec<Rule>> {
        let configs = self
            .policies
            .get(name)
            .ok_or_else(|| RatewardenError::Config(format!("unknown policy {:?}", name)))?;

        if configs.is_empty() {
            return Err(RatewardenError::Config(format!(
                "policy {:?} has no rules",
                name
            )));
        }

        configs
            .iter()
            .map(|rule| {
                rule.build().map_err(|e| {
                    RatewardenError::Config(format!("policy {:?}: {}", name, e))
                })
            })
            .collect()
    }
}
