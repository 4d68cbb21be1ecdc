//! Service configuration
//!
//! Layered: built-in defaults, then an optional config file (TOML/YAML/JSON
//! by extension), then `WEFT__*` environment variables. `.env` files are
//! honored through dotenvy before the environment layer is read.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name used in logs
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Bind address for the management API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            bind_addr: default_bind_addr(),
        }
    }
}

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Connection string; required for the postgres backend
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_url: None,
        }
    }
}

/// Messaging integration for async action completions.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// NATS server URL; messaging transport stays disabled when unset
    #[serde(default)]
    pub nats_url: Option<String>,

    /// Subject the worker consumes step-change events from
    #[serde(default = "default_subject")]
    pub subject: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            nats_url: None,
            subject: default_subject(),
        }
    }
}

fn default_service_name() -> String {
    "weft".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

const fn default_backend() -> StorageBackend {
    StorageBackend::InMemory
}

fn default_subject() -> String {
    "weft.step-changes".to_string()
}

impl WeftConfig {
    /// Load configuration from defaults, an optional file, and the
    /// environment (`WEFT__SECTION__KEY`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("WEFT").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
