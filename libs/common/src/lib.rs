//! Shared service plumbing: telemetry setup and configuration loading.

pub mod config;
pub mod telemetry;

pub use config::{ConfigError, EventsConfig, ServiceConfig, StorageBackend, StorageConfig, WeftConfig};
pub use telemetry::init_tracing;
