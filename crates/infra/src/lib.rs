//! Infrastructure layer: configuration, Postgres and Redis adapters.

pub mod config;
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis_attempts;

pub use config::{AppConfig, ConfigError};
