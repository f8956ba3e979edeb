//! Process configuration read from environment variables.
//!
//! | Variable                   | Default                 |
//! |----------------------------|-------------------------|
//! | `BIND_ADDR`                | `0.0.0.0:8080`          |
//! | `DATABASE_URL`             | unset: in-memory stores |
//! | `REDIS_URL`                | unset: in-memory counters |
//! | `JWT_SECRET`               | required                |
//! | `AUDIT_QUEUE_CAPACITY`     | `1024`                  |
//! | `BRUTE_FORCE_MAX_ATTEMPTS` | `5`                     |
//! | `BRUTE_FORCE_WINDOW_SECS`  | `3600`                  |
//! | `MANAGER_BRANCH_ACCESS`    | `true`                  |
//! | `PASSWORD_CHANGE_PATHS`    | `/auth/change-password` |
//! | `LOG_FORMAT`               | `json`                  |
//! | `TRUST_FORWARDED_FOR`      | `false`                 |

use std::net::SocketAddr;

use chrono::Duration;
use thiserror::Error;

use brokerage_auth::{BranchPolicy, BruteForcePolicy};
use brokerage_observability::LogFormat;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub audit_queue_capacity: usize,
    pub brute_force: BruteForcePolicy,
    pub manager_branch_access: bool,
    /// Paths reachable while a password change is pending.
    pub password_change_paths: Vec<String>,
    pub log_format: LogFormat,
    /// Take the client address from `X-Forwarded-For`. Only safe behind a proxy
    /// that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl AppConfig {
    pub const DEFAULT_BIND_ADDR: &'static str = "0.0.0.0:8080";
    pub const DEFAULT_PASSWORD_CHANGE_PATH: &'static str = "/auth/change-password";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| Self::DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("BIND_ADDR", e.to_string()))?;

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let audit_queue_capacity = positive(get("AUDIT_QUEUE_CAPACITY"), "AUDIT_QUEUE_CAPACITY", 1024)?;
        let max_attempts = positive(get("BRUTE_FORCE_MAX_ATTEMPTS"), "BRUTE_FORCE_MAX_ATTEMPTS", 5)?;
        let window_secs = positive(get("BRUTE_FORCE_WINDOW_SECS"), "BRUTE_FORCE_WINDOW_SECS", 3600)?;

        let manager_branch_access = match get("MANAGER_BRANCH_ACCESS") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                ConfigError::invalid("MANAGER_BRANCH_ACCESS", format!("expected true or false, got '{raw}'"))
            })?,
            None => true,
        };

        let trust_forwarded_for = match get("TRUST_FORWARDED_FOR") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                ConfigError::invalid("TRUST_FORWARDED_FOR", format!("expected true or false, got '{raw}'"))
            })?,
            None => false,
        };

        let password_change_paths = match get("PASSWORD_CHANGE_PATHS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            None => vec![Self::DEFAULT_PASSWORD_CHANGE_PATH.to_string()],
        };

        let log_format = match get("LOG_FORMAT") {
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|reason| ConfigError::invalid("LOG_FORMAT", reason))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bind_addr,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            jwt_secret,
            audit_queue_capacity,
            brute_force: BruteForcePolicy {
                max_attempts: u32::try_from(max_attempts)
                    .map_err(|_| ConfigError::invalid("BRUTE_FORCE_MAX_ATTEMPTS", "too large"))?,
                window: Duration::seconds(
                    i64::try_from(window_secs).map_err(|_| ConfigError::invalid("BRUTE_FORCE_WINDOW_SECS", "too large"))?,
                ),
            },
            manager_branch_access,
            password_change_paths,
            log_format,
            trust_forwarded_for,
        })
    }

    /// Configuration for tests and local runs: in-memory everything.
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: None,
            redis_url: None,
            jwt_secret: jwt_secret.into(),
            audit_queue_capacity: 1024,
            brute_force: BruteForcePolicy::default(),
            manager_branch_access: true,
            password_change_paths: vec![Self::DEFAULT_PASSWORD_CHANGE_PATH.to_string()],
            log_format: LogFormat::Pretty,
            trust_forwarded_for: false,
        }
    }

    pub fn branch_policy(&self) -> BranchPolicy {
        if self.manager_branch_access {
            BranchPolicy::default()
        } else {
            BranchPolicy::disabled()
        }
    }
}

fn positive(raw: Option<String>, key: &'static str, default: usize) -> Result<usize, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.parse::<usize>() {
        Ok(0) => Err(ConfigError::invalid(key, "must be greater than zero")),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::invalid(key, e.to_string())),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
