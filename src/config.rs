//! Cache configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `TXCACHE_`-prefixed environment variables (nested keys use `__`, e.g.
//! `TXCACHE_LOG__LEVEL=debug`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What [`Db::commit`](crate::Db::commit) does when one namespace fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Keep committing the remaining namespaces, then report the first error.
    #[default]
    Continue,
    /// Stop at the first failing namespace.
    FailFast,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Colored output (ignored for JSON)
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            ansi: true,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub commit_policy: CommitPolicy,
    /// Log a warning when a range iterator is dropped with its cursor open
    pub warn_on_unclosed_iterator: bool,
    pub log: LogConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            commit_policy: CommitPolicy::Continue,
            warn_on_unclosed_iterator: true,
            log: LogConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("TXCACHE")
                .prefix_separator("_")
                .separator("__"),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Defaults overridden by the environment only.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }
}
