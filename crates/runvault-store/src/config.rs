// ABOUTME: Configuration for the persistence service: retention, cache TTL, and env overrides.
// ABOUTME: Invalid environment values are rejected at load time rather than silently defaulted.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be a positive integer, got {1:?}")]
    InvalidNumber(&'static str, String),
}

/// Tunables for the persistence service.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Snapshots retained per run; the oldest beyond this are evicted.
    pub max_snapshots_per_run: usize,
    /// Expiry window applied when a save request carries no explicit expiry.
    pub default_retention_days: i64,
    /// TTL for cached run state.
    pub cache_ttl: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            max_snapshots_per_run: 50,
            default_retention_days: 30,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl VaultConfig {
    /// Load configuration from environment variables over the defaults.
    ///
    /// Environment variables:
    /// - RUNVAULT_MAX_SNAPSHOTS_PER_RUN: retained snapshots per run (default: 50)
    /// - RUNVAULT_RETENTION_DAYS: default expiry window in days (default: 30)
    /// - RUNVAULT_CACHE_TTL_SECS: cache TTL in seconds (default: 3600)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("RUNVAULT_MAX_SNAPSHOTS_PER_RUN") {
            config.max_snapshots_per_run =
                parse_positive("RUNVAULT_MAX_SNAPSHOTS_PER_RUN", &raw)? as usize;
        }
        if let Ok(raw) = std::env::var("RUNVAULT_RETENTION_DAYS") {
            config.default_retention_days = parse_positive("RUNVAULT_RETENTION_DAYS", &raw)? as i64;
        }
        if let Ok(raw) = std::env::var("RUNVAULT_CACHE_TTL_SECS") {
            config.cache_ttl =
                Duration::from_secs(parse_positive("RUNVAULT_CACHE_TTL_SECS", &raw)?);
        }

        Ok(config)
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber(name, raw.to_string())),
    }
}
