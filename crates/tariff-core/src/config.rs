//! Configuration for the core services

use std::str::FromStr;
use std::time::Duration;

/// Configuration for the catalog cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL for cached plans.
    /// Default: 30 seconds
    pub plan_ttl: Duration,

    /// TTL for cached product feature sets.
    /// Default: 30 seconds
    pub feature_ttl: Duration,

    /// Maximum number of cached plans.
    /// Default: 10,000
    pub max_plans: u64,

    /// Maximum number of cached product feature sets.
    /// Default: 1,000
    pub max_feature_sets: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            plan_ttl: Duration::from_secs(30),
            feature_ttl: Duration::from_secs(30),
            max_plans: 10_000,
            max_feature_sets: 1_000,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_plan_ttl(mut self, ttl: Duration) -> Self {
        self.plan_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_feature_ttl(mut self, ttl: Duration) -> Self {
        self.feature_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_plans(mut self, max: u64) -> Self {
        self.max_plans = max;
        self
    }

    #[must_use]
    pub fn with_max_feature_sets(mut self, max: u64) -> Self {
        self.max_feature_sets = max;
        self
    }

    /// Load from environment variables, see [`CoreConfig::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            plan_ttl: Duration::from_secs(parse_var(
                &lookup,
                "TARIFF_PLAN_CACHE_TTL_SECS",
                defaults.plan_ttl.as_secs(),
            )?),
            feature_ttl: Duration::from_secs(parse_var(
                &lookup,
                "TARIFF_FEATURE_CACHE_TTL_SECS",
                defaults.feature_ttl.as_secs(),
            )?),
            max_plans: parse_var(&lookup, "TARIFF_PLAN_CACHE_MAX", defaults.max_plans)?,
            max_feature_sets: parse_var(
                &lookup,
                "TARIFF_FEATURE_CACHE_MAX",
                defaults.max_feature_sets,
            )?,
        })
    }
}

/// Core service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Catalog cache configuration
    pub cache: CacheConfig,
    /// Default batch size for lifecycle sweeps
    pub batch_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            batch_limit: 100,
        }
    }
}

impl CoreConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Reads a `.env` file when present. Recognized variables:
    /// `TARIFF_PLAN_CACHE_TTL_SECS`, `TARIFF_FEATURE_CACHE_TTL_SECS`,
    /// `TARIFF_PLAN_CACHE_MAX`, `TARIFF_FEATURE_CACHE_MAX` and
    /// `TARIFF_BATCH_LIMIT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let batch_limit = parse_var(&lookup, "TARIFF_BATCH_LIMIT", 100usize)?;
        if batch_limit == 0 {
            return Err(ConfigError::Invalid("TARIFF_BATCH_LIMIT"));
        }
        Ok(Self {
            cache: CacheConfig::from_lookup(&lookup)?,
            batch_limit,
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset
pub fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        None => Ok(default),
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
