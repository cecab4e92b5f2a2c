//! Crate-wide configuration
//!
//! [`MemoryConfig`] bundles the per-strategy configurations so an
//! application can pick a preset, override a few knobs from the environment
//! and hand the pieces to the allocators it builds.

#[cfg(feature = "logging")]
use tracing::{debug, info};

use crate::allocator::{AccumulatingConfig, FitPolicy, LinearConfig, ListConfig, PoolConfig};
use crate::error::{MemoryError, MemoryResult};

/// Environment variable overriding [`AccumulatingConfig::min_block_size`]
pub const ENV_MIN_BLOCK_SIZE: &str = "CARVE_MEMORY_MIN_BLOCK_SIZE";
/// Environment variable overriding [`AccumulatingConfig::growth_factor`]
pub const ENV_GROWTH_FACTOR: &str = "CARVE_MEMORY_GROWTH_FACTOR";
/// Environment variable switching statistics on or off everywhere
pub const ENV_TRACK_STATS: &str = "CARVE_MEMORY_TRACK_STATS";
/// Environment variable selecting the free-list fit policy
pub const ENV_FIT: &str = "CARVE_MEMORY_FIT";

/// Configuration of every allocator family
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Linear (bump) allocators
    pub linear: LinearConfig,
    /// Pool allocators
    pub pool: PoolConfig,
    /// Boundary-tag free-list allocators
    pub list: ListConfig,
    /// Accumulating wrappers
    pub accumulating: AccumulatingConfig,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Production configuration - no statistics or fill patterns
    pub fn production() -> Self {
        Self {
            linear: LinearConfig::production(),
            pool: PoolConfig::production(),
            list: ListConfig::production(),
            accumulating: AccumulatingConfig::default(),
        }
    }

    /// Debug configuration - statistics, fill patterns, best fit
    pub fn debug() -> Self {
        Self {
            linear: LinearConfig::debug(),
            pool: PoolConfig::debug(),
            list: ListConfig::debug(),
            accumulating: AccumulatingConfig::default(),
        }
    }

    pub fn validate(&self) -> MemoryResult<()> {
        #[cfg(feature = "logging")]
        debug!("validating memory configuration");

        self.linear.validate()?;
        self.pool.validate()?;
        self.list.validate()?;
        self.accumulating.validate()?;
        Ok(())
    }

    /// Applies `CARVE_MEMORY_*` overrides from the process environment on
    /// top of the defaults.
    pub fn from_env() -> MemoryResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> MemoryResult<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MIN_BLOCK_SIZE) {
            config.accumulating.min_block_size = parse(ENV_MIN_BLOCK_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_GROWTH_FACTOR) {
            config.accumulating.growth_factor = parse(ENV_GROWTH_FACTOR, &value)?;
        }
        if let Some(value) = lookup(ENV_TRACK_STATS) {
            let track: bool = parse(ENV_TRACK_STATS, &value)?;
            config.linear.track_stats = track;
            config.pool.track_stats = track;
            config.list.track_stats = track;
        }
        if let Some(value) = lookup(ENV_FIT) {
            config.list.fit = value.parse::<FitPolicy>()?;
        }

        config.validate()?;

        #[cfg(feature = "logging")]
        info!(
            fit = %config.list.fit,
            min_block_size = config.accumulating.min_block_size,
            "memory configuration loaded"
        );

        Ok(config)
    }

    pub fn builder() -> MemoryConfigBuilder {
        MemoryConfigBuilder::new()
    }
}

fn parse<T: core::str::FromStr>(key: &str, value: &str) -> MemoryResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MemoryError::invalid_config(&format!("invalid {key}: '{value}'")))
}

/// Builder for [`MemoryConfig`]
#[derive(Debug, Default)]
pub struct MemoryConfigBuilder {
    config: MemoryConfig,
}

impl MemoryConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linear(mut self, linear: LinearConfig) -> Self {
        self.config.linear = linear;
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    pub fn list(mut self, list: ListConfig) -> Self {
        self.config.list = list;
        self
    }

    pub fn accumulating(mut self, accumulating: AccumulatingConfig) -> Self {
        self.config.accumulating = accumulating;
        self
    }

    /// Fit policy of the free-list allocators
    pub fn fit(mut self, fit: FitPolicy) -> Self {
        self.config.list.fit = fit;
        self
    }

    /// Statistics for every allocator family
    pub fn track_stats(mut self, enable: bool) -> Self {
        self.config.linear.track_stats = enable;
        self.config.pool.track_stats = enable;
        self.config.list.track_stats = enable;
        self
    }

    pub fn min_block_size(mut self, size: usize) -> Self {
        self.config.accumulating.min_block_size = size;
        self
    }

    pub fn build(self) -> MemoryResult<MemoryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn presets_validate() {
        MemoryConfig::default().validate().expect("default");
        MemoryConfig::production().validate().expect("production");
        MemoryConfig::debug().validate().expect("debug");
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars = HashMap::from([
            (ENV_MIN_BLOCK_SIZE, "4096"),
            (ENV_TRACK_STATS, "true"),
            (ENV_FIT, "best"),
        ]);
        let config = MemoryConfig::from_lookup(|key| vars.get(key).map(ToString::to_string))
            .expect("config");

        assert_eq!(config.accumulating.min_block_size, 4096);
        assert_eq!(config.accumulating.growth_factor, 2);
        assert!(config.pool.track_stats);
        assert_eq!(config.list.fit, FitPolicy::Best);
    }

    #[test]
    fn lookup_rejects_bad_values() {
        let bad_size = MemoryConfig::from_lookup(|key| {
            (key == ENV_MIN_BLOCK_SIZE).then(|| "lots".to_string())
        });
        assert!(matches!(bad_size, Err(MemoryError::InvalidConfig { .. })));

        let bad_growth = MemoryConfig::from_lookup(|key| {
            (key == ENV_GROWTH_FACTOR).then(|| "1".to_string())
        });
        assert!(bad_growth.is_err());
    }

    #[test]
    fn builder_applies_overrides() {
        let config = MemoryConfig::builder()
            .fit(FitPolicy::Best)
            .track_stats(false)
            .min_block_size(1024)
            .build()
            .expect("config");
        assert_eq!(config.list.fit, FitPolicy::Best);
        assert!(!config.linear.track_stats);
        assert_eq!(config.accumulating.min_block_size, 1024);

        assert!(MemoryConfig::builder().min_block_size(0).build().is_err());
    }
}
