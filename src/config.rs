//! Configuration for the rebalancing core.

use crate::error::{Error, Result};
use crate::types::CacheId;
use std::time::Duration;

/// When and whether a cache rebalances after topology changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebalanceMode {
    /// Callers may block on the sync future until the initial rebalance
    /// completes.
    Sync,
    /// Rebalancing runs in the background; the sync future is advisory.
    #[default]
    Async,
    /// Rebalancing is disabled for this cache.
    None,
}

/// Replication layout of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Keys are split into partitions spread across the cluster.
    #[default]
    Partitioned,
    /// Every node holds a full copy.
    Replicated,
}

/// Immutable per-cache rebalancing configuration.
#[derive(Debug, Clone)]
pub struct RebalanceConfig {
    /// Human-readable cache name, used in logs and ordering dependencies.
    pub cache_name: String,

    /// Numeric cache identifier carried on wire messages.
    pub cache_id: CacheId,

    /// Rebalance mode.
    pub mode: RebalanceMode,

    /// Replication layout; controls the stopped-event policy.
    pub cache_mode: CacheMode,

    /// Delay before acting on new assignments. Zero means immediate.
    pub delay: Duration,

    /// Per-demand-message timeout and grace period.
    pub timeout: Duration,

    /// Number of parallel demand lanes per supplier. Must be at least 1.
    pub thread_pool_size: usize,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            cache_name: "default".to_owned(),
            cache_id: 0,
            mode: RebalanceMode::Async,
            cache_mode: CacheMode::Partitioned,
            delay: Duration::ZERO,
            timeout: Duration::from_secs(10),
            thread_pool_size: 2,
        }
    }
}

impl RebalanceConfig {
    /// Create a configuration for the given cache.
    pub fn new(cache_name: impl Into<String>, cache_id: CacheId) -> Self {
        Self {
            cache_name: cache_name.into(),
            cache_id,
            ..Default::default()
        }
    }

    /// Set the rebalance mode.
    pub fn with_mode(mut self, mode: RebalanceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the cache replication layout.
    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    /// Set the assignment delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the per-message timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of demand lanes per supplier.
    pub fn with_thread_pool_size(mut self, size: usize) -> Self {
        self.thread_pool_size = size;
        self
    }

    /// Whether rebalancing is enabled at all.
    pub fn enabled(&self) -> bool {
        self.mode != RebalanceMode::None
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.thread_pool_size == 0 {
            return Err(Error::Config(
                "thread_pool_size must be at least 1".to_owned(),
            ));
        }
        if self.cache_name.is_empty() {
            return Err(Error::Config("cache_name must not be empty".to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RebalanceConfig::default();
        config.validate().unwrap();
        assert!(config.enabled());
        assert_eq!(config.cache_mode, CacheMode::Partitioned);
    }

    #[test]
    fn test_builder() {
        let config = RebalanceConfig::new("accounts", 7)
            .with_mode(RebalanceMode::Sync)
            .with_delay(Duration::from_millis(500))
            .with_timeout(Duration::from_secs(30))
            .with_thread_pool_size(4);

        assert_eq!(config.cache_name, "accounts");
        assert_eq!(config.cache_id, 7);
        assert_eq!(config.mode, RebalanceMode::Sync);
        assert_eq!(config.delay, Duration::from_millis(500));
        assert_eq!(config.thread_pool_size, 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_lanes_rejected() {
        let config = RebalanceConfig::default().with_thread_pool_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_mode() {
        let config = RebalanceConfig::default().with_mode(RebalanceMode::None);
        assert!(!config.enabled());
    }
}
