//! Per-cache context shared across the rebalancing core.

use crate::config::RebalanceConfig;
use crate::events::EventSink;
use crate::exchange::ExchangeManager;
use crate::metrics::RebalanceMetrics;
use crate::topology::{Affinity, PartitionTopology};
use crate::transport::Transport;
use std::fmt;
use std::sync::Arc;

/// Bundles the configuration and external collaborators of one cache.
///
/// Everything the demander and its futures touch outside their own state
/// goes through this context, so tests can swap any collaborator.
pub struct CacheContext {
    /// Rebalancing configuration.
    pub config: RebalanceConfig,
    /// Affinity function.
    pub affinity: Arc<dyn Affinity>,
    /// Local partition store.
    pub topology: Arc<dyn PartitionTopology>,
    /// Ordered message transport.
    pub transport: Arc<dyn Transport>,
    /// Partition exchange manager.
    pub exchange: Arc<dyn ExchangeManager>,
    /// Event sink.
    pub events: Arc<dyn EventSink>,
    /// Per-cache rebalance metrics.
    pub metrics: RebalanceMetrics,
}

impl CacheContext {
    /// Create a context from a configuration and its collaborators.
    pub fn new(
        config: RebalanceConfig,
        affinity: Arc<dyn Affinity>,
        topology: Arc<dyn PartitionTopology>,
        transport: Arc<dyn Transport>,
        exchange: Arc<dyn ExchangeManager>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            affinity,
            topology,
            transport,
            exchange,
            events,
            metrics: RebalanceMetrics::new(),
        }
    }
}

impl fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheContext")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish()
    }
}
