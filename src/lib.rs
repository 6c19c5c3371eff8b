//! Partition rebalancing core for a distributed partitioned key-value
//! cache.
//!
//! This crate implements the **demander** side of partition rebalancing:
//! the per-cache subsystem that, after a cluster topology change,
//! acquires the partitions this node now owns from the nodes that still
//! hold readable copies of them.
//!
//! The crate deliberately owns only the protocol and its bookkeeping.
//! The exchange manager (which computes assignments), the affinity
//! function, the local partition store and the ordered message transport
//! are consumed through traits in [`topology`], [`exchange`] and
//! [`transport`], so the core can be embedded into any cache node and
//! tested against in-memory collaborators.
//!
//! # Protocol sketch
//!
//! ```text
//! demander                                   supplier
//!    │  DemandMessage { partitions, seq }       │
//!    ├──────────────────────────────────────────►
//!    │        SupplyMessage { entries, last }   │
//!    ◄──────────────────────────────────────────┤
//!    │  DemandMessage { } (ack-and-continue)    │
//!    ├──────────────────────────────────────────►
//!    │        SupplyMessage { ... }             │
//!    ◄──────────────────────────────────────────┤
//!    │              ...                         │
//! ```
//!
//! Each supplier's partitions are split across `thread_pool_size`
//! independent lanes; within one lane the transport delivers in order
//! and exactly one batch is outstanding at a time, so the protocol is
//! self-pacing without any explicit backpressure.
//!
//! # Example
//!
//! ```rust,ignore
//! use cortado::{AssignmentBatch, CacheContext, Demander, DemandLock, RebalanceConfig};
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(CacheContext::new(
//!     RebalanceConfig::new("accounts", 1),
//!     affinity,
//!     topology,
//!     transport,
//!     exchange,
//!     events,
//! ));
//! let demander = Arc::new(Demander::new(ctx, registry, Arc::new(DemandLock::new()))?);
//!
//! // On every exchange round:
//! if let Some(task) = demander.add_assignments(batch, false, vec![]) {
//!     let demander = demander.clone();
//!     tokio::spawn(async move { demander.run(task).await });
//! }
//!
//! // From the transport's dispatcher, per lane:
//! demander.handle_supply_message(lane, supplier, supply).await;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod exchange;
pub mod metrics;
pub mod rebalance;
pub mod testing;
pub mod topology;
pub mod transport;
pub mod types;

// Re-export main types for convenience.
pub use config::{CacheMode, RebalanceConfig, RebalanceMode};
pub use error::{Error, Result, TransportError};
pub use events::{EventSink, LoggingEventSink, NoopEventSink, RebalanceEvent, RebalanceEventKind};
pub use exchange::{ExchangeId, ExchangeManager, ExchangeRef};
pub use metrics::{Counter, Gauge, RebalanceMetrics, RebalanceMetricsSnapshot};
pub use rebalance::{
    AssignmentBatch, CacheContext, CacheEntry, CacheRegistry, DemandLock, DemandMessage, Demander,
    NoopCacheRegistry, OrderingGate, PreloadFilter, RebalanceFuture, RebalanceResult,
    RebalanceTask, RetryTimer, SupplyMessage,
};
pub use topology::{
    Affinity, LocalPartition, PartitionState, PartitionTopology, ReservedPartition,
};
pub use transport::{rebalance_topic, Topic, Transport};
pub use types::{
    CacheId, DiscoveryEvent, DiscoveryEventKind, NodeId, PartitionId, TopologyVersion,
};
