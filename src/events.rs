//! Rebalancing events.
//!
//! The core reports progress through an [`EventSink`]: one event per
//! installed entry, one per finished partition, and one when a whole
//! rebalance round stops. Sinks decide what is recordable; the core
//! checks before building an event so disabled kinds cost nothing.

use crate::types::{CacheId, DiscoveryEvent, PartitionId};

/// Kind of rebalancing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebalanceEventKind {
    /// A single entry was installed into a moving partition.
    ObjectLoaded,
    /// All data for one partition has been received.
    PartitionLoaded,
    /// A rebalance round finished (successfully or not).
    Stopped,
}

/// A rebalancing progress event.
#[derive(Debug, Clone)]
pub struct RebalanceEvent {
    /// Event kind.
    pub kind: RebalanceEventKind,
    /// Cache the event belongs to.
    pub cache_id: CacheId,
    /// Partition, when the event is partition-scoped.
    pub partition: Option<PartitionId>,
    /// The membership change that caused the rebalance round.
    pub discovery: DiscoveryEvent,
}

/// Receiver for rebalancing events.
pub trait EventSink: Send + Sync {
    /// Whether events of this kind should be built and published at all.
    fn is_recordable(&self, kind: RebalanceEventKind) -> bool {
        let _ = kind;
        true
    }

    /// Publish an event.
    fn publish(&self, event: RebalanceEvent);
}

/// Sink that drops all events.
#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn is_recordable(&self, _kind: RebalanceEventKind) -> bool {
        false
    }

    fn publish(&self, _event: RebalanceEvent) {}
}

/// Sink that logs events via `tracing`.
#[derive(Debug, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn publish(&self, event: RebalanceEvent) {
        match event.kind {
            RebalanceEventKind::ObjectLoaded => {
                tracing::trace!(
                    cache_id = event.cache_id,
                    partition = event.partition,
                    "Rebalanced entry installed"
                );
            }
            RebalanceEventKind::PartitionLoaded => {
                tracing::debug!(
                    cache_id = event.cache_id,
                    partition = event.partition,
                    "Partition fully loaded"
                );
            }
            RebalanceEventKind::Stopped => {
                tracing::info!(
                    cache_id = event.cache_id,
                    cause_node = event.discovery.node,
                    "Rebalancing stopped"
                );
            }
        }
    }
}
