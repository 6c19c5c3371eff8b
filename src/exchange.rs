//! Interface onto the partition exchange manager.
//!
//! The exchange manager owns the cluster-wide assignment rounds. The
//! demander only needs to know whether a newer round is pending, and to
//! be able to request synthetic rounds: a forced preload exchange (the
//! retry knob) and a dummy exchange (the completion side-effect that
//! re-assigns missed partitions).

use crate::types::{DiscoveryEvent, TopologyVersion};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of one exchange round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    /// Create a fresh exchange id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Back-reference to the exchange round that produced an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeRef {
    /// The round's identifier.
    pub id: ExchangeId,
    /// Topology version the round was stamped with.
    pub topology_version: TopologyVersion,
    /// The membership change that triggered the round.
    pub discovery: DiscoveryEvent,
}

impl ExchangeRef {
    /// Create a new exchange reference.
    pub fn new(topology_version: TopologyVersion, discovery: DiscoveryEvent) -> Self {
        Self {
            id: ExchangeId::new(),
            topology_version,
            discovery,
        }
    }
}

/// The exchange manager, as consumed by the demander.
pub trait ExchangeManager: Send + Sync {
    /// Whether a newer exchange round is already queued. Assignments for
    /// older rounds are obsolete and must not be acted on.
    fn has_pending_exchange(&self) -> bool;

    /// Force a preload exchange for the given round. Used by the retry
    /// timer and by `force_preload`.
    fn force_preload_exchange(&self, exchange: &ExchangeRef);

    /// Force a dummy exchange so missed partitions get re-assigned.
    fn force_dummy_exchange(&self, exchange: &ExchangeRef);

    /// Schedule a broadcast of the local partition map after a clean
    /// completion.
    fn schedule_resend_partitions(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiscoveryEventKind;

    #[test]
    fn test_exchange_ids_are_unique() {
        assert_ne!(ExchangeId::new(), ExchangeId::new());
    }

    #[test]
    fn test_exchange_ref() {
        let ver = TopologyVersion::new(5, 0);
        let ev = DiscoveryEvent::new(3, DiscoveryEventKind::Left, 1_000);
        let exchange = ExchangeRef::new(ver, ev);
        assert_eq!(exchange.topology_version, ver);
        assert_eq!(exchange.discovery.node, 3);
    }
}
