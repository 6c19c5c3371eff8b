//! Assignment batches produced by the exchange layer.

use crate::exchange::ExchangeRef;
use crate::types::{NodeId, PartitionId, TopologyVersion};
use std::collections::{HashMap, HashSet};

/// Immutable supplier-to-partitions map for one exchange round.
///
/// Each partition this node must acquire appears under exactly one
/// supplier. An empty batch is legal and means nothing needs to move.
#[derive(Debug, Clone)]
pub struct AssignmentBatch {
    exchange: ExchangeRef,
    per_supplier: HashMap<NodeId, HashSet<PartitionId>>,
}

impl AssignmentBatch {
    /// Create a batch for the given exchange round.
    pub fn new(exchange: ExchangeRef) -> Self {
        Self {
            exchange,
            per_supplier: HashMap::new(),
        }
    }

    /// Assign partitions to a supplier, merging with any previous
    /// assignment for the same node.
    pub fn assign(mut self, supplier: NodeId, parts: impl IntoIterator<Item = PartitionId>) -> Self {
        self.per_supplier.entry(supplier).or_default().extend(parts);
        self
    }

    /// Topology version the batch was produced for.
    pub fn topology_version(&self) -> TopologyVersion {
        self.exchange.topology_version
    }

    /// The exchange round that produced this batch.
    pub fn exchange(&self) -> &ExchangeRef {
        &self.exchange
    }

    /// Whether no data needs to move.
    pub fn is_empty(&self) -> bool {
        self.per_supplier.is_empty()
    }

    /// Number of suppliers.
    pub fn supplier_count(&self) -> usize {
        self.per_supplier.len()
    }

    /// Total number of partitions across all suppliers.
    pub fn partition_count(&self) -> usize {
        self.per_supplier.values().map(HashSet::len).sum()
    }

    /// Iterate over `(supplier, partitions)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &HashSet<PartitionId>)> {
        self.per_supplier.iter().map(|(node, parts)| (*node, parts))
    }
}
