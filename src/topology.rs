//! Interfaces onto the local partition topology.
//!
//! The rebalancing core does not own partition storage. It consumes the
//! affinity function and the local partition store through the traits
//! below, and installs received entries under a scoped
//! reserve-then-lock pair ([`ReservedPartition`]) so a partition can
//! never be evicted or concurrently rented while a supply batch is being
//! applied to it.

use crate::error::Result;
use crate::rebalance::messages::CacheEntry;
use crate::types::{PartitionId, TopologyVersion};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a local partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionState {
    /// The partition is being filled by rebalancing; writes from the
    /// demander are permitted.
    Moving,
    /// The partition is fully loaded and serves reads.
    Owning,
    /// The partition is being handed off to another node.
    Renting,
    /// The partition has been evicted from this node.
    Evicted,
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionState::Moving => write!(f, "moving"),
            PartitionState::Owning => write!(f, "owning"),
            PartitionState::Renting => write!(f, "renting"),
            PartitionState::Evicted => write!(f, "evicted"),
        }
    }
}

/// The affinity function: which partitions live where, per topology
/// version.
pub trait Affinity: Send + Sync {
    /// Whether this node hosts `partition` at `version`.
    fn is_local(&self, partition: PartitionId, version: TopologyVersion) -> bool;

    /// The current affinity topology version.
    fn topology_version(&self) -> TopologyVersion;
}

/// One local partition, lent out by the partition store.
pub trait LocalPartition: Send + Sync {
    /// The partition identifier.
    fn id(&self) -> PartitionId;

    /// Current lifecycle state.
    fn state(&self) -> PartitionState;

    /// Bump the reservation counter that blocks eviction. Returns false
    /// when the partition is already past the point of no return.
    fn reserve(&self) -> bool;

    /// Drop one reservation.
    fn release(&self);

    /// Take the partition's update lock.
    fn lock(&self);

    /// Release the partition's update lock.
    fn unlock(&self);

    /// Whether a rebalanced entry for `key` may be installed, i.e. no
    /// newer local write exists for it.
    fn preloading_permitted(&self, key: &[u8], version: u64) -> bool;

    /// Install an entry received from a supplier. Returns true when the
    /// value was installed, false when a local value took precedence.
    fn initial_value(&self, entry: &CacheEntry, version: TopologyVersion) -> Result<bool>;

    /// Register the key with the evictor after a successful install.
    fn touch(&self, key: &[u8]);
}

/// The local partition store for one cache.
pub trait PartitionTopology: Send + Sync {
    /// Get (creating if absent) the local partition `partition` at
    /// `version`. Returns `None` when the partition cannot exist on this
    /// node at that version.
    fn local_partition(
        &self,
        partition: PartitionId,
        version: TopologyVersion,
    ) -> Option<Arc<dyn LocalPartition>>;

    /// Transition a moving partition to owning. Returns false when the
    /// partition was not in a state that allows the transition.
    fn own(&self, partition: PartitionId) -> bool;
}

/// Scoped reserve-then-lock over a local partition.
///
/// Dropping the guard unlocks and releases on every exit path,
/// including unwinding.
pub struct ReservedPartition {
    part: Arc<dyn LocalPartition>,
}

impl ReservedPartition {
    /// Reserve and lock `part`. Returns `None` when the reservation
    /// fails (the partition is being evicted).
    pub fn acquire(part: Arc<dyn LocalPartition>) -> Option<Self> {
        if !part.reserve() {
            return None;
        }
        part.lock();
        Some(Self { part })
    }

    /// The underlying partition.
    pub fn partition(&self) -> &dyn LocalPartition {
        self.part.as_ref()
    }
}

impl Drop for ReservedPartition {
    fn drop(&mut self) {
        self.part.unlock();
        self.part.release();
    }
}

impl fmt::Debug for ReservedPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservedPartition")
            .field("partition", &self.part.id())
            .finish()
    }
}
