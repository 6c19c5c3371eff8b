//! Wire messages of the demand/supply protocol.
//!
//! A demand message asks a supplier for a set of partitions; supply
//! messages stream the entries back in batches. An empty demand on the
//! same topic acknowledges a batch and solicits the next one, so there
//! is always exactly one outstanding batch per lane.

use crate::transport::Topic;
use crate::types::{CacheId, PartitionId, TopologyVersion};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A cache entry in flight between supplier and demander.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key.
    pub key: Vec<u8>,

    /// The cache value.
    pub value: Vec<u8>,

    /// Entry version used for conflict resolution against local writes.
    pub version: u64,

    /// Remaining time-to-live in milliseconds, if any.
    pub ttl_ms: Option<u64>,

    /// Absolute expiration time in milliseconds since UNIX epoch.
    /// None means no expiration.
    pub expire_time_ms: Option<u64>,
}

impl CacheEntry {
    /// Create an entry without expiration.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, version: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            version,
            ttl_ms: None,
            expire_time_ms: None,
        }
    }

    /// Create an entry with an absolute expiration time.
    pub fn with_expiration(
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        version: u64,
        ttl: Duration,
        expire_time_ms: u64,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            version,
            ttl_ms: Some(ttl.as_millis() as u64),
            expire_time_ms: Some(expire_time_ms),
        }
    }

    /// Whether the entry has already expired.
    pub fn is_expired(&self) -> bool {
        self.expire_time_ms.is_some_and(|expires| {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            expires <= now_ms
        })
    }

    /// Size of the entry payload in bytes.
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }

    /// The key as shared bytes.
    pub fn key_bytes(&self) -> Bytes {
        Bytes::from(self.key.clone())
    }

    /// The value as shared bytes.
    pub fn value_bytes(&self) -> Bytes {
        Bytes::from(self.value.clone())
    }
}

/// Demand message: a request for partitions, or (with an empty partition
/// set) the ack that solicits a supplier's next batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandMessage {
    /// Cache the demand belongs to.
    pub cache_id: CacheId,

    /// Topology version the demand is scoped to.
    pub topology_version: TopologyVersion,

    /// Sequence id of the rebalance round; stale replies are dropped.
    pub update_seq: u64,

    /// Per-message timeout in milliseconds.
    pub timeout_ms: u64,

    /// Partitions demanded. Empty for ack-and-continue demands.
    pub partitions: BTreeSet<PartitionId>,

    /// Lane topic replies must be routed to.
    pub topic: Topic,

    /// Legacy single-worker field, always 0 on the current protocol.
    pub worker_id: u16,
}

impl DemandMessage {
    /// Create an initial demand for a set of partitions.
    pub fn new(
        cache_id: CacheId,
        topology_version: TopologyVersion,
        update_seq: u64,
        timeout: Duration,
        partitions: BTreeSet<PartitionId>,
        topic: Topic,
    ) -> Self {
        Self {
            cache_id,
            topology_version,
            update_seq,
            timeout_ms: timeout.as_millis() as u64,
            partitions,
            topic,
            worker_id: 0,
        }
    }

    /// Create the empty follow-up demand that acknowledges a supply
    /// batch and asks for the next one.
    pub fn ack(
        cache_id: CacheId,
        topology_version: TopologyVersion,
        update_seq: u64,
        timeout: Duration,
        topic: Topic,
    ) -> Self {
        Self::new(
            cache_id,
            topology_version,
            update_seq,
            timeout,
            BTreeSet::new(),
            topic,
        )
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Supply message: one batch of entries from a supplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyMessage {
    /// Cache the supply belongs to.
    pub cache_id: CacheId,

    /// Topology version the batch was produced for.
    pub topology_version: TopologyVersion,

    /// Sequence id echoed from the demand.
    pub update_seq: u64,

    /// Entries grouped by partition.
    pub entries: HashMap<PartitionId, Vec<CacheEntry>>,

    /// Partitions the supplier could not provide.
    pub missed: HashSet<PartitionId>,

    /// Partitions for which this batch is the final one.
    pub last: HashSet<PartitionId>,

    /// Deserialization failure observed on the supplier side, if any.
    pub class_error: Option<String>,
}

impl SupplyMessage {
    /// Create an empty supply message for a round.
    pub fn new(cache_id: CacheId, topology_version: TopologyVersion, update_seq: u64) -> Self {
        Self {
            cache_id,
            topology_version,
            update_seq,
            entries: HashMap::new(),
            missed: HashSet::new(),
            last: HashSet::new(),
            class_error: None,
        }
    }

    /// Append entries for a partition.
    pub fn with_entries(mut self, partition: PartitionId, entries: Vec<CacheEntry>) -> Self {
        self.entries.entry(partition).or_default().extend(entries);
        self
    }

    /// Mark partitions as finished with this batch.
    pub fn with_last(mut self, parts: impl IntoIterator<Item = PartitionId>) -> Self {
        self.last.extend(parts);
        self
    }

    /// Mark partitions as missed.
    pub fn with_missed(mut self, parts: impl IntoIterator<Item = PartitionId>) -> Self {
        self.missed.extend(parts);
        self
    }

    /// Attach a class error.
    pub fn with_class_error(mut self, error: impl Into<String>) -> Self {
        self.class_error = Some(error.into());
        self
    }

    /// Total number of entries across all partitions.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Compact range rendering of a partition set for log lines,
/// e.g. `"0-2, 5, 8-9"`.
pub fn fmt_partitions<I>(parts: I) -> String
where
    I: IntoIterator<Item = PartitionId>,
{
    let mut sorted: Vec<PartitionId> = parts.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = String::new();
    let mut i = 0;
    while i < sorted.len() {
        let start = sorted[i];
        let mut end = start;
        while i + 1 < sorted.len() && sorted[i + 1] == end + 1 {
            i += 1;
            end = sorted[i];
        }
        if !out.is_empty() {
            out.push_str(", ");
        }
        if start == end {
            out.push_str(&start.to_string());
        } else {
            out.push_str(&format!("{}-{}", start, end));
        }
        i += 1;
    }
    out
}
