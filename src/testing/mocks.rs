//! In-memory collaborator implementations.
//!
//! Every external interface the core consumes has a mock here: a
//! settable affinity, a map-backed partition store, a transport that
//! records sent demands and can simulate departed peers, an exchange
//! manager that counts forced rounds, and a recording event sink.

use crate::error::{Error, Result, TransportError};
use crate::events::{EventSink, RebalanceEvent, RebalanceEventKind};
use crate::exchange::{ExchangeId, ExchangeManager, ExchangeRef};
use crate::rebalance::future::RebalanceFuture;
use crate::rebalance::messages::{CacheEntry, DemandMessage};
use crate::rebalance::ordering::CacheRegistry;
use crate::topology::{Affinity, LocalPartition, PartitionState, PartitionTopology};
use crate::transport::{Topic, Transport};
use crate::types::{NodeId, PartitionId, TopologyVersion};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Affinity with a settable version and local partition set.
#[derive(Debug)]
pub struct MockAffinity {
    version: Mutex<TopologyVersion>,
    local: Mutex<HashSet<PartitionId>>,
}

impl MockAffinity {
    /// Create an affinity at `version` hosting `local` partitions.
    pub fn new(version: TopologyVersion, local: impl IntoIterator<Item = PartitionId>) -> Self {
        Self {
            version: Mutex::new(version),
            local: Mutex::new(local.into_iter().collect()),
        }
    }

    /// Move the affinity to a new version.
    pub fn set_version(&self, version: TopologyVersion) {
        *self.version.lock() = version;
    }

    /// Advance to the next epoch, as a membership change would.
    pub fn advance_epoch(&self) {
        let mut version = self.version.lock();
        *version = version.next_epoch();
    }

    /// Replace the local partition set.
    pub fn set_local(&self, local: impl IntoIterator<Item = PartitionId>) {
        *self.local.lock() = local.into_iter().collect();
    }
}

impl Affinity for MockAffinity {
    fn is_local(&self, partition: PartitionId, _version: TopologyVersion) -> bool {
        self.local.lock().contains(&partition)
    }

    fn topology_version(&self) -> TopologyVersion {
        *self.version.lock()
    }
}

/// A map-backed local partition.
#[derive(Debug)]
pub struct MockPartition {
    id: PartitionId,
    state: Mutex<PartitionState>,
    entries: Mutex<HashMap<Vec<u8>, (Vec<u8>, u64)>>,
    reservations: AtomicI64,
    lock_depth: AtomicI64,
    invalid: AtomicBool,
    fail_install: AtomicBool,
    refuse_reserve: AtomicBool,
}

impl MockPartition {
    /// Create a moving partition.
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            state: Mutex::new(PartitionState::Moving),
            entries: Mutex::new(HashMap::new()),
            reservations: AtomicI64::new(0),
            lock_depth: AtomicI64::new(0),
            invalid: AtomicBool::new(false),
            fail_install: AtomicBool::new(false),
            refuse_reserve: AtomicBool::new(false),
        }
    }

    /// Set the partition state.
    pub fn set_state(&self, state: PartitionState) {
        *self.state.lock() = state;
    }

    /// Make `initial_value` report the partition invalid.
    pub fn set_invalid(&self, invalid: bool) {
        self.invalid.store(invalid, Ordering::SeqCst);
    }

    /// Make `initial_value` fail with a storage error.
    pub fn set_fail_install(&self, fail: bool) {
        self.fail_install.store(fail, Ordering::SeqCst);
    }

    /// Make `reserve` fail.
    pub fn set_refuse_reserve(&self, refuse: bool) {
        self.refuse_reserve.store(refuse, Ordering::SeqCst);
    }

    /// Stored `(value, version)` for a key.
    pub fn get(&self, key: &[u8]) -> Option<(Vec<u8>, u64)> {
        self.entries.lock().get(key).cloned()
    }

    /// Write a local value directly, bypassing rebalancing.
    pub fn put_local(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, version: u64) {
        self.entries
            .lock()
            .insert(key.into(), (value.into(), version));
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the partition holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Full snapshot of the stored entries.
    pub fn snapshot(&self) -> HashMap<Vec<u8>, (Vec<u8>, u64)> {
        self.entries.lock().clone()
    }

    /// Outstanding reservations; zero when every guard was released.
    pub fn reservation_count(&self) -> i64 {
        self.reservations.load(Ordering::SeqCst)
    }

    /// Current lock depth; zero when every guard was released.
    pub fn lock_depth(&self) -> i64 {
        self.lock_depth.load(Ordering::SeqCst)
    }
}

impl LocalPartition for MockPartition {
    fn id(&self) -> PartitionId {
        self.id
    }

    fn state(&self) -> PartitionState {
        *self.state.lock()
    }

    fn reserve(&self) -> bool {
        if self.refuse_reserve.load(Ordering::SeqCst) {
            return false;
        }
        self.reservations.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn release(&self) {
        self.reservations.fetch_sub(1, Ordering::SeqCst);
    }

    fn lock(&self) {
        self.lock_depth.fetch_add(1, Ordering::SeqCst);
    }

    fn unlock(&self) {
        self.lock_depth.fetch_sub(1, Ordering::SeqCst);
    }

    fn preloading_permitted(&self, key: &[u8], version: u64) -> bool {
        self.entries
            .lock()
            .get(key)
            .map_or(true, |(_, local)| *local < version)
    }

    fn initial_value(&self, entry: &CacheEntry, _version: TopologyVersion) -> Result<bool> {
        if self.invalid.load(Ordering::SeqCst) {
            return Err(Error::InvalidPartition(self.id));
        }
        if self.fail_install.load(Ordering::SeqCst) {
            return Err(Error::Storage("simulated install failure".to_owned()));
        }

        let mut entries = self.entries.lock();
        match entries.get(&entry.key) {
            Some((_, local)) if *local >= entry.version => Ok(false),
            _ => {
                entries.insert(entry.key.clone(), (entry.value.clone(), entry.version));
                Ok(true)
            }
        }
    }

    fn touch(&self, _key: &[u8]) {}
}

/// Partition store that creates moving partitions on demand.
#[derive(Debug, Default)]
pub struct MockTopology {
    parts: Mutex<HashMap<PartitionId, Arc<MockPartition>>>,
    owned: Mutex<Vec<PartitionId>>,
}

impl MockTopology {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (creating if absent) the mock partition, for assertions and
    /// pre-test setup.
    pub fn partition(&self, id: PartitionId) -> Arc<MockPartition> {
        self.parts
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(MockPartition::new(id)))
            .clone()
    }

    /// Partitions transitioned to owning, in order.
    pub fn owned(&self) -> Vec<PartitionId> {
        self.owned.lock().clone()
    }
}

impl PartitionTopology for MockTopology {
    fn local_partition(
        &self,
        partition: PartitionId,
        _version: TopologyVersion,
    ) -> Option<Arc<dyn LocalPartition>> {
        Some(self.partition(partition))
    }

    fn own(&self, partition: PartitionId) -> bool {
        let part = self.partition(partition);
        if part.state() != PartitionState::Moving {
            return false;
        }
        part.set_state(PartitionState::Owning);
        self.owned.lock().push(partition);
        true
    }
}

/// A demand message captured by the recording transport.
#[derive(Debug, Clone)]
pub struct SentDemand {
    /// Destination node.
    pub node: NodeId,
    /// Topic the message was routed to.
    pub topic: Topic,
    /// The message.
    pub msg: DemandMessage,
}

/// Transport that records sent demands and can simulate departed peers.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentDemand>>,
    departed: Mutex<HashSet<NodeId>>,
}

impl RecordingTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sends to `node` fail with [`TransportError::NodeLeft`].
    pub fn depart(&self, node: NodeId) {
        self.departed.lock().insert(node);
    }

    /// All captured sends.
    pub fn sent(&self) -> Vec<SentDemand> {
        self.sent.lock().clone()
    }

    /// Captured sends addressed to `node`.
    pub fn sent_to(&self, node: NodeId) -> Vec<SentDemand> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.node == node)
            .cloned()
            .collect()
    }

    /// Captured initial demands (non-empty partition sets).
    pub fn demands(&self) -> Vec<SentDemand> {
        self.sent
            .lock()
            .iter()
            .filter(|s| !s.msg.partitions.is_empty())
            .cloned()
            .collect()
    }

    /// Number of captured ack-and-continue demands.
    pub fn ack_count(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.msg.partitions.is_empty())
            .count()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_ordered(
        &self,
        node: NodeId,
        topic: Topic,
        msg: DemandMessage,
        _timeout: Duration,
    ) -> std::result::Result<(), TransportError> {
        if self.departed.lock().contains(&node) {
            return Err(TransportError::NodeLeft(node));
        }
        self.sent.lock().push(SentDemand { node, topic, msg });
        Ok(())
    }
}

/// Exchange manager that counts forced rounds.
#[derive(Debug, Default)]
pub struct MockExchange {
    pending: AtomicBool,
    preload_exchanges: Mutex<Vec<ExchangeId>>,
    dummy_exchanges: Mutex<Vec<ExchangeId>>,
    resend_scheduled: AtomicUsize,
}

impl MockExchange {
    /// Create an exchange manager with no pending round.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a newer round as pending.
    pub fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    /// Number of forced preload exchanges.
    pub fn preload_exchange_count(&self) -> usize {
        self.preload_exchanges.lock().len()
    }

    /// Number of forced dummy exchanges.
    pub fn dummy_exchange_count(&self) -> usize {
        self.dummy_exchanges.lock().len()
    }

    /// Number of scheduled partition-map resends.
    pub fn resend_count(&self) -> usize {
        self.resend_scheduled.load(Ordering::SeqCst)
    }
}

impl ExchangeManager for MockExchange {
    fn has_pending_exchange(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    fn force_preload_exchange(&self, exchange: &ExchangeRef) {
        self.preload_exchanges.lock().push(exchange.id);
    }

    fn force_dummy_exchange(&self, exchange: &ExchangeRef) {
        self.dummy_exchanges.lock().push(exchange.id);
    }

    fn schedule_resend_partitions(&self) {
        self.resend_scheduled.fetch_add(1, Ordering::SeqCst);
    }
}

/// Event sink that records every published event.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<RebalanceEvent>>,
}

impl RecordingEventSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events.
    pub fn events(&self) -> Vec<RebalanceEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events of one kind.
    pub fn count(&self, kind: RebalanceEventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: RebalanceEvent) {
        self.events.lock().push(event);
    }
}

/// Registry backed by a name-to-future map.
#[derive(Debug, Default)]
pub struct MapCacheRegistry {
    futures: Mutex<HashMap<String, Arc<RebalanceFuture>>>,
}

impl MapCacheRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache's current future under `name`.
    pub fn insert(&self, name: impl Into<String>, fut: Arc<RebalanceFuture>) {
        self.futures.lock().insert(name.into(), fut);
    }
}

impl CacheRegistry for MapCacheRegistry {
    fn rebalance_future(&self, cache: &str) -> Option<Arc<RebalanceFuture>> {
        self.futures.lock().get(cache).cloned()
    }
}
