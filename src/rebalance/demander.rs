//! The demander: per-cache driver of the demand/supply protocol.
//!
//! On every assignment round the demander creates a fresh
//! [`RebalanceFuture`], splits each supplier's partition set across the
//! configured demand lanes, and sends one demand message per lane over
//! the ordered transport. Suppliers stream entries back in batches; each
//! batch is applied into the local moving partitions and acknowledged
//! with an empty demand on the same lane topic, which solicits the next
//! batch. Flow control falls out of the loop: there is exactly one
//! outstanding batch per lane.
//!
//! Message handlers run on the transport's dispatcher threads; all
//! per-round state lives in the future and is linearized by its mutex.

use crate::error::{Error, Result};
use crate::events::{RebalanceEvent, RebalanceEventKind};
use crate::exchange::ExchangeRef;
use crate::rebalance::assignments::AssignmentBatch;
use crate::rebalance::context::CacheContext;
use crate::rebalance::demand_lock::DemandLock;
use crate::rebalance::future::{RebalanceFuture, RebalanceResult};
use crate::rebalance::messages::{fmt_partitions, CacheEntry, DemandMessage, SupplyMessage};
use crate::rebalance::ordering::{CacheRegistry, OrderingGate};
use crate::rebalance::timer::RetryTimer;
use crate::topology::{PartitionState, ReservedPartition};
use crate::transport::rebalance_topic;
use crate::types::{NodeId, PartitionId, TopologyVersion};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Predicate consulted before installing each rebalanced entry.
pub type PreloadFilter = Box<dyn Fn(&CacheEntry) -> bool + Send + Sync>;

/// Per-cache rebalancing driver.
pub struct Demander {
    ctx: Arc<CacheContext>,
    registry: Arc<dyn CacheRegistry>,
    demand_lock: Arc<DemandLock>,
    sync_fut: RwLock<Arc<RebalanceFuture>>,
    update_seq: AtomicU64,
    retry_timer: RetryTimer,
    last_exchange: Mutex<Option<ExchangeRef>>,
    preload_filter: Mutex<Option<PreloadFilter>>,
}

impl Demander {
    /// Create a demander for one cache.
    ///
    /// When rebalancing is disabled by configuration, the initial future
    /// completes immediately; otherwise it stays pending and inherits
    /// the result of the first real round.
    pub fn new(
        ctx: Arc<CacheContext>,
        registry: Arc<dyn CacheRegistry>,
        demand_lock: Arc<DemandLock>,
    ) -> Result<Self> {
        ctx.config.validate()?;

        let initial = Arc::new(RebalanceFuture::new_initial());
        if !ctx.config.enabled() {
            initial.force_complete(RebalanceResult::Succeeded);
        }

        Ok(Self {
            ctx,
            registry,
            demand_lock,
            sync_fut: RwLock::new(initial),
            update_seq: AtomicU64::new(0),
            retry_timer: RetryTimer::new(),
            last_exchange: Mutex::new(None),
            preload_filter: Mutex::new(None),
        })
    }

    /// The current rebalance future. May be the initial placeholder when
    /// no assignment has arrived yet or rebalancing is disabled.
    pub fn sync_future(&self) -> Arc<RebalanceFuture> {
        self.sync_fut.read().clone()
    }

    /// The demand lock shared with the local update path.
    pub fn demand_lock(&self) -> &Arc<DemandLock> {
        &self.demand_lock
    }

    /// Per-cache rebalance metrics.
    pub fn metrics(&self) -> &crate::metrics::RebalanceMetrics {
        &self.ctx.metrics
    }

    /// Install a predicate that filters entries before installation.
    pub fn set_preload_filter(&self, filter: PreloadFilter) {
        *self.preload_filter.lock() = Some(filter);
    }

    /// Record the latest exchange round observed by this node. Needed so
    /// deferred and forced preloads know which round to re-trigger.
    pub fn update_last_exchange(&self, exchange: ExchangeRef) {
        *self.last_exchange.lock() = Some(exchange);
    }

    /// Cancel the current round when a later topology version has been
    /// observed by the discovery layer.
    pub fn on_topology_changed(&self, version: TopologyVersion) {
        let fut = self.sync_future();
        if let Some(current) = fut.topology_version() {
            if version > current {
                fut.cancel();
            }
        }
    }

    /// Cancel any armed delay timer and force a preload exchange for the
    /// latest known round.
    pub fn force_preload(&self) {
        self.retry_timer.cancel();

        let exchange = *self.last_exchange.lock();
        match exchange {
            Some(exchange) => {
                tracing::debug!(
                    cache = %self.ctx.config.cache_name,
                    exchange = %exchange.id,
                    "Forcing rebalance exchange"
                );
                self.ctx.exchange.force_preload_exchange(&exchange);
            }
            None => {
                tracing::debug!(
                    cache = %self.ctx.config.cache_name,
                    "Ignoring force rebalance request (no topology event happened yet)"
                );
            }
        }
    }

    /// Shut the demander down: cancel the current round and disarm the
    /// retry timer.
    pub fn stop(&self) {
        self.sync_future().cancel();
        self.retry_timer.cancel();
        *self.last_exchange.lock() = None;
    }

    /// Whether the round `fut` tracks has been overtaken: the affinity
    /// topology moved past it, or a newer future replaced it (a dummy
    /// exchange on the same topology).
    fn topology_changed(&self, fut: &Arc<RebalanceFuture>) -> bool {
        let Some(top_ver) = fut.topology_version() else {
            return true;
        };
        self.ctx.affinity.topology_version() != top_ver
            || !Arc::ptr_eq(fut, &self.sync_fut.read())
    }

    /// Accept a new assignment round.
    ///
    /// Returns the work item that drives the round (pass it to
    /// [`Demander::run`] on whatever executor the caller owns), or
    /// `None` when nothing is to be done: the batch was empty or
    /// obsolete, or the round was deferred behind the configured delay.
    pub fn add_assignments(
        &self,
        batch: AssignmentBatch,
        force: bool,
        before_caches: Vec<String>,
    ) -> Option<RebalanceTask> {
        tracing::debug!(
            cache = %self.ctx.config.cache_name,
            topology = %batch.topology_version(),
            suppliers = batch.supplier_count(),
            partitions = batch.partition_count(),
            "Adding partition assignments"
        );

        self.update_last_exchange(*batch.exchange());

        let delay = self.ctx.config.delay;
        if delay.is_zero() || force {
            let old = self.sync_future();
            let seq = self.update_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let fut = Arc::new(RebalanceFuture::new(
                self.ctx.clone(),
                *batch.exchange(),
                old.is_initial(),
                seq,
            ));
            self.ctx.metrics.rounds_started.inc();

            if old.is_initial() {
                // The placeholder inherits the first real round's result.
                let old = old.clone();
                fut.on_complete(move |result| old.force_complete(result));
            } else {
                old.cancel();
            }

            *self.sync_fut.write() = fut.clone();

            if self.ctx.exchange.has_pending_exchange() {
                tracing::info!(
                    cache = %self.ctx.config.cache_name,
                    topology = %batch.topology_version(),
                    "Skipping obsolete exchange"
                );
                fut.cancel();
                return None;
            }

            if batch.is_empty() {
                fut.done_if_empty();
                return None;
            }

            if self.topology_changed(&fut) {
                fut.cancel();
                return None;
            }

            Some(RebalanceTask {
                fut,
                batch,
                before_caches,
            })
        } else {
            // Deferred: arm (or re-arm) the one-shot timer that forces a
            // fresh exchange once the delay elapses.
            let exchange = (*self.last_exchange.lock()).unwrap_or(*batch.exchange());
            let manager = self.ctx.exchange.clone();
            self.retry_timer
                .schedule(delay, move || manager.force_preload_exchange(&exchange));
            None
        }
    }

    /// Drive a work item produced by [`Demander::add_assignments`]:
    /// wait out the ordering dependencies, then send the demand
    /// messages for the round.
    ///
    /// Returns false when the round was abandoned before any demand
    /// message went out.
    pub async fn run(&self, task: RebalanceTask) -> bool {
        let gate = OrderingGate::new(self.registry.clone());

        for cache in &task.before_caches {
            gate.wait_for(cache, &task.fut, || self.topology_changed(&task.fut))
                .await;

            if task.fut.is_done() {
                return false;
            }
        }

        self.request_partitions(&task.fut, &task.batch).await;
        true
    }

    /// Send the demand messages for a round.
    async fn request_partitions(&self, fut: &Arc<RebalanceFuture>, batch: &AssignmentBatch) {
        let config = &self.ctx.config;
        let lanes = config.thread_pool_size;

        for (supplier, parts) in batch.iter() {
            if self.topology_changed(fut) {
                fut.cancel();
                return;
            }
            if fut.is_done() {
                return;
            }

            tracing::info!(
                cache = %config.cache_name,
                mode = ?config.mode,
                from_node = supplier,
                partitions = parts.len(),
                topology = %batch.topology_version(),
                update_seq = fut.update_seq(),
                "Starting rebalancing"
            );

            fut.append_partitions(supplier, parts.clone());

            let mut lane_parts: Vec<BTreeSet<PartitionId>> = vec![BTreeSet::new(); lanes];
            for &p in parts {
                lane_parts[p as usize % lanes].insert(p);
            }

            for (lane, set) in lane_parts.into_iter().enumerate() {
                if set.is_empty() {
                    continue;
                }

                let topic = rebalance_topic(lane);
                let msg = DemandMessage::new(
                    config.cache_id,
                    batch.topology_version(),
                    fut.update_seq(),
                    config.timeout,
                    set.clone(),
                    topic,
                );

                match self
                    .ctx
                    .transport
                    .send_ordered(supplier, topic, msg, config.timeout)
                    .await
                {
                    Ok(()) => {
                        tracing::debug!(
                            from_node = supplier,
                            lane,
                            count = set.len(),
                            partitions = %fmt_partitions(set.iter().copied()),
                            "Requested rebalancing"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            cache = %config.cache_name,
                            from_node = supplier,
                            lane,
                            error = %e,
                            "Failed to send partition demand message"
                        );
                        fut.cancel();
                        break;
                    }
                }
            }
        }
    }

    /// Handle one supply batch arriving on a demand lane.
    pub async fn handle_supply_message(
        &self,
        lane: usize,
        supplier: NodeId,
        supply: SupplyMessage,
    ) {
        let fut = self.sync_future();

        if fut.is_initial() || !fut.is_actual(supply.update_seq) {
            // Supply message from a previous round.
            return;
        }

        if self.topology_changed(&fut) {
            fut.cancel();
            return;
        }

        tracing::debug!(
            cache = %self.ctx.config.cache_name,
            from_node = supplier,
            lane,
            entries = supply.entry_count(),
            last = supply.last.len(),
            missed = supply.missed.len(),
            "Received supply message"
        );

        if let Some(class_error) = &supply.class_error {
            tracing::debug!(
                from_node = supplier,
                error = %class_error,
                "Supply message carried a deserialization error"
            );
            fut.cancel_supplier(supplier);
            return;
        }

        let Some(top_ver) = fut.topology_version() else {
            return;
        };

        {
            // Entry application for this batch runs under the read side
            // of the cache-wide demand lock.
            let _applying = self.demand_lock.read().await;

            for (&p, entries) in &supply.entries {
                if !self.ctx.affinity.is_local(p, top_ver) {
                    tracing::debug!(
                        partition = p,
                        "Skipping rebalanced partition (it does not belong on this node)"
                    );
                    fut.partition_done(supplier, p);
                    continue;
                }

                let Some(part) = self.ctx.topology.local_partition(p, top_ver) else {
                    fut.partition_done(supplier, p);
                    continue;
                };

                if part.state() != PartitionState::Moving {
                    tracing::debug!(
                        partition = p,
                        state = %part.state(),
                        "Skipping rebalanced partition (state is not moving)"
                    );
                    fut.partition_done(supplier, p);
                    continue;
                }

                let Some(reserved) = ReservedPartition::acquire(part) else {
                    tracing::warn!(
                        cache = %self.ctx.config.cache_name,
                        partition = p,
                        "Failed to reserve partition, skipping its batch"
                    );
                    fut.partition_done(supplier, p);
                    continue;
                };

                for entry in entries {
                    if !reserved
                        .partition()
                        .preloading_permitted(&entry.key, entry.version)
                    {
                        tracing::debug!(
                            partition = p,
                            version = entry.version,
                            "Preloading not permitted for entry due to a newer local write"
                        );
                        continue;
                    }

                    match self.preload_entry(&fut, p, entry, top_ver, &reserved) {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::debug!(
                                partition = p,
                                "Got entries for an invalid partition, skipping the rest"
                            );
                            break;
                        }
                        Err(e) => {
                            tracing::error!(
                                cache = %self.ctx.config.cache_name,
                                from_node = supplier,
                                partition = p,
                                error = %e,
                                "Failed to install rebalanced entry"
                            );
                            drop(reserved);
                            fut.cancel_supplier(supplier);
                            return;
                        }
                    }
                }

                // Last batch for this partition: take ownership.
                if supply.last.contains(&p) {
                    self.ctx.topology.own(p);
                    fut.partition_done(supplier, p);
                    tracing::debug!(partition = p, "Finished rebalancing partition");
                }

                drop(reserved);
            }
        }

        // Missed partitions count as settled with this supplier; only
        // those still local are recorded for re-assignment.
        for &p in &supply.missed {
            if self.ctx.affinity.is_local(p, top_ver) {
                fut.partition_missed(supplier, p);
            }
        }
        for &p in &supply.missed {
            fut.partition_done(supplier, p);
        }

        if !self.topology_changed(&fut) && !fut.is_done() {
            // Ack-and-continue: an empty demand on the same lane topic
            // solicits the supplier's next batch.
            let topic = rebalance_topic(lane);
            let ack = DemandMessage::ack(
                self.ctx.config.cache_id,
                top_ver,
                supply.update_seq,
                self.ctx.config.timeout,
                topic,
            );
            if let Err(e) = self
                .ctx
                .transport
                .send_ordered(supplier, topic, ack, self.ctx.config.timeout)
                .await
            {
                if e.is_node_left() {
                    tracing::debug!(
                        from_node = supplier,
                        error = %e,
                        "Node left during rebalancing"
                    );
                } else {
                    tracing::error!(
                        cache = %self.ctx.config.cache_name,
                        from_node = supplier,
                        error = %e,
                        "Failed to acknowledge supply message"
                    );
                }
                fut.cancel_supplier(supplier);
            }
        } else {
            fut.cancel();
        }
    }

    /// Install one entry into a reserved moving partition.
    ///
    /// Returns `Ok(false)` when the partition turned invalid and the rest
    /// of its batch must be skipped.
    fn preload_entry(
        &self,
        fut: &RebalanceFuture,
        partition: PartitionId,
        entry: &CacheEntry,
        top_ver: TopologyVersion,
        reserved: &ReservedPartition,
    ) -> Result<bool> {
        if let Some(filter) = &*self.preload_filter.lock() {
            if !filter(entry) {
                tracing::debug!(partition, "Preload filter rejected entry");
                return Ok(true);
            }
        }

        match reserved.partition().initial_value(entry, top_ver) {
            Ok(true) => {
                reserved.partition().touch(&entry.key);
                self.ctx.metrics.entries_loaded.inc();

                if self.ctx.events.is_recordable(RebalanceEventKind::ObjectLoaded) {
                    if let Some(exchange) = fut.exchange() {
                        self.ctx.events.publish(RebalanceEvent {
                            kind: RebalanceEventKind::ObjectLoaded,
                            cache_id: self.ctx.config.cache_id,
                            partition: Some(partition),
                            discovery: exchange.discovery,
                        });
                    }
                }
                Ok(true)
            }
            Ok(false) => {
                tracing::debug!(partition, "Rebalanced entry already in cache, ignoring");
                Ok(true)
            }
            Err(Error::InvalidPartition(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Demander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demander")
            .field("cache", &self.ctx.config.cache_name)
            .field("update_seq", &self.update_seq.load(Ordering::SeqCst))
            .field("sync_fut", &*self.sync_fut.read())
            .finish()
    }
}

/// Work item produced by [`Demander::add_assignments`] and driven by
/// [`Demander::run`]: the round's future, its assignment batch, and the
/// caches that must finish rebalancing first.
pub struct RebalanceTask {
    fut: Arc<RebalanceFuture>,
    batch: AssignmentBatch,
    before_caches: Vec<String>,
}

impl RebalanceTask {
    /// The future the task drives.
    pub fn future(&self) -> &Arc<RebalanceFuture> {
        &self.fut
    }
}

impl std::fmt::Debug for RebalanceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebalanceTask")
            .field("topology", &self.batch.topology_version())
            .field("update_seq", &self.fut.update_seq())
            .field("before_caches", &self.before_caches)
            .finish()
    }
}
