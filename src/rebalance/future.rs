//! Per-round completion tracking.
//!
//! A [`RebalanceFuture`] is created for every assignment round and is the
//! single synchronization point of that round: it tracks which partitions
//! are still expected from which supplier, records partitions the
//! suppliers could not provide, and decides the round's outcome when the
//! last partition settles. A supply message is applied against a future
//! only when it carries the future's `update_seq`, which is how stale
//! rounds are discarded.

use crate::config::CacheMode;
use crate::events::{RebalanceEvent, RebalanceEventKind};
use crate::exchange::ExchangeRef;
use crate::rebalance::context::CacheContext;
use crate::types::{NodeId, PartitionId, TopologyVersion};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Terminal outcome of a rebalance round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceResult {
    /// Every expected partition was received (or the round became moot
    /// because the topology moved on).
    Succeeded,
    /// The round finished but some partitions were missed; a dummy
    /// exchange has been requested to re-assign them.
    Missed,
    /// The round was cancelled before any outcome could be computed
    /// (demander shutdown, or the initial placeholder being discarded).
    Cancelled,
}

impl RebalanceResult {
    /// Boolean view: did the round leave nothing behind?
    pub fn is_success(self) -> bool {
        matches!(self, RebalanceResult::Succeeded)
    }
}

/// Continuation invoked when the future completes.
type Listener = Box<dyn FnOnce(RebalanceResult) + Send>;

/// What a supplier still owes this round.
struct SupplierProgress {
    started_at: Instant,
    parts: HashSet<PartitionId>,
}

/// Mutable state, linearized by one mutex.
struct FutureInner {
    remaining: HashMap<NodeId, SupplierProgress>,
    missed: HashMap<NodeId, HashSet<PartitionId>>,
    result: Option<RebalanceResult>,
    listeners: Vec<Listener>,
}

/// Side effects computed under the mutex and executed outside it.
struct Finish {
    result: RebalanceResult,
    listeners: Vec<Listener>,
    events: Vec<RebalanceEvent>,
    /// Request a dummy exchange for the missed partitions.
    force_dummy: bool,
    /// Schedule the partition-map broadcast after a clean finish.
    schedule_resend: bool,
    missed_union: HashSet<PartitionId>,
}

/// Completion object for one rebalance round.
///
/// The *initial* future (created with the demander, before any topology
/// event) has no topology version and is completed by the first real
/// round — or immediately, when rebalancing is disabled.
pub struct RebalanceFuture {
    ctx: Option<Arc<CacheContext>>,
    exchange: Option<ExchangeRef>,
    topology_version: Option<TopologyVersion>,
    send_stopped_event: bool,
    update_seq: u64,
    inner: Mutex<FutureInner>,
    done_tx: watch::Sender<Option<RebalanceResult>>,
}

impl RebalanceFuture {
    /// Create the future for a real assignment round.
    pub(crate) fn new(
        ctx: Arc<CacheContext>,
        exchange: ExchangeRef,
        send_stopped_event: bool,
        update_seq: u64,
    ) -> Self {
        let (done_tx, _) = watch::channel(None);
        Self {
            topology_version: Some(exchange.topology_version),
            ctx: Some(ctx),
            exchange: Some(exchange),
            send_stopped_event,
            update_seq,
            inner: Mutex::new(FutureInner {
                remaining: HashMap::new(),
                missed: HashMap::new(),
                result: None,
                listeners: Vec::new(),
            }),
            done_tx,
        }
    }

    /// Create the initial placeholder future.
    pub(crate) fn new_initial() -> Self {
        let (done_tx, _) = watch::channel(None);
        Self {
            ctx: None,
            exchange: None,
            topology_version: None,
            send_stopped_event: false,
            update_seq: 0,
            inner: Mutex::new(FutureInner {
                remaining: HashMap::new(),
                missed: HashMap::new(),
                result: None,
                listeners: Vec::new(),
            }),
            done_tx,
        }
    }

    /// Whether this is the initial placeholder.
    pub fn is_initial(&self) -> bool {
        self.topology_version.is_none()
    }

    /// Topology version of the round, `None` for the initial future.
    pub fn topology_version(&self) -> Option<TopologyVersion> {
        self.topology_version
    }

    /// The exchange round behind this future, `None` for the initial one.
    pub fn exchange(&self) -> Option<&ExchangeRef> {
        self.exchange.as_ref()
    }

    /// Round sequence id.
    pub fn update_seq(&self) -> u64 {
        self.update_seq
    }

    /// Whether a message stamped with `seq` belongs to this round.
    pub fn is_actual(&self, seq: u64) -> bool {
        self.update_seq == seq
    }

    /// Whether a terminal result has been published.
    pub fn is_done(&self) -> bool {
        self.inner.lock().result.is_some()
    }

    /// The terminal result, if any.
    pub fn result(&self) -> Option<RebalanceResult> {
        self.inner.lock().result
    }

    /// Number of suppliers this round is still waiting on.
    pub fn remaining_suppliers(&self) -> usize {
        self.inner.lock().remaining.len()
    }

    /// Union of missed partitions across suppliers, as recorded so far.
    pub fn missed_partitions(&self) -> HashSet<PartitionId> {
        let inner = self.inner.lock();
        inner.missed.values().flatten().copied().collect()
    }

    /// Register the partitions expected from a supplier. Must precede any
    /// `partition_done` for that supplier.
    pub fn append_partitions(&self, supplier: NodeId, parts: HashSet<PartitionId>) {
        let mut inner = self.inner.lock();
        if inner.result.is_some() {
            return;
        }
        inner.remaining.insert(
            supplier,
            SupplierProgress {
                started_at: Instant::now(),
                parts,
            },
        );
        if let Some(ctx) = &self.ctx {
            ctx.metrics
                .suppliers_remaining
                .set(inner.remaining.len() as i64);
        }
    }

    /// Complete successfully when the assignment was vacuous. Emits no
    /// events and requests no exchange rounds.
    pub fn done_if_empty(&self) {
        let mut inner = self.inner.lock();
        if inner.result.is_some() {
            return;
        }
        debug_assert!(inner.remaining.is_empty());
        if let Some(ctx) = &self.ctx {
            tracing::debug!(
                cache = %ctx.config.cache_name,
                topology = ?self.topology_version,
                "Rebalancing not required"
            );
        }
        let finish = self.complete_locked(&mut inner, RebalanceResult::Succeeded);
        drop(inner);
        self.run_finish(finish);
    }

    /// Settle one partition for a supplier. When the supplier's set
    /// drains, the supplier is dropped from the round; when the last
    /// supplier drains, the round completes.
    pub fn partition_done(&self, supplier: NodeId, partition: PartitionId) {
        let mut inner = self.inner.lock();
        if inner.result.is_some() {
            return;
        }

        let mut events = Vec::new();
        if let (Some(ctx), Some(exchange)) = (&self.ctx, &self.exchange) {
            if ctx.events.is_recordable(RebalanceEventKind::PartitionLoaded) {
                events.push(RebalanceEvent {
                    kind: RebalanceEventKind::PartitionLoaded,
                    cache_id: ctx.config.cache_id,
                    partition: Some(partition),
                    discovery: exchange.discovery,
                });
            }
        }

        if let Some(progress) = inner.remaining.get_mut(&supplier) {
            if progress.parts.remove(&partition) {
                if let Some(ctx) = &self.ctx {
                    ctx.metrics.partitions_loaded.inc();
                }
            }
            if progress.parts.is_empty() {
                let elapsed = progress.started_at.elapsed();
                let last_supplier = inner.remaining.len() == 1;
                inner.remaining.remove(&supplier);
                if let Some(ctx) = &self.ctx {
                    ctx.metrics
                        .suppliers_remaining
                        .set(inner.remaining.len() as i64);
                    tracing::info!(
                        cache = %ctx.config.cache_name,
                        from_node = supplier,
                        topology = ?self.topology_version,
                        elapsed_ms = elapsed.as_millis() as u64,
                        final_supplier = last_supplier,
                        "Completed rebalancing from supplier"
                    );
                }
            }
        }

        let finish = self.check_is_done_locked(&mut inner);
        drop(inner);
        self.publish_events(events);
        if let Some(finish) = finish {
            self.run_finish(finish);
        }
    }

    /// Record a partition the supplier could not provide. The caller
    /// follows up with `partition_done` once accounting is finished.
    pub fn partition_missed(&self, supplier: NodeId, partition: PartitionId) {
        let mut inner = self.inner.lock();
        if inner.result.is_some() {
            return;
        }
        inner.missed.entry(supplier).or_default().insert(partition);
        if let Some(ctx) = &self.ctx {
            ctx.metrics.partitions_missed.inc();
        }
    }

    /// Cancel the whole round. Idempotent; a no-op after the terminal
    /// transition.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.result.is_some() {
            return;
        }

        if self.is_initial() {
            let finish = self.complete_locked(&mut inner, RebalanceResult::Cancelled);
            drop(inner);
            self.run_finish(finish);
            return;
        }

        inner.remaining.clear();
        if let Some(ctx) = &self.ctx {
            ctx.metrics.suppliers_remaining.set(0);
            tracing::info!(
                cache = %ctx.config.cache_name,
                topology = ?self.topology_version,
                "Cancelled rebalancing from all nodes"
            );
        }
        let finish = self.check_is_done_locked(&mut inner);
        drop(inner);
        if let Some(finish) = finish {
            self.run_finish(finish);
        }
    }

    /// Cancel one supplier. Its unfinished partitions are recorded as
    /// missed so the completion policy re-assigns them through a dummy
    /// exchange.
    pub fn cancel_supplier(&self, supplier: NodeId) {
        let mut inner = self.inner.lock();
        if inner.result.is_some() {
            return;
        }

        if let Some(progress) = inner.remaining.remove(&supplier) {
            let elapsed = progress.started_at.elapsed();
            if let Some(ctx) = &self.ctx {
                ctx.metrics
                    .suppliers_remaining
                    .set(inner.remaining.len() as i64);
                tracing::warn!(
                    cache = %ctx.config.cache_name,
                    from_node = supplier,
                    topology = ?self.topology_version,
                    elapsed_ms = elapsed.as_millis() as u64,
                    unfinished = progress.parts.len(),
                    "Cancelled rebalancing from supplier"
                );
            }
            if !progress.parts.is_empty() {
                inner
                    .missed
                    .entry(supplier)
                    .or_default()
                    .extend(progress.parts);
            }
        }

        let finish = self.check_is_done_locked(&mut inner);
        drop(inner);
        if let Some(finish) = finish {
            self.run_finish(finish);
        }
    }

    /// Register a continuation. Runs immediately when the future is
    /// already done, otherwise after the terminal transition, outside the
    /// future's mutex.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(RebalanceResult) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        match inner.result {
            Some(result) => {
                drop(inner);
                f(result);
            }
            None => inner.listeners.push(Box::new(f)),
        }
    }

    /// Wait for the terminal result.
    pub async fn wait(&self) -> RebalanceResult {
        let mut rx = self.done_tx.subscribe();
        loop {
            if let Some(result) = *rx.borrow_and_update() {
                return result;
            }
            if rx.changed().await.is_err() {
                return RebalanceResult::Cancelled;
            }
        }
    }

    /// Force a terminal result without running the completion policy.
    /// Used for the initial placeholder (inheriting the first real
    /// round's result, or completing immediately when rebalancing is
    /// disabled).
    pub(crate) fn force_complete(&self, result: RebalanceResult) {
        let mut inner = self.inner.lock();
        if inner.result.is_some() {
            return;
        }
        inner.remaining.clear();
        let finish = self.complete_locked(&mut inner, result);
        drop(inner);
        self.run_finish(finish);
    }

    /// Decide the round outcome once nothing remains. Returns the side
    /// effects to run outside the mutex, or `None` while suppliers are
    /// still pending.
    fn check_is_done_locked(&self, inner: &mut FutureInner) -> Option<Finish> {
        if !inner.remaining.is_empty() || inner.result.is_some() {
            return None;
        }

        // The initial future has no context to consult; a drained
        // initial future can only mean cancellation.
        let (Some(ctx), Some(exchange), Some(top_ver)) =
            (&self.ctx, &self.exchange, self.topology_version)
        else {
            return Some(self.complete_locked(inner, RebalanceResult::Cancelled));
        };

        let mut events = Vec::new();
        let stopped_recordable = ctx.events.is_recordable(RebalanceEventKind::Stopped);
        if stopped_recordable
            && (ctx.config.cache_mode == CacheMode::Partitioned || self.send_stopped_event)
        {
            events.push(RebalanceEvent {
                kind: RebalanceEventKind::Stopped,
                cache_id: ctx.config.cache_id,
                partition: None,
                discovery: exchange.discovery,
            });
        }

        let mut finish = if ctx.affinity.topology_version() == top_ver {
            let missed_union: HashSet<PartitionId> =
                inner.missed.values().flatten().copied().collect();
            if !missed_union.is_empty() {
                let mut f = self.complete_locked(inner, RebalanceResult::Missed);
                f.force_dummy = true;
                f.missed_union = missed_union;
                f
            } else {
                let mut f = self.complete_locked(inner, RebalanceResult::Succeeded);
                f.schedule_resend = true;
                f
            }
        } else {
            // A newer round will take over; nothing to retry here.
            self.complete_locked(inner, RebalanceResult::Succeeded)
        };

        finish.events = events;
        Some(finish)
    }

    /// Publish the terminal state under the mutex and hand back the
    /// listeners to invoke outside it.
    fn complete_locked(&self, inner: &mut FutureInner, result: RebalanceResult) -> Finish {
        inner.result = Some(result);
        Finish {
            result,
            listeners: std::mem::take(&mut inner.listeners),
            events: Vec::new(),
            force_dummy: false,
            schedule_resend: false,
            missed_union: HashSet::new(),
        }
    }

    /// Run completion side effects. Never called with the mutex held.
    fn run_finish(&self, finish: Finish) {
        self.publish_events(finish.events);

        if let (Some(ctx), Some(exchange)) = (&self.ctx, &self.exchange) {
            match finish.result {
                RebalanceResult::Succeeded => ctx.metrics.rounds_completed.inc(),
                RebalanceResult::Missed | RebalanceResult::Cancelled => {
                    ctx.metrics.rounds_failed.inc()
                }
            }

            if finish.force_dummy {
                tracing::info!(
                    cache = %ctx.config.cache_name,
                    missed = ?finish.missed_union,
                    "Reassigning partitions that were missed"
                );
                ctx.exchange.force_dummy_exchange(exchange);
            } else if finish.schedule_resend {
                ctx.exchange.schedule_resend_partitions();
            }
        }

        self.done_tx.send_replace(Some(finish.result));
        for listener in finish.listeners {
            listener(finish.result);
        }
    }

    fn publish_events(&self, events: Vec<RebalanceEvent>) {
        if let Some(ctx) = &self.ctx {
            for event in events {
                ctx.events.publish(event);
            }
        }
    }
}

impl fmt::Debug for RebalanceFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RebalanceFuture")
            .field("update_seq", &self.update_seq)
            .field("topology_version", &self.topology_version)
            .field("remaining", &inner.remaining.len())
            .field("result", &inner.result)
            .finish()
    }
}
