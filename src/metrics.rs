//! Metrics for rebalancing observability.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    /// Get the counter name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Increment the counter by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a specific amount.
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge that can go up and down.
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    value: AtomicI64,
}

impl Gauge {
    /// Create a new gauge.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicI64::new(0),
        }
    }

    /// Get the gauge name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by 1.
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Set to a specific value.
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics for one demander instance.
#[derive(Debug)]
pub struct RebalanceMetrics {
    /// Rebalance rounds started.
    pub rounds_started: Counter,
    /// Rounds that completed with every partition owned.
    pub rounds_completed: Counter,
    /// Rounds that ended with missed partitions or were cancelled.
    pub rounds_failed: Counter,
    /// Partitions fully received and owned.
    pub partitions_loaded: Counter,
    /// Entries installed into moving partitions.
    pub entries_loaded: Counter,
    /// Partitions reported missed by suppliers.
    pub partitions_missed: Counter,
    /// Suppliers the current round is still waiting on.
    pub suppliers_remaining: Gauge,
}

impl RebalanceMetrics {
    /// Create new rebalance metrics.
    pub const fn new() -> Self {
        Self {
            rounds_started: Counter::new("rebalance_rounds_started"),
            rounds_completed: Counter::new("rebalance_rounds_completed"),
            rounds_failed: Counter::new("rebalance_rounds_failed"),
            partitions_loaded: Counter::new("rebalance_partitions_loaded"),
            entries_loaded: Counter::new("rebalance_entries_loaded"),
            partitions_missed: Counter::new("rebalance_partitions_missed"),
            suppliers_remaining: Gauge::new("rebalance_suppliers_remaining"),
        }
    }

    /// Get a point-in-time snapshot.
    pub fn snapshot(&self) -> RebalanceMetricsSnapshot {
        RebalanceMetricsSnapshot {
            rounds_started: self.rounds_started.get(),
            rounds_completed: self.rounds_completed.get(),
            rounds_failed: self.rounds_failed.get(),
            partitions_loaded: self.partitions_loaded.get(),
            entries_loaded: self.entries_loaded.get(),
            partitions_missed: self.partitions_missed.get(),
            suppliers_remaining: self.suppliers_remaining.get(),
        }
    }
}

impl Default for RebalanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of rebalance metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceMetricsSnapshot {
    /// Rebalance rounds started.
    pub rounds_started: u64,
    /// Rounds completed cleanly.
    pub rounds_completed: u64,
    /// Rounds failed or cancelled.
    pub rounds_failed: u64,
    /// Partitions fully received and owned.
    pub partitions_loaded: u64,
    /// Entries installed.
    pub entries_loaded: u64,
    /// Partitions reported missed.
    pub partitions_missed: u64,
    /// Suppliers still pending.
    pub suppliers_remaining: i64,
}
