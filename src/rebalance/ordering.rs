//! Cross-cache rebalance ordering.
//!
//! Caches can declare that sibling caches must finish rebalancing first
//! (a customer cache referencing an account cache must not come up
//! against a partially rebalanced dependency). Before a demander sends
//! any demand messages, the gate awaits each prerequisite cache's
//! current rebalance future.

use crate::rebalance::future::RebalanceFuture;
use std::sync::Arc;

/// Lookup of sibling caches' rebalance futures by cache name.
pub trait CacheRegistry: Send + Sync {
    /// The named cache's current rebalance future, if the cache exists.
    fn rebalance_future(&self, cache: &str) -> Option<Arc<RebalanceFuture>>;
}

/// Registry that knows no sibling caches.
#[derive(Debug, Default)]
pub struct NoopCacheRegistry;

impl CacheRegistry for NoopCacheRegistry {
    fn rebalance_future(&self, _cache: &str) -> Option<Arc<RebalanceFuture>> {
        None
    }
}

/// Enforces the rebalance-before dependency across caches.
pub struct OrderingGate {
    registry: Arc<dyn CacheRegistry>,
}

impl OrderingGate {
    /// Create a gate over the given registry.
    pub fn new(registry: Arc<dyn CacheRegistry>) -> Self {
        Self { registry }
    }

    /// Wait until `cache` finishes its rebalance round.
    ///
    /// Cancels `fut` when the dependency fails, or when `is_stale`
    /// reports that our own round has been overtaken by a newer topology
    /// (checked before and after the wait).
    pub async fn wait_for<F>(&self, cache: &str, fut: &RebalanceFuture, is_stale: F)
    where
        F: Fn() -> bool,
    {
        tracing::debug!(dependency = cache, "Waiting for cache rebalancing");

        let Some(dep) = self.registry.rebalance_future(cache) else {
            tracing::debug!(dependency = cache, "Ordering dependency not registered, skipping");
            return;
        };

        if is_stale() {
            fut.cancel();
            return;
        }

        let result = dep.wait().await;

        if is_stale() {
            fut.cancel();
            return;
        }
        if !result.is_success() {
            tracing::debug!(
                dependency = cache,
                ?result,
                "Ordering dependency did not finish cleanly, cancelling own round"
            );
            fut.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebalance::future::RebalanceResult;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapRegistry {
        futures: Mutex<HashMap<String, Arc<RebalanceFuture>>>,
    }

    impl MapRegistry {
        fn insert(&self, name: &str, fut: Arc<RebalanceFuture>) {
            self.futures.lock().insert(name.to_owned(), fut);
        }
    }

    impl CacheRegistry for MapRegistry {
        fn rebalance_future(&self, cache: &str) -> Option<Arc<RebalanceFuture>> {
            self.futures.lock().get(cache).cloned()
        }
    }

    #[tokio::test]
    async fn test_dependency_success_leaves_future_alone() {
        let registry = Arc::new(MapRegistry::default());
        let dep = Arc::new(RebalanceFuture::new_initial());
        dep.force_complete(RebalanceResult::Succeeded);
        registry.insert("accounts", dep);

        let fut = RebalanceFuture::new_initial();
        let gate = OrderingGate::new(registry);
        gate.wait_for("accounts", &fut, || false).await;

        assert!(!fut.is_done());
    }

    #[tokio::test]
    async fn test_dependency_failure_cancels_own_round() {
        let registry = Arc::new(MapRegistry::default());
        let dep = Arc::new(RebalanceFuture::new_initial());
        dep.force_complete(RebalanceResult::Missed);
        registry.insert("accounts", dep);

        let fut = RebalanceFuture::new_initial();
        let gate = OrderingGate::new(registry);
        gate.wait_for("accounts", &fut, || false).await;

        assert!(fut.is_done());
    }

    #[tokio::test]
    async fn test_stale_round_is_cancelled_without_waiting() {
        let registry = Arc::new(MapRegistry::default());
        // Dependency never completes; the gate must not wait on it.
        registry.insert("accounts", Arc::new(RebalanceFuture::new_initial()));

        let fut = RebalanceFuture::new_initial();
        let gate = OrderingGate::new(registry);
        gate.wait_for("accounts", &fut, || true).await;

        assert!(fut.is_done());
    }

    #[tokio::test]
    async fn test_unknown_dependency_is_skipped() {
        let gate = OrderingGate::new(Arc::new(NoopCacheRegistry));
        let fut = RebalanceFuture::new_initial();
        gate.wait_for("missing", &fut, || false).await;
        assert!(!fut.is_done());
    }
}
