//! Cache-wide coordination between rebalancing and the local update path.

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Read/write lock shared between the demander and external
/// collaborators.
///
/// The demander holds the read side while applying the entries of one
/// supply batch. Collaborators that must quiesce rebalancing (state
/// dump, cache shutdown) take the write side and thereby wait out any
/// in-flight batch and block new ones.
#[derive(Debug, Default)]
pub struct DemandLock {
    inner: RwLock<()>,
}

impl DemandLock {
    /// Create a new demand lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the read side for the duration of one batch application.
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read().await
    }

    /// Acquire the write side, quiescing rebalancing.
    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write().await
    }
}
