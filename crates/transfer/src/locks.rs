//! Per-transfer mutual exclusion.
//!
//! Every transfer id gets its own FIFO-fair async mutex, created on demand
//! and dropped from the registry once nobody holds or waits on it. Two
//! different ids never share a lock, so unrelated transfers never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

type Registry = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Registry of per-transfer locks.
#[derive(Clone, Default)]
pub struct TransferLocks {
    inner: Registry,
}

/// Exclusive hold on one transfer. Released on drop.
pub struct TransferLockGuard {
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Registry,
}

impl TransferLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `id`.
    ///
    /// Callers for the same id are served in the order they called `lock`
    /// (tokio's mutex is fair).
    pub async fn lock(&self, id: &str) -> TransferLockGuard {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(map.entry(id.to_string()).or_default())
        };
        let guard = mutex.lock_owned().await;
        TransferLockGuard {
            id: id.to_string(),
            guard: Some(guard),
            registry: Arc::clone(&self.inner),
        }
    }

    /// Number of ids currently held or awaited.
    pub fn active(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl TransferLockGuard {
    /// The transfer this guard protects.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for TransferLockGuard {
    fn drop(&mut self) {
        // Release first so the strong count below only sees the registry
        // entry plus any queued waiters.
        drop(self.guard.take());
        let mut map = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        if map
            .get(&self.id)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            map.remove(&self.id);
        }
    }
}
