//! Per-VM admission control.
//!
//! At most one backup or restore runs against a given `(host, VM)` pair at a
//! time. Later requests wait for the earlier one to finish rather than being
//! rejected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Identifies the VM an orchestration attempt touches.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VmKey {
    /// Host address.
    pub host: String,
    /// VM UUID on that host.
    pub vm_uuid: String,
}

impl VmKey {
    /// Builds a key.
    #[must_use]
    pub fn new(host: &str, vm_uuid: &str) -> Self {
        Self {
            host: host.to_owned(),
            vm_uuid: vm_uuid.to_owned(),
        }
    }
}

/// Keyed async locks. Entries are dropped once nobody holds or awaits them.
#[derive(Clone, Debug, Default)]
pub struct VmLocks {
    slots: Arc<Mutex<HashMap<VmKey, Arc<AsyncMutex<()>>>>>,
}

/// Held while an attempt runs; releases the key on drop.
#[derive(Debug)]
pub struct VmPermit {
    key: VmKey,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Mutex<HashMap<VmKey, Arc<AsyncMutex<()>>>>>,
}

impl VmLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `key` is free and claims it.
    pub async fn acquire(&self, key: VmKey) -> VmPermit {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        VmPermit {
            key,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for VmPermit {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // The table holds one reference; anything above that is a waiter.
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}
