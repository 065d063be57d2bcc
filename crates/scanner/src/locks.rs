use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use camview_core::types::DbId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::ScanError;

/// Per-device exclusion for scan runs.
///
/// Scans of one device must not overlap since they share a cursor; scans of
/// different devices are independent.
#[derive(Default)]
pub struct ScanLocks {
    locks: Mutex<HashMap<DbId, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one scan run.
#[derive(Debug)]
pub struct ScanGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ScanLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the device's lock or fail immediately with [`ScanError::Busy`].
    pub fn try_acquire(&self, device_id: DbId) -> Result<ScanGuard, ScanError> {
        self.lock_for(device_id)
            .try_lock_owned()
            .map(|guard| ScanGuard { _guard: guard })
            .map_err(|_| ScanError::Busy(device_id))
    }

    /// Forget a removed device's lock. An entry someone still holds is kept
    /// so a late scan cannot end up with a second lock for the device.
    ///
    /// Returns whether the entry was dropped.
    pub fn remove(&self, device_id: DbId) -> bool {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        match locks.get(&device_id) {
            Some(lock) if Arc::strong_count(lock) == 1 => {
                locks.remove(&device_id);
                true
            }
            _ => false,
        }
    }

    fn lock_for(&self, device_id: DbId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(device_id).or_default())
    }
}
