//! Per-object exclusion.

use super::error::ReorgError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Instant;
use tracing::debug;

/// Objects currently held by a reorganization.
#[derive(Debug, Default)]
pub struct ObjectLocks {
    held: DashMap<String, Instant>,
}

impl ObjectLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock on `object`, failing if it is already held.
    pub fn acquire(&self, object: &str) -> Result<ObjectLockGuard<'_>, ReorgError> {
        let key = object.trim().to_ascii_uppercase();
        match self.held.entry(key.clone()) {
            Entry::Occupied(_) => Err(ReorgError::ObjectBusy { object: key }),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                debug!(object = %key, "Object lock acquired");
                Ok(ObjectLockGuard { locks: self, key })
            }
        }
    }

    /// Whether `object` is held.
    pub fn is_locked(&self, object: &str) -> bool {
        self.held.contains_key(&object.trim().to_ascii_uppercase())
    }
}

/// Releases the lock on drop.
#[derive(Debug)]
pub struct ObjectLockGuard<'a> {
    locks: &'a ObjectLocks,
    key: String,
}

impl Drop for ObjectLockGuard<'_> {
    fn drop(&mut self) {
        if let Some((_, since)) = self.locks.held.remove(&self.key) {
            debug!(object = %self.key, held_ms = since.elapsed().as_millis() as u64, "Object lock released");
        }
    }
}
