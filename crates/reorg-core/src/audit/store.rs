//! Audit log backends.

use super::entry::OperationLogEntry;
use crate::error::Error;
use parking_lot::{Mutex, RwLock};
use sled::{Db, Tree};
use std::collections::BTreeMap;

/// Tree holding operation log entries keyed by big-endian operation ID.
const AUDIT_TREE: &str = "audit:operations";

/// Tree holding the operation ID counter.
const META_TREE: &str = "audit:meta";

const LAST_ID_KEY: &[u8] = b"last_operation_id";

/// Iterator over stored entries, in operation ID order.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<OperationLogEntry, Error>> + 'a>;

/// Trait for operation log backends.
pub trait AuditStore: Send + Sync {
    /// Insert or replace an entry.
    fn put(&self, entry: &OperationLogEntry) -> Result<(), Error>;

    /// Fetch an entry.
    fn get(&self, operation_id: u64) -> Result<Option<OperationLogEntry>, Error>;

    /// Remove an entry.
    fn remove(&self, operation_id: u64) -> Result<(), Error>;

    /// Highest stored operation ID.
    fn max_id(&self) -> Result<Option<u64>, Error>;

    /// Reserve a fresh operation ID, unique across every log sharing this
    /// store and above any stored ID.
    fn allocate_id(&self) -> Result<u64, Error>;

    /// Iterate entries lazily.
    fn scan(&self) -> EntryIter<'_>;

    /// Make all writes durable.
    fn flush(&self) -> Result<(), Error>;
}

/// Audit store in a dedicated sled tree.
pub struct SledAuditStore {
    tree: Tree,
    meta: Tree,
}

impl SledAuditStore {
    /// Open or create the store in the given database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        Ok(Self {
            tree: db.open_tree(AUDIT_TREE)?,
            meta: db.open_tree(META_TREE)?,
        })
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

fn decode_id(key: &[u8]) -> Result<u64, Error> {
    let buf: [u8; 8] = key
        .try_into()
        .map_err(|_| Error::Deserialization("invalid operation key".to_string()))?;
    Ok(u64::from_be_bytes(buf))
}

impl AuditStore for SledAuditStore {
    fn put(&self, entry: &OperationLogEntry) -> Result<(), Error> {
        self.tree
            .insert(entry.operation_id.to_be_bytes(), entry.to_bytes()?)?;
        Ok(())
    }

    fn get(&self, operation_id: u64) -> Result<Option<OperationLogEntry>, Error> {
        match self.tree.get(operation_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(OperationLogEntry::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, operation_id: u64) -> Result<(), Error> {
        self.tree.remove(operation_id.to_be_bytes())?;
        Ok(())
    }

    fn max_id(&self) -> Result<Option<u64>, Error> {
        match self.tree.last()? {
            Some((key, _)) => Ok(Some(decode_id(&key)?)),
            None => Ok(None),
        }
    }

    fn allocate_id(&self) -> Result<u64, Error> {
        let floor = self.max_id()?.unwrap_or(0);
        let next = self.meta.update_and_fetch(LAST_ID_KEY, |old| {
            let last = old
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map_or(0, u64::from_be_bytes);
            Some((last.max(floor) + 1).to_be_bytes().to_vec())
        })?;
        match next {
            Some(bytes) => decode_id(&bytes),
            None => Err(Error::Deserialization("operation ID counter missing".to_string())),
        }
    }

    fn scan(&self) -> EntryIter<'_> {
        Box::new(self.tree.iter().map(|item| {
            let (_, bytes) = item?;
            OperationLogEntry::from_bytes(&bytes)
        }))
    }

    fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }
}

/// In-memory audit store for testing.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: RwLock<BTreeMap<u64, OperationLogEntry>>,
    last_id: Mutex<u64>,
}

impl MemoryAuditStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in ID order.
    pub fn entries(&self) -> Vec<OperationLogEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl AuditStore for MemoryAuditStore {
    fn put(&self, entry: &OperationLogEntry) -> Result<(), Error> {
        self.entries
            .write()
            .insert(entry.operation_id, entry.clone());
        Ok(())
    }

    fn get(&self, operation_id: u64) -> Result<Option<OperationLogEntry>, Error> {
        Ok(self.entries.read().get(&operation_id).cloned())
    }

    fn remove(&self, operation_id: u64) -> Result<(), Error> {
        self.entries.write().remove(&operation_id);
        Ok(())
    }

    fn max_id(&self) -> Result<Option<u64>, Error> {
        Ok(self.entries.read().keys().next_back().copied())
    }

    fn allocate_id(&self) -> Result<u64, Error> {
        let floor = self.max_id()?.unwrap_or(0);
        let mut last = self.last_id.lock();
        *last = (*last).max(floor) + 1;
        Ok(*last)
    }

    fn scan(&self) -> EntryIter<'_> {
        let snapshot: Vec<OperationLogEntry> = self.entries.read().values().cloned().collect();
        Box::new(snapshot.into_iter().map(Ok))
    }

    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{OperationStatus, ResourceCounters, SessionInfo};
    use chrono::Utc;

    fn entry(id: u64) -> OperationLogEntry {
        OperationLogEntry {
            operation_id: id,
            parent_id: None,
            operation_type: "MIGRATION".to_string(),
            target_object: "SALES".to_string(),
            target_type: "TABLE".to_string(),
            status: OperationStatus::Started,
            message: None,
            statement: None,
            duration_ms: None,
            started_at: Utc::now(),
            ended_at: None,
            session: SessionInfo::default(),
            counters: ResourceCounters::default(),
            context: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_sled_store_orders_by_id() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = SledAuditStore::open(&db).unwrap();

        for id in [300, 2, 70_000] {
            store.put(&entry(id)).unwrap();
        }

        let ids: Vec<u64> = store.scan().map(|e| e.unwrap().operation_id).collect();
        assert_eq!(ids, vec![2, 300, 70_000]);
        assert_eq!(store.max_id().unwrap(), Some(70_000));

        store.remove(300).unwrap();
        assert!(store.get(300).unwrap().is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_sled_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = sled::Config::new().path(dir.path()).open().unwrap();
            let store = SledAuditStore::open(&db).unwrap();
            store.put(&entry(1)).unwrap();
            store.flush().unwrap();
        }
        let db = sled::Config::new().path(dir.path()).open().unwrap();
        let store = SledAuditStore::open(&db).unwrap();
        assert_eq!(store.get(1).unwrap().unwrap().operation_id, 1);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryAuditStore::new();
        assert_eq!(store.max_id().unwrap(), None);
        store.put(&entry(5)).unwrap();
        store.put(&entry(9)).unwrap();
        assert_eq!(store.max_id().unwrap(), Some(9));
        assert_eq!(store.scan().count(), 2);
        assert_eq!(store.allocate_id().unwrap(), 10);
        assert_eq!(store.allocate_id().unwrap(), 11);
    }

    #[test]
    fn test_sled_ids_shared_between_handles() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let first = SledAuditStore::open(&db).unwrap();
        first.put(&entry(4)).unwrap();
        let second = SledAuditStore::open(&db).unwrap();

        assert_eq!(first.allocate_id().unwrap(), 5);
        assert_eq!(second.allocate_id().unwrap(), 6);
        assert_eq!(first.allocate_id().unwrap(), 7);
    }
}
