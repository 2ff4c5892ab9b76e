//! Best-effort operation log.
//!
//! Writes never fail the caller: a backend error is logged at `warn` and
//! swallowed. Operation IDs come from an in-memory counter seeded from the
//! store, so callers get an ID even when the write itself is lost.

use super::entry::{OperationLogEntry, OperationStatus, ResourceCounters, SessionInfo};
use super::store::{AuditStore, SledAuditStore};
use crate::error::Error;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Audit log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Write entries at all.
    pub enabled: bool,
    /// Terminal entries older than this are removed by `purge_expired`.
    /// `None` keeps entries forever.
    pub retention_days: Option<u32>,
    /// Identity stamped on every entry.
    pub session: SessionInfo,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: Some(90),
            session: SessionInfo::default(),
        }
    }
}

impl AuditConfig {
    /// Set the session identity.
    pub fn with_session(mut self, session: SessionInfo) -> Self {
        self.session = session;
        self
    }

    /// Set the retention period.
    pub fn with_retention_days(mut self, days: Option<u32>) -> Self {
        self.retention_days = days;
        self
    }

    /// Enable or disable logging.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Description of an operation being started.
#[derive(Debug, Clone)]
pub struct NewOperation {
    /// Operation type.
    pub operation_type: String,
    /// Object acted on.
    pub target_object: String,
    /// Kind of the object.
    pub target_type: String,
    /// Parent operation.
    pub parent_id: Option<u64>,
    /// Rendered statement.
    pub statement: Option<String>,
    /// Free-form context.
    pub context: serde_json::Value,
}

impl NewOperation {
    /// A new operation on a table.
    pub fn new(operation_type: impl Into<String>, target_object: impl Into<String>) -> Self {
        Self {
            operation_type: operation_type.into(),
            target_object: target_object.into(),
            target_type: "TABLE".to_string(),
            parent_id: None,
            statement: None,
            context: serde_json::Value::Null,
        }
    }

    /// Set the parent operation.
    pub fn with_parent(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set the rendered statement.
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    /// Set the target kind.
    pub fn with_target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = target_type.into();
        self
    }

    /// Set the context blob.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// Filter over the operation log. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    /// Target object.
    pub object: Option<String>,
    /// Operation type.
    pub operation_type: Option<String>,
    /// Status.
    pub status: Option<OperationStatus>,
    /// Parent operation.
    pub parent_id: Option<u64>,
    /// Started at or after.
    pub since: Option<DateTime<Utc>>,
    /// Started before.
    pub until: Option<DateTime<Utc>>,
}

impl OperationFilter {
    /// Match everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one object.
    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Restrict to one operation type.
    pub fn with_type(mut self, operation_type: impl Into<String>) -> Self {
        self.operation_type = Some(operation_type.into());
        self
    }

    /// Restrict to one status.
    pub fn with_status(mut self, status: OperationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to children of an operation.
    pub fn with_parent(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Restrict to a start-time window.
    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    /// Whether an entry passes the filter.
    pub fn matches(&self, entry: &OperationLogEntry) -> bool {
        self.object
            .as_ref()
            .map_or(true, |o| o.eq_ignore_ascii_case(&entry.target_object))
            && self
                .operation_type
                .as_ref()
                .map_or(true, |t| t.eq_ignore_ascii_case(&entry.operation_type))
            && self.status.map_or(true, |s| s == entry.status)
            && self.parent_id.map_or(true, |p| entry.parent_id == Some(p))
            && self.since.map_or(true, |s| entry.started_at >= s)
            && self.until.map_or(true, |u| entry.started_at < u)
    }
}

/// Duration statistics for one (type, status) group.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationStats {
    /// Operation type.
    pub operation_type: String,
    /// Status.
    pub status: OperationStatus,
    /// Number of entries.
    pub count: u64,
    /// Mean duration.
    pub avg_ms: f64,
    /// Shortest duration.
    pub min_ms: u64,
    /// Longest duration.
    pub max_ms: u64,
    /// Median duration.
    pub p50_ms: u64,
    /// 95th percentile duration.
    pub p95_ms: u64,
}

/// Error counts for one (type, object) group.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorSummary {
    /// Operation type.
    pub operation_type: String,
    /// Target object.
    pub target_object: String,
    /// Number of errors.
    pub count: u64,
    /// Message of the most recent error.
    pub last_message: Option<String>,
    /// When the most recent error happened.
    pub last_seen: DateTime<Utc>,
}

/// Nearest-rank percentile of sorted values.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (sorted.len() as f64 * p).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// The operation log.
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    config: RwLock<AuditConfig>,
    next_id: AtomicU64,
    open: DashMap<u64, OperationLogEntry>,
}

impl AuditLog {
    /// Create a log over a backend.
    pub fn new(store: Arc<dyn AuditStore>, config: AuditConfig) -> Self {
        let next_id = match store.max_id() {
            Ok(max) => max.map_or(1, |id| id + 1),
            Err(e) => {
                warn!(error = %e, "Could not read last operation ID, starting at 1");
                1
            }
        };

        Self {
            store,
            config: RwLock::new(config),
            next_id: AtomicU64::new(next_id),
            open: DashMap::new(),
        }
    }

    /// Create a log backed by its own tree in `db`.
    pub fn open(db: &sled::Db, config: AuditConfig) -> Result<Self, Error> {
        Ok(Self::new(Arc::new(SledAuditStore::open(db)?), config))
    }

    /// Current configuration.
    pub fn config(&self) -> AuditConfig {
        self.config.read().clone()
    }

    /// Replace the configuration.
    pub fn reconfigure(&self, config: AuditConfig) {
        debug!(enabled = config.enabled, retention_days = ?config.retention_days, "Audit log reconfigured");
        *self.config.write() = config;
    }

    /// Record the start of an operation and return its ID.
    pub fn start(&self, operation: NewOperation) -> u64 {
        let id = self.allocate_id();
        let config = self.config();
        let entry = OperationLogEntry {
            operation_id: id,
            parent_id: operation.parent_id,
            operation_type: operation.operation_type,
            target_object: operation.target_object,
            target_type: operation.target_type,
            status: OperationStatus::Started,
            message: None,
            statement: operation.statement,
            duration_ms: None,
            started_at: Utc::now(),
            ended_at: None,
            session: config.session,
            counters: ResourceCounters::default(),
            context: operation.context,
        };

        if config.enabled {
            self.write(&entry, false);
        }
        self.open.insert(id, entry);
        id
    }

    /// Move a started operation to a terminal status.
    ///
    /// Finishing an unknown or already terminal operation is ignored.
    pub fn finish(
        &self,
        operation_id: u64,
        status: OperationStatus,
        message: Option<String>,
        counters: ResourceCounters,
    ) {
        if !status.is_terminal() {
            warn!(operation_id, "Ignoring finish with non-terminal status");
            return;
        }

        let mut entry = match self.open.remove(&operation_id) {
            Some((_, entry)) => entry,
            None => match self.store.get(operation_id) {
                Ok(Some(entry)) if entry.status.is_terminal() => {
                    warn!(operation_id, status = %entry.status, "Operation already finished, ignoring");
                    return;
                }
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    warn!(operation_id, "Finishing unknown operation, ignoring");
                    return;
                }
                Err(e) => {
                    warn!(operation_id, error = %e, "Could not load operation to finish");
                    return;
                }
            },
        };

        let ended = Utc::now();
        entry.status = status;
        entry.message = message;
        entry.counters = counters;
        entry.duration_ms = Some((ended - entry.started_at).num_milliseconds().max(0) as u64);
        entry.ended_at = Some(ended);

        if self.config.read().enabled {
            self.write(&entry, true);
        }
    }

    /// Attach context to a started operation.
    pub fn annotate(&self, operation_id: u64, context: serde_json::Value) {
        if let Some(mut entry) = self.open.get_mut(&operation_id) {
            entry.context = context;
        }
    }

    /// Write a one-shot terminal entry and return its ID.
    pub fn record(
        &self,
        operation: NewOperation,
        status: OperationStatus,
        message: Option<String>,
        counters: ResourceCounters,
    ) -> u64 {
        let id = self.start(operation);
        self.finish(id, status, message, counters);
        id
    }

    fn allocate_id(&self) -> u64 {
        match self.store.allocate_id() {
            Ok(id) => {
                self.next_id.fetch_max(id + 1, Ordering::SeqCst);
                id
            }
            Err(e) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                warn!(operation_id = id, error = %e, "Audit store could not allocate an ID, using local counter");
                id
            }
        }
    }

    fn write(&self, entry: &OperationLogEntry, durable: bool) {
        let result = self.store.put(entry).and_then(|()| {
            if durable {
                self.store.flush()
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            warn!(
                operation_id = entry.operation_id,
                operation_type = %entry.operation_type,
                status = %entry.status,
                error = %e,
                "Audit write failed"
            );
        }
    }

    /// Fetch one entry.
    pub fn get(&self, operation_id: u64) -> Option<OperationLogEntry> {
        match self.store.get(operation_id) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(operation_id, error = %e, "Audit read failed");
                None
            }
        }
    }

    /// Entries matching a filter, in operation ID order.
    ///
    /// Lazy and single-pass. Unreadable entries are skipped.
    pub fn history(&self, filter: OperationFilter) -> impl Iterator<Item = OperationLogEntry> + '_ {
        self.store
            .scan()
            .filter_map(|item| match item {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable audit entry");
                    None
                }
            })
            .filter(move |entry| filter.matches(entry))
    }

    /// Duration statistics grouped by (type, status).
    pub fn statistics(&self, filter: OperationFilter) -> Vec<OperationStats> {
        let mut groups: BTreeMap<(String, OperationStatus), (u64, Vec<u64>)> = BTreeMap::new();
        for entry in self.history(filter) {
            let group = groups
                .entry((entry.operation_type.clone(), entry.status))
                .or_default();
            group.0 += 1;
            if let Some(ms) = entry.duration_ms {
                group.1.push(ms);
            }
        }

        groups
            .into_iter()
            .map(|((operation_type, status), (count, mut durations))| {
                durations.sort_unstable();
                let avg_ms = if durations.is_empty() {
                    0.0
                } else {
                    durations.iter().sum::<u64>() as f64 / durations.len() as f64
                };
                OperationStats {
                    operation_type,
                    status,
                    count,
                    avg_ms,
                    min_ms: durations.first().copied().unwrap_or(0),
                    max_ms: durations.last().copied().unwrap_or(0),
                    p50_ms: percentile(&durations, 0.50),
                    p95_ms: percentile(&durations, 0.95),
                }
            })
            .collect()
    }

    /// Error counts grouped by (type, object).
    pub fn error_summary(&self, filter: OperationFilter) -> Vec<ErrorSummary> {
        let mut groups: BTreeMap<(String, String), ErrorSummary> = BTreeMap::new();
        for entry in self.history(filter.with_status(OperationStatus::Error)) {
            let seen = entry.ended_at.unwrap_or(entry.started_at);
            let key = (entry.operation_type.clone(), entry.target_object.clone());
            let summary = groups.entry(key).or_insert_with(|| ErrorSummary {
                operation_type: entry.operation_type.clone(),
                target_object: entry.target_object.clone(),
                count: 0,
                last_message: None,
                last_seen: seen,
            });
            summary.count += 1;
            if summary.count == 1 || seen >= summary.last_seen {
                summary.last_seen = seen;
                summary.last_message = entry.message.clone();
            }
        }
        groups.into_values().collect()
    }

    /// Remove terminal entries older than the retention period.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let Some(days) = self.config.read().retention_days else {
            return 0;
        };
        let cutoff = Utc::now() - Duration::days(i64::from(days));

        let expired: Vec<u64> = self
            .history(OperationFilter::new())
            .filter(|e| e.status.is_terminal() && e.ended_at.unwrap_or(e.started_at) < cutoff)
            .map(|e| e.operation_id)
            .collect();

        let mut removed = 0;
        for id in expired {
            match self.store.remove(id) {
                Ok(()) => removed += 1,
                Err(e) => warn!(operation_id = id, error = %e, "Could not purge audit entry"),
            }
        }
        if removed > 0 {
            debug!(removed, retention_days = days, "Purged expired audit entries");
        }
        removed
    }

    /// Flush the backend.
    pub fn flush(&self) {
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "Audit flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::{EntryIter, MemoryAuditStore};

    fn memory_log() -> (Arc<MemoryAuditStore>, AuditLog) {
        let store = Arc::new(MemoryAuditStore::new());
        let log = AuditLog::new(store.clone(), AuditConfig::default());
        (store, log)
    }

    struct FailingStore;

    impl AuditStore for FailingStore {
        fn put(&self, _entry: &OperationLogEntry) -> Result<(), Error> {
            Err(Error::Serialization("disk full".to_string()))
        }
        fn get(&self, _id: u64) -> Result<Option<OperationLogEntry>, Error> {
            Err(Error::Deserialization("disk gone".to_string()))
        }
        fn remove(&self, _id: u64) -> Result<(), Error> {
            Err(Error::Serialization("disk full".to_string()))
        }
        fn max_id(&self) -> Result<Option<u64>, Error> {
            Err(Error::Deserialization("disk gone".to_string()))
        }
        fn allocate_id(&self) -> Result<u64, Error> {
            Err(Error::Serialization("disk full".to_string()))
        }
        fn scan(&self) -> EntryIter<'_> {
            Box::new(std::iter::once(Err(Error::Deserialization(
                "disk gone".to_string(),
            ))))
        }
        fn flush(&self) -> Result<(), Error> {
            Err(Error::Serialization("disk full".to_string()))
        }
    }

    #[test]
    fn test_start_and_finish() {
        let (store, log) = memory_log();
        let id = log.start(NewOperation::new("MIGRATION", "SALES"));

        let started = store.entries();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].status, OperationStatus::Started);

        log.finish(id, OperationStatus::Success, Some("done".to_string()), ResourceCounters::statement(5));
        let entry = log.get(id).unwrap();
        assert_eq!(entry.status, OperationStatus::Success);
        assert_eq!(entry.counters.rows_processed, 5);
        assert!(entry.duration_ms.is_some());
        assert!(entry.ended_at.is_some());
    }

    #[test]
    fn test_terminal_entries_are_immutable() {
        let (_, log) = memory_log();
        let id = log.record(
            NewOperation::new("ADD_PARTITION", "SALES"),
            OperationStatus::Error,
            Some("first".to_string()),
            ResourceCounters::default(),
        );

        log.finish(id, OperationStatus::Success, Some("second".to_string()), ResourceCounters::default());
        let entry = log.get(id).unwrap();
        assert_eq!(entry.status, OperationStatus::Error);
        assert_eq!(entry.message.as_deref(), Some("first"));
    }

    #[test]
    fn test_ids_are_monotonic_and_seeded() {
        let store = Arc::new(MemoryAuditStore::new());
        let first = AuditLog::new(store.clone(), AuditConfig::default());
        let a = first.start(NewOperation::new("X", "T"));
        let b = first.start(NewOperation::new("X", "T"));
        assert!(b > a);

        let second = AuditLog::new(store, AuditConfig::default());
        let c = second.start(NewOperation::new("X", "T"));
        assert!(c > b);
    }

    #[test]
    fn test_failing_store_is_swallowed() {
        let log = AuditLog::new(Arc::new(FailingStore), AuditConfig::default());
        let a = log.start(NewOperation::new("MIGRATION", "SALES"));
        log.finish(a, OperationStatus::Success, None, ResourceCounters::default());
        let b = log.record(
            NewOperation::new("BULK_LOAD", "SALES"),
            OperationStatus::Warning,
            None,
            ResourceCounters::default(),
        );

        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert!(log.get(a).is_none());
        assert_eq!(log.history(OperationFilter::new()).count(), 0);
        assert!(log.statistics(OperationFilter::new()).is_empty());
        assert_eq!(log.purge_expired(), 0);
        log.flush();
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let (store, log) = memory_log();
        log.reconfigure(AuditConfig::default().with_enabled(false));
        let id = log.start(NewOperation::new("MIGRATION", "SALES"));
        log.finish(id, OperationStatus::Success, None, ResourceCounters::default());
        assert!(store.is_empty());

        log.reconfigure(AuditConfig::default());
        log.record(
            NewOperation::new("MIGRATION", "SALES"),
            OperationStatus::Success,
            None,
            ResourceCounters::default(),
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_history_filters() {
        let (_, log) = memory_log();
        let parent = log.start(NewOperation::new("MIGRATION", "SALES"));
        log.record(
            NewOperation::new("STEP", "SALES").with_parent(parent),
            OperationStatus::Success,
            None,
            ResourceCounters::default(),
        );
        log.record(
            NewOperation::new("STEP", "ORDERS"),
            OperationStatus::Error,
            Some("boom".to_string()),
            ResourceCounters::default(),
        );

        assert_eq!(log.history(OperationFilter::new()).count(), 3);
        assert_eq!(log.history(OperationFilter::new().with_object("sales")).count(), 2);
        assert_eq!(log.history(OperationFilter::new().with_parent(parent)).count(), 1);
        assert_eq!(
            log.history(OperationFilter::new().with_status(OperationStatus::Error))
                .next()
                .unwrap()
                .target_object,
            "ORDERS"
        );

        let future = Utc::now() + Duration::hours(1);
        assert_eq!(
            log.history(OperationFilter::new().between(Some(future), None)).count(),
            0
        );
    }

    #[test]
    fn test_statistics_and_percentiles() {
        let (store, log) = memory_log();
        for ms in [10u64, 20, 30, 40, 100] {
            let id = log.record(
                NewOperation::new("STEP", "SALES"),
                OperationStatus::Success,
                None,
                ResourceCounters::default(),
            );
            let mut entry = store.get(id).unwrap().unwrap();
            entry.duration_ms = Some(ms);
            store.put(&entry).unwrap();
        }
        log.record(
            NewOperation::new("STEP", "SALES"),
            OperationStatus::Error,
            None,
            ResourceCounters::default(),
        );

        let stats = log.statistics(OperationFilter::new());
        assert_eq!(stats.len(), 2);
        let success = stats
            .iter()
            .find(|s| s.status == OperationStatus::Success)
            .unwrap();
        assert_eq!(success.count, 5);
        assert_eq!(success.min_ms, 10);
        assert_eq!(success.max_ms, 100);
        assert_eq!(success.p50_ms, 30);
        assert_eq!(success.p95_ms, 100);
        assert!((success.avg_ms - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_summary() {
        let (_, log) = memory_log();
        for msg in ["first", "second"] {
            log.record(
                NewOperation::new("SPLIT_PARTITION", "SALES"),
                OperationStatus::Error,
                Some(msg.to_string()),
                ResourceCounters::default(),
            );
        }
        log.record(
            NewOperation::new("SPLIT_PARTITION", "SALES"),
            OperationStatus::Success,
            None,
            ResourceCounters::default(),
        );

        let summary = log.error_summary(OperationFilter::new());
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].count, 2);
        assert_eq!(summary[0].last_message.as_deref(), Some("second"));
    }

    #[test]
    fn test_purge_expired() {
        let (store, log) = memory_log();
        let old = log.record(
            NewOperation::new("STEP", "SALES"),
            OperationStatus::Success,
            None,
            ResourceCounters::default(),
        );
        let mut entry = store.get(old).unwrap().unwrap();
        entry.started_at = Utc::now() - Duration::days(200);
        entry.ended_at = Some(entry.started_at);
        store.put(&entry).unwrap();

        let mut running = store.get(log.start(NewOperation::new("MIGRATION", "SALES"))).unwrap().unwrap();
        running.started_at = Utc::now() - Duration::days(200);
        store.put(&running).unwrap();

        log.record(
            NewOperation::new("STEP", "SALES"),
            OperationStatus::Success,
            None,
            ResourceCounters::default(),
        );

        assert_eq!(log.purge_expired(), 1);
        assert_eq!(store.len(), 2);

        log.reconfigure(AuditConfig::default().with_retention_days(None));
        assert_eq!(log.purge_expired(), 0);
    }

    #[test]
    fn test_sled_backed_log() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let log = AuditLog::open(&db, AuditConfig::default()).unwrap();
        let id = log.start(NewOperation::new("MIGRATION", "SALES").with_statement("DROP TABLE SALES"));
        log.finish(id, OperationStatus::Success, None, ResourceCounters::default());

        let reopened = AuditLog::open(&db, AuditConfig::default()).unwrap();
        let entry = reopened.get(id).unwrap();
        assert_eq!(entry.statement.as_deref(), Some("DROP TABLE SALES"));
        assert_eq!(reopened.start(NewOperation::new("X", "Y")), id + 1);
    }

    #[test]
    fn test_handles_on_one_db_never_share_ids() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let first = AuditLog::open(&db, AuditConfig::default()).unwrap();
        let second = AuditLog::open(&db, AuditConfig::default()).unwrap();

        let failed = first.record(
            NewOperation::new("MIGRATION", "SALES"),
            OperationStatus::Error,
            Some("step 3 failed".to_string()),
            ResourceCounters::default(),
        );
        let other = second.record(
            NewOperation::new("GATHER_STATS", "ORDERS"),
            OperationStatus::Success,
            None,
            ResourceCounters::default(),
        );
        let next = first.start(NewOperation::new("MIGRATION", "SALES"));

        assert_ne!(failed, other);
        assert!(next > other);
        let entry = second.get(failed).unwrap();
        assert_eq!(entry.status, OperationStatus::Error);
        assert_eq!(entry.target_object, "SALES");
        assert_eq!(entry.message.as_deref(), Some("step 3 failed"));
        assert_eq!(first.history(OperationFilter::new()).count(), 3);
    }
}
