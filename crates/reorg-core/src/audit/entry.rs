//! Operation log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a logged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// In progress.
    Started,
    /// Completed successfully.
    Success,
    /// Failed.
    Error,
    /// Completed with partial results.
    Warning,
}

impl OperationStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Started)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Started => write!(f, "STARTED"),
            OperationStatus::Success => write!(f, "SUCCESS"),
            OperationStatus::Error => write!(f, "ERROR"),
            OperationStatus::Warning => write!(f, "WARNING"),
        }
    }
}

/// Who ran an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionInfo {
    /// Session identifier.
    pub session_id: String,
    /// Database or OS user.
    pub user: String,
    /// Client host.
    pub host: String,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            session_id: String::from("local"),
            user: String::from("reorg"),
            host: String::from("localhost"),
        }
    }
}

impl SessionInfo {
    /// Create session info.
    pub fn new(
        session_id: impl Into<String>,
        user: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user: user.into(),
            host: host.into(),
        }
    }
}

/// Work counters attached to an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceCounters {
    /// Rows moved or affected.
    pub rows_processed: u64,
    /// Statements issued.
    pub statements_executed: u64,
    /// Loader batches run.
    pub batches: u64,
    /// Loader commits.
    pub checkpoints: u64,
}

impl ResourceCounters {
    /// Counters for a single statement affecting `rows`.
    pub fn statement(rows: u64) -> Self {
        Self {
            rows_processed: rows,
            statements_executed: 1,
            ..Default::default()
        }
    }

    /// Add another set of counters.
    pub fn absorb(&mut self, other: &ResourceCounters) {
        self.rows_processed += other.rows_processed;
        self.statements_executed += other.statements_executed;
        self.batches += other.batches;
        self.checkpoints += other.checkpoints;
    }
}

/// One row of the operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    /// Monotonic operation ID.
    pub operation_id: u64,
    /// Parent operation (step entries point at their migration).
    pub parent_id: Option<u64>,
    /// Operation type (e.g. `MIGRATION`, `BULK_LOAD`).
    pub operation_type: String,
    /// Object acted on.
    pub target_object: String,
    /// Kind of the object (e.g. `TABLE`).
    pub target_type: String,
    /// Current status.
    pub status: OperationStatus,
    /// Outcome or progress message.
    pub message: Option<String>,
    /// Rendered statement, if the operation issued one.
    pub statement: Option<String>,
    /// Wall time in milliseconds once terminal.
    pub duration_ms: Option<u64>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time once terminal.
    pub ended_at: Option<DateTime<Utc>>,
    /// Session that ran the operation.
    pub session: SessionInfo,
    /// Work counters.
    pub counters: ResourceCounters,
    /// Free-form context.
    pub context: serde_json::Value,
}

impl OperationLogEntry {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::error::Error> {
        serde_json::to_vec(self).map_err(|e| crate::error::Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::error::Error> {
        serde_json::from_slice(bytes)
            .map_err(|e| crate::error::Error::Deserialization(e.to_string()))
    }

    /// Format the entry as a single log line.
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "{} op={} type={} object={} status={} user={}",
            self.started_at.to_rfc3339(),
            self.operation_id,
            self.operation_type,
            self.target_object,
            self.status,
            self.session.user
        );
        if let Some(parent) = self.parent_id {
            line.push_str(&format!(" parent={parent}"));
        }
        if let Some(ms) = self.duration_ms {
            line.push_str(&format!(" duration_ms={ms}"));
        }
        if self.counters.rows_processed > 0 {
            line.push_str(&format!(" rows={}", self.counters.rows_processed));
        }
        if let Some(message) = &self.message {
            line.push_str(&format!(" message={message:?}"));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> OperationLogEntry {
        OperationLogEntry {
            operation_id: 7,
            parent_id: Some(3),
            operation_type: "BULK_LOAD".to_string(),
            target_object: "SALES".to_string(),
            target_type: "TABLE".to_string(),
            status: OperationStatus::Warning,
            message: Some("stopped early".to_string()),
            statement: None,
            duration_ms: Some(1200),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            session: SessionInfo::default(),
            counters: ResourceCounters {
                rows_processed: 800,
                statements_executed: 9,
                batches: 9,
                checkpoints: 1,
            },
            context: serde_json::json!({"constraint": "SALES_PK"}),
        }
    }

    #[test]
    fn test_entry_serialization() {
        let e = entry();
        let restored = OperationLogEntry::from_bytes(&e.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, e);
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&OperationStatus::Warning).unwrap();
        assert_eq!(json, "\"WARNING\"");
        assert!(!OperationStatus::Started.is_terminal());
        assert!(OperationStatus::Error.is_terminal());
    }

    #[test]
    fn test_log_line() {
        let line = entry().to_log_line();
        assert!(line.contains("op=7"));
        assert!(line.contains("parent=3"));
        assert!(line.contains("status=WARNING"));
        assert!(line.contains("rows=800"));
    }

    #[test]
    fn test_counters_absorb() {
        let mut total = ResourceCounters::statement(10);
        total.absorb(&ResourceCounters {
            rows_processed: 5,
            statements_executed: 2,
            batches: 2,
            checkpoints: 1,
        });
        assert_eq!(total.rows_processed, 15);
        assert_eq!(total.statements_executed, 3);
        assert_eq!(total.checkpoints, 1);
    }
}
