//! Batched reload of rows from a backup copy.
//!
//! Rows move in bounded `InsertBatch` statements. With a single-column key
//! the loader advances a watermark; otherwise it walks the source in row ID
//! order, so duplicate rows are copied as often as they occur. A constraint
//! violation stops the load early: rows moved so far are committed and a
//! warning is written to the audit log.

use crate::audit::{AuditLog, NewOperation, OperationStatus, ResourceCounters};
use crate::engine::{EngineError, StatementExecutor};
use crate::statement::{BatchCursor, Dialect, Identifier, InsertBatch, Statement};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Configuration for the bulk loader.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Commit every this many batches.
    pub checkpoint_every: u64,
    /// Stop after this many batches.
    pub max_batches: Option<u64>,
    /// Delay between batches in milliseconds.
    pub batch_delay_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: 10,
            max_batches: None,
            batch_delay_ms: 0,
        }
    }
}

impl LoaderConfig {
    /// Set the checkpoint interval.
    pub fn with_checkpoint_every(mut self, batches: u64) -> Self {
        self.checkpoint_every = batches;
        self
    }

    /// Cap the number of batches.
    pub fn with_max_batches(mut self, max: Option<u64>) -> Self {
        self.max_batches = max;
        self
    }
}

/// What to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSpec {
    /// Table rows are read from.
    pub source: Identifier,
    /// Table rows are written to.
    pub target: Identifier,
    /// Columns copied.
    pub columns: Vec<Identifier>,
    /// Single-column unique key for watermark batching.
    pub key: Option<Identifier>,
    /// Rows per batch.
    pub batch_size: u64,
    /// Parallel degree per batch.
    pub parallel_degree: u32,
    /// Rows in the source at planning time.
    pub expected_rows: u64,
}

/// How a load ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Every batch ran until the source was exhausted.
    Completed,
    /// The batch limit was reached first.
    BatchLimitReached,
    /// A constraint violation stopped the load.
    StoppedEarly {
        /// Violated constraint.
        constraint: String,
        /// Engine message.
        message: String,
    },
}

/// Result of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows committed to the target.
    pub rows_loaded: u64,
    /// Batches that moved rows.
    pub batches: u64,
    /// Commits issued.
    pub checkpoints: u64,
    /// How the load ended.
    pub outcome: LoadOutcome,
    /// Audit ID of the warning entry, if one was written.
    pub warning_operation: Option<u64>,
}

impl LoadReport {
    /// Whether every row was loaded.
    pub fn is_complete(&self) -> bool {
        self.outcome == LoadOutcome::Completed
    }

    /// Counters for the audit trail.
    pub fn counters(&self) -> ResourceCounters {
        ResourceCounters {
            rows_processed: self.rows_loaded,
            statements_executed: self.batches,
            batches: self.batches,
            checkpoints: self.checkpoints,
        }
    }
}

/// A load failure other than a constraint violation.
#[derive(Debug, Clone, Error)]
#[error("load into {target} failed after {rows_loaded} rows: {error}")]
pub struct LoadFailure {
    /// Target table.
    pub target: Identifier,
    /// Statement that failed, if the failure was not a commit.
    pub statement: Option<Statement>,
    /// Engine error.
    pub error: EngineError,
    /// Rows moved before the failure.
    pub rows_loaded: u64,
}

/// Moves rows between tables in bounded batches.
pub struct BulkLoader {
    executor: Arc<dyn StatementExecutor>,
    audit: Arc<AuditLog>,
    dialect: Arc<dyn Dialect>,
    config: LoaderConfig,
}

impl BulkLoader {
    /// Create a loader.
    pub fn new(
        executor: Arc<dyn StatementExecutor>,
        audit: Arc<AuditLog>,
        dialect: Arc<dyn Dialect>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            executor,
            audit,
            dialect,
            config,
        }
    }

    /// Run a load. `parent_id` links the warning entry to the calling step.
    #[instrument(skip(self, spec), fields(source = %spec.source, table = %spec.target))]
    pub fn load(&self, spec: &LoadSpec, parent_id: Option<u64>) -> Result<LoadReport, LoadFailure> {
        let checkpoint_every = self.config.checkpoint_every.max(1);
        let mut cursor = match &spec.key {
            Some(key) => BatchCursor::Watermark {
                key: key.clone(),
                after: None,
            },
            None => BatchCursor::RowPosition { skip: 0 },
        };
        let mut report = LoadReport {
            rows_loaded: 0,
            batches: 0,
            checkpoints: 0,
            outcome: LoadOutcome::Completed,
            warning_operation: None,
        };

        info!(
            source = %spec.source,
            table = %spec.target,
            batch_size = spec.batch_size,
            watermark = spec.key.is_some(),
            "Starting bulk load"
        );

        loop {
            if self.config.max_batches.is_some_and(|max| report.batches >= max) {
                warn!(table = %spec.target, batches = report.batches, "Batch limit reached");
                report.outcome = LoadOutcome::BatchLimitReached;
                break;
            }

            let statement = Statement::InsertBatch(InsertBatch {
                target: spec.target.clone(),
                source: spec.source.clone(),
                columns: spec.columns.clone(),
                limit: spec.batch_size,
                cursor: cursor.clone(),
                parallel_degree: spec.parallel_degree,
            });

            match self.executor.execute(&statement) {
                Ok(outcome) if outcome.rows_affected == 0 => break,
                Ok(outcome) => {
                    report.batches += 1;
                    report.rows_loaded += outcome.rows_affected;

                    match (&mut cursor, outcome.last_key) {
                        (BatchCursor::Watermark { after, .. }, Some(key)) => *after = Some(key),
                        (BatchCursor::Watermark { key, .. }, None) => {
                            warn!(table = %spec.target, "Engine did not report a watermark, switching to anti-join on the key");
                            cursor = BatchCursor::AntiJoin {
                                match_columns: vec![key.clone()],
                            };
                        }
                        (BatchCursor::RowPosition { skip }, _) => *skip += outcome.rows_affected,
                        (BatchCursor::AntiJoin { .. }, _) => {}
                    }

                    if report.batches % checkpoint_every == 0 {
                        self.checkpoint(spec, &mut report)?;
                        debug!(table = %spec.target, rows = report.rows_loaded, "Checkpoint");
                    }

                    if self.config.batch_delay_ms > 0 {
                        std::thread::sleep(Duration::from_millis(self.config.batch_delay_ms));
                    }
                }
                Err(EngineError::ConstraintViolation {
                    constraint,
                    message,
                }) => {
                    self.checkpoint(spec, &mut report)?;
                    let id = self.audit.record(
                        self.warning_entry(spec, &statement, &constraint, parent_id),
                        OperationStatus::Warning,
                        Some(format!(
                            "loaded {} of {} rows, stopped by {constraint}: {message}",
                            report.rows_loaded, spec.expected_rows
                        )),
                        report.counters(),
                    );
                    warn!(
                        table = %spec.target,
                        constraint = %constraint,
                        rows = report.rows_loaded,
                        "Bulk load stopped early"
                    );
                    report.warning_operation = Some(id);
                    report.outcome = LoadOutcome::StoppedEarly {
                        constraint,
                        message,
                    };
                    return Ok(report);
                }
                Err(error) => {
                    return Err(LoadFailure {
                        target: spec.target.clone(),
                        statement: Some(statement),
                        error,
                        rows_loaded: report.rows_loaded,
                    })
                }
            }
        }

        self.checkpoint(spec, &mut report)?;
        info!(
            table = %spec.target,
            rows = report.rows_loaded,
            batches = report.batches,
            "Bulk load finished"
        );
        Ok(report)
    }

    fn checkpoint(&self, spec: &LoadSpec, report: &mut LoadReport) -> Result<(), LoadFailure> {
        self.executor.commit().map_err(|error| LoadFailure {
            target: spec.target.clone(),
            statement: None,
            error,
            rows_loaded: report.rows_loaded,
        })?;
        report.checkpoints += 1;
        Ok(())
    }

    fn warning_entry(
        &self,
        spec: &LoadSpec,
        statement: &Statement,
        constraint: &str,
        parent_id: Option<u64>,
    ) -> NewOperation {
        let mut op = NewOperation::new("BULK_LOAD", spec.target.as_str())
            .with_statement(self.dialect.render(statement))
            .with_context(serde_json::json!({
                "source": spec.source.as_str(),
                "constraint": constraint,
                "batch_size": spec.batch_size,
            }));
        if let Some(parent) = parent_id {
            op = op.with_parent(parent);
        }
        op
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditConfig, MemoryAuditStore, OperationFilter};
    use crate::catalog::ColumnInfo;
    use crate::engine::{MemoryEngine, MemoryTable};
    use crate::statement::{StandardDialect, StatementKind, Value};

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    fn columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new(id("ID"), "NUMBER", false),
            ColumnInfo::new(id("NAME"), "VARCHAR2(20)", true),
        ]
    }

    fn setup(rows: i64) -> (Arc<MemoryEngine>, Arc<AuditLog>) {
        let engine = Arc::new(MemoryEngine::new());
        let data = (1..=rows)
            .map(|i| vec![Value::Integer(i), Value::Text(format!("row{i}"))])
            .collect();
        engine.create_table(MemoryTable::new(id("SRC"), columns()).with_rows(data));
        engine.create_table(MemoryTable::new(id("DST"), columns()));
        let audit = Arc::new(AuditLog::new(Arc::new(MemoryAuditStore::new()), AuditConfig::default()));
        (engine, audit)
    }

    fn loader(engine: &Arc<MemoryEngine>, audit: &Arc<AuditLog>, config: LoaderConfig) -> BulkLoader {
        BulkLoader::new(engine.clone(), audit.clone(), Arc::new(StandardDialect), config)
    }

    fn spec(key: Option<&str>, batch_size: u64) -> LoadSpec {
        LoadSpec {
            source: id("SRC"),
            target: id("DST"),
            columns: vec![id("ID"), id("NAME")],
            key: key.map(id),
            batch_size,
            parallel_degree: 2,
            expected_rows: 0,
        }
    }

    #[test]
    fn test_watermark_load_moves_every_row() {
        let (engine, audit) = setup(250);
        let report = loader(&engine, &audit, LoaderConfig::default())
            .load(&spec(Some("ID"), 100), None)
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.rows_loaded, 250);
        assert_eq!(report.batches, 3);
        assert_eq!(engine.row_count("DST"), Some(250));
        // Three moving batches plus the empty one that ends the loop.
        assert_eq!(engine.count(StatementKind::InsertBatch), 4);
    }

    #[test]
    fn test_keyless_load_walks_row_positions() {
        let (engine, audit) = setup(35);
        let report = loader(&engine, &audit, LoaderConfig::default())
            .load(&spec(None, 10), None)
            .unwrap();

        assert_eq!(report.rows_loaded, 35);
        assert_eq!(engine.row_count("DST"), Some(35));
        let skips: Vec<u64> = engine
            .statements()
            .iter()
            .filter_map(|s| match s {
                Statement::InsertBatch(InsertBatch {
                    cursor: BatchCursor::RowPosition { skip },
                    ..
                }) => Some(*skip),
                _ => None,
            })
            .collect();
        assert_eq!(skips, vec![0, 10, 20, 30, 35]);
    }

    #[test]
    fn test_keyless_load_keeps_duplicate_rows() {
        let engine = Arc::new(MemoryEngine::new());
        let same = vec![Value::Integer(7), Value::Text("dup".to_string())];
        engine.create_table(MemoryTable::new(id("SRC"), columns()).with_rows(vec![same; 1_500]));
        engine.create_table(MemoryTable::new(id("DST"), columns()));
        let audit = Arc::new(AuditLog::new(Arc::new(MemoryAuditStore::new()), AuditConfig::default()));

        let report = loader(&engine, &audit, LoaderConfig::default())
            .load(&spec(None, 1_000), None)
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.rows_loaded, 1_500);
        assert_eq!(engine.row_count("DST"), Some(1_500));
    }

    #[test]
    fn test_checkpoints_every_n_batches() {
        let (engine, audit) = setup(100);
        let report = loader(&engine, &audit, LoaderConfig::default().with_checkpoint_every(3))
            .load(&spec(Some("ID"), 10), None)
            .unwrap();

        // 10 batches: checkpoints after 3, 6, 9, plus the final commit.
        assert_eq!(report.checkpoints, 4);
        assert_eq!(engine.commits(), 4);
    }

    #[test]
    fn test_violation_stops_early_and_keeps_loaded_rows() {
        let (engine, audit) = setup(10_000);
        engine.violate_after(8_000, "DST_UK");

        let mut spec = spec(Some("ID"), 1_000);
        spec.expected_rows = 10_000;
        let report = loader(&engine, &audit, LoaderConfig::default())
            .load(&spec, Some(7))
            .unwrap();

        assert_eq!(report.rows_loaded, 8_000);
        assert!(matches!(
            report.outcome,
            LoadOutcome::StoppedEarly { ref constraint, .. } if constraint == "DST_UK"
        ));
        assert_eq!(engine.row_count("DST"), Some(8_000));

        let warnings: Vec<_> = audit
            .history(OperationFilter::new().with_status(OperationStatus::Warning))
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].parent_id, Some(7));
        assert_eq!(warnings[0].counters.rows_processed, 8_000);
        assert_eq!(Some(warnings[0].operation_id), report.warning_operation);
    }

    #[test]
    fn test_engine_error_is_a_failure() {
        let (engine, audit) = setup(10);
        engine.fail_next(StatementKind::InsertBatch, "tablespace full");

        let failure = loader(&engine, &audit, LoaderConfig::default())
            .load(&spec(Some("ID"), 5), None)
            .unwrap_err();
        assert_eq!(failure.rows_loaded, 0);
        assert!(failure.statement.is_some());
        assert_eq!(failure.error, EngineError::Execution("tablespace full".to_string()));
    }

    #[test]
    fn test_batch_limit() {
        let (engine, audit) = setup(100);
        let report = loader(&engine, &audit, LoaderConfig::default().with_max_batches(Some(2)))
            .load(&spec(Some("ID"), 10), None)
            .unwrap();

        assert_eq!(report.outcome, LoadOutcome::BatchLimitReached);
        assert_eq!(report.rows_loaded, 20);
        assert_eq!(engine.row_count("DST"), Some(20));
    }
}
