//! Migration driver - runs plans step by step.
//!
//! Each run holds the object's lock, writes one audit entry for the run and
//! one child entry per step, and stops at the first failing step. Failures
//! roll back the engine's open transaction and leave intermediate objects
//! (such as the backup copy) in place for a manual [`rollback`].
//!
//! [`rollback`]: MigrationDriver::rollback

use super::error::ReorgError;
use super::loader::{BulkLoader, LoadOutcome, LoadReport, LoadSpec, LoaderConfig};
use super::lock::ObjectLocks;
use super::plan::{MigrationPlan, MigrationRequest, PlanBuilder, PlanOptions, Step, StepAction};
use super::state::DriverState;
use crate::audit::{AuditLog, NewOperation, OperationFilter, OperationLogEntry, OperationStatus, ResourceCounters};
use crate::catalog::{Catalog, ObjectInspector};
use crate::config::ReorgConfig;
use crate::engine::StatementExecutor;
use crate::error::ValidationError;
use crate::heuristics::ResourceHeuristics;
use crate::jobs::{JobRunner, JobStore};
use crate::statement::{Dialect, Identifier, StandardDialect, Statement};
use crate::strategy::{StrategyConfig, StrategyConfigStore};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Overall outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Every step completed normally.
    Success,
    /// Every step ran but at least one reported a warning (partial data).
    Warning,
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// 1-based step number.
    pub step_number: u32,
    /// Step name.
    pub name: String,
    /// `Success` or `Warning`.
    pub status: OperationStatus,
    /// Audit ID of the step entry.
    pub operation_id: u64,
    /// Rows affected or loaded.
    pub rows_affected: u64,
    /// Rendered statement, for statement steps.
    pub statement: Option<String>,
    /// Wall time.
    pub duration_ms: u64,
}

/// Result of [`MigrationDriver::execute_plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Reorganized object.
    pub object: String,
    /// Overall status.
    pub status: ExecutionStatus,
    /// Audit ID of the run.
    pub operation_id: u64,
    /// Per-step outcomes, in order.
    pub steps: Vec<StepReport>,
    /// Rows written by reload steps.
    pub rows_loaded: u64,
    /// Warning messages.
    pub warnings: Vec<String>,
    /// Final driver state.
    pub state: DriverState,
    /// Backup copy left behind, if any.
    pub backup: Option<Identifier>,
}

/// Result of [`MigrationDriver::run_statement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementRun {
    /// Audit ID.
    pub operation_id: u64,
    /// Rows affected.
    pub rows_affected: u64,
}

struct StepOutcome {
    counters: ResourceCounters,
    warning: Option<String>,
}

struct StepFailure {
    statement: Option<String>,
    message: String,
    counters: ResourceCounters,
}

/// Plans and executes reorganizations.
pub struct MigrationDriver {
    inspector: ObjectInspector,
    executor: Arc<dyn StatementExecutor>,
    dialect: Arc<dyn Dialect>,
    heuristics: ResourceHeuristics,
    audit: Arc<AuditLog>,
    strategies: Arc<StrategyConfigStore>,
    loader_config: LoaderConfig,
    config: ReorgConfig,
    locks: Arc<ObjectLocks>,
    states: DashMap<String, DriverState>,
    db: sled::Db,
}

impl MigrationDriver {
    /// Create a driver whose administrative state lives in `db`.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        executor: Arc<dyn StatementExecutor>,
        db: &sled::Db,
        config: ReorgConfig,
    ) -> Result<Self, ReorgError> {
        config.validate()?;
        let audit = Arc::new(AuditLog::open(db, config.audit.clone())?);
        let strategies = Arc::new(StrategyConfigStore::open(db)?);

        Ok(Self {
            inspector: ObjectInspector::new(catalog),
            executor,
            dialect: Arc::new(StandardDialect),
            heuristics: ResourceHeuristics::new(config.heuristics.clone()),
            audit,
            strategies,
            loader_config: config.loader.clone(),
            config,
            locks: Arc::new(ObjectLocks::new()),
            states: DashMap::new(),
            db: db.clone(),
        })
    }

    /// Create a driver, opening the administrative database from the config.
    pub fn open(
        catalog: Arc<dyn Catalog>,
        executor: Arc<dyn StatementExecutor>,
        config: ReorgConfig,
    ) -> Result<Self, ReorgError> {
        let db = config.storage.open()?;
        Self::new(catalog, executor, &db, config)
    }

    /// Render statements with a different dialect.
    pub fn with_dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// The operation log.
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// The strategy configuration store.
    pub fn strategies(&self) -> &Arc<StrategyConfigStore> {
        &self.strategies
    }

    /// Per-object locks held by running operations.
    pub fn locks(&self) -> &Arc<ObjectLocks> {
        &self.locks
    }

    /// A job runner sharing this driver's engine, audit log, object locks
    /// and database.
    pub fn job_runner(&self) -> Result<JobRunner, ReorgError> {
        let store = Arc::new(JobStore::open(&self.db)?);
        Ok(JobRunner::new(
            store,
            Arc::clone(&self.executor),
            self.inspector.clone(),
            self.heuristics.clone(),
            Arc::clone(&self.audit),
            Arc::clone(&self.dialect),
        )
        .with_locks(Arc::clone(&self.locks)))
    }

    /// Current state of an object's latest run.
    pub fn state(&self, object: &str) -> DriverState {
        self.states
            .get(&normalize(object))
            .map(|s| *s)
            .unwrap_or(DriverState::Idle)
    }

    /// Inspect, tune and validate. Executes nothing and writes no audit rows.
    #[instrument(skip(self, request, options), fields(strategy = %request.strategy))]
    pub fn plan_migration(
        &self,
        object: &str,
        request: &MigrationRequest,
        options: &PlanOptions,
    ) -> Result<MigrationPlan, ReorgError> {
        self.set_state(object, DriverState::Planning);

        let inspection = self.inspector.inspect(object);
        let tuning = self.heuristics.tune(inspection.approx_size_bytes);

        let mut options = options.clone();
        if options.backup_suffix.is_none() {
            options.backup_suffix = Some(self.config.backup_suffix_at(Utc::now())?);
        }

        match PlanBuilder::build(&inspection, request, tuning, &options) {
            Ok(plan) => {
                info!(
                    object = %plan.object,
                    steps = plan.step_count(),
                    parallel_degree = tuning.parallel_degree,
                    batch_size = tuning.batch_size,
                    "Migration planned"
                );
                self.set_state(object, DriverState::Idle);
                Ok(plan)
            }
            Err(e) => {
                warn!(object, error = %e, "Migration request rejected");
                self.set_state(object, DriverState::Failed);
                Err(e.into())
            }
        }
    }

    /// Execute a plan.
    #[instrument(skip(self, plan), fields(object = %plan.object, strategy = %plan.strategy))]
    pub fn execute_plan(&self, plan: &MigrationPlan) -> Result<ExecutionReport, ReorgError> {
        let context = serde_json::json!({
            "strategy": plan.strategy.as_str(),
            "steps": plan.step_count(),
            "parallel_degree": plan.tuning.parallel_degree,
            "batch_size": plan.tuning.batch_size,
            "sampling_percent": plan.tuning.sampling_percent,
            "backup": plan.backup.as_ref().map(|b| b.as_str()),
            "source_rows": plan.source_rows,
        });
        self.run_steps("MIGRATION", plan, context, true)
    }

    /// Plan and execute in one call.
    pub fn migrate(
        &self,
        object: &str,
        request: &MigrationRequest,
        options: &PlanOptions,
    ) -> Result<ExecutionReport, ReorgError> {
        let plan = self.plan_migration(object, request, options)?;
        self.execute_plan(&plan)
    }

    /// Restore `object` from a backup copy: drop the current object if it
    /// exists, then rename the backup.
    #[instrument(skip(self))]
    pub fn rollback(&self, object: &str, backup: &str) -> Result<ExecutionReport, ReorgError> {
        let target = Identifier::new(object).map_err(ValidationError::from)?;
        let source = Identifier::new(backup).map_err(ValidationError::from)?;

        let saved = self.inspector.inspect(source.as_str());
        if !saved.exists {
            return Err(ValidationError::NotFound {
                object: source.to_string(),
            }
            .into());
        }
        let current = self.inspector.inspect(target.as_str());

        let mut steps = Vec::new();
        if current.exists {
            steps.push(Statement::DropTable {
                table: target.clone(),
                purge: false,
            });
        }
        steps.push(Statement::RenameTable {
            from: source.clone(),
            to: target.clone(),
        });

        let plan = MigrationPlan {
            object: target.clone(),
            strategy: saved.structure_kind.strategy_type(),
            backup: None,
            tuning: self.heuristics.tune(saved.approx_size_bytes),
            source_rows: saved.row_count,
            source_columns: saved.columns.clone(),
            steps: steps
                .into_iter()
                .enumerate()
                .map(|(i, statement)| {
                    let (name, description) = match &statement {
                        Statement::DropTable { .. } => ("drop_current", format!("Drop {target}")),
                        _ => ("restore_backup", format!("Rename {source} to {target}")),
                    };
                    Step {
                        step_number: i as u32 + 1,
                        name: name.to_string(),
                        action: StepAction::Statement(statement),
                        description,
                        is_parallel: false,
                        parallel_degree: 1,
                    }
                })
                .collect(),
        };

        let context = serde_json::json!({ "backup": source.as_str() });
        self.run_steps("ROLLBACK", &plan, context, false)
    }

    /// Execute one maintenance primitive on `object` with audit logging.
    #[instrument(skip(self, statement), fields(kind = ?statement.kind()))]
    pub fn run_statement(
        &self,
        operation_type: &str,
        object: &str,
        statement: &Statement,
    ) -> Result<StatementRun, ReorgError> {
        let target = Identifier::new(object).map_err(ValidationError::from)?;
        if let Some(acted_on) = statement.object() {
            if *acted_on != target {
                return Err(ValidationError::InvalidOption(format!(
                    "statement acts on {acted_on}, not {target}"
                ))
                .into());
            }
        }

        let _guard = self.locks.acquire(target.as_str())?;
        let rendered = self.dialect.render(statement);
        let operation_id = self.audit.start(
            NewOperation::new(operation_type, target.as_str()).with_statement(rendered.clone()),
        );

        let result = self.executor.execute(statement).and_then(|outcome| {
            if !statement.is_ddl() {
                self.executor.commit()?;
            }
            Ok(outcome)
        });

        match result {
            Ok(outcome) => {
                self.audit.finish(
                    operation_id,
                    OperationStatus::Success,
                    None,
                    ResourceCounters::statement(outcome.rows_affected),
                );
                info!(operation_id, object = %target, rows = outcome.rows_affected, "Statement completed");
                Ok(StatementRun {
                    operation_id,
                    rows_affected: outcome.rows_affected,
                })
            }
            Err(e) => {
                self.rollback_open_transaction(operation_id);
                let message = e.to_string();
                self.audit.finish(
                    operation_id,
                    OperationStatus::Error,
                    Some(message.clone()),
                    ResourceCounters::default(),
                );
                error!(operation_id, object = %target, error = %message, "Statement failed");
                Err(ReorgError::StepExecution {
                    operation_id,
                    step_number: 1,
                    step_name: operation_type.to_string(),
                    statement: Some(rendered),
                    message,
                })
            }
        }
    }

    /// Operation log entries matching `filter`.
    pub fn get_operation_history(
        &self,
        filter: OperationFilter,
    ) -> impl Iterator<Item = OperationLogEntry> + '_ {
        self.audit.history(filter)
    }

    /// Active strategy configuration of an object.
    pub fn get_config(&self, object: &str) -> Result<StrategyConfig, ReorgError> {
        Ok(self.strategies.get_active(object)?)
    }

    fn run_steps(
        &self,
        operation_type: &str,
        plan: &MigrationPlan,
        context: serde_json::Value,
        verify_source: bool,
    ) -> Result<ExecutionReport, ReorgError> {
        let object = plan.object.as_str();
        let _guard = self.locks.acquire(object)?;
        if verify_source {
            self.set_state(object, DriverState::Planning);
            if let Err(e) = self.check_plan_current(plan) {
                warn!(object, error = %e, "Plan rejected");
                self.set_state(object, DriverState::Failed);
                return Err(e.into());
            }
        }

        let operation_id = self
            .audit
            .start(NewOperation::new(operation_type, object).with_context(context));
        info!(operation_id, object, steps = plan.step_count(), "Run started");

        let mut report = ExecutionReport {
            object: object.to_string(),
            status: ExecutionStatus::Success,
            operation_id,
            steps: Vec::with_capacity(plan.step_count()),
            rows_loaded: 0,
            warnings: Vec::new(),
            state: DriverState::Idle,
            backup: plan.backup.clone(),
        };
        let mut totals = ResourceCounters::default();

        for step in &plan.steps {
            self.set_state(object, DriverState::Executing(step.step_number));
            let rendered = step.statement().map(|s| self.dialect.render(s));

            let mut op = NewOperation::new(step.name.to_ascii_uppercase(), object)
                .with_parent(operation_id)
                .with_context(serde_json::json!({
                    "step_number": step.step_number,
                    "description": step.description,
                    "parallel_degree": step.parallel_degree,
                }));
            if let Some(text) = &rendered {
                op = op.with_statement(text.clone());
            }
            let step_id = self.audit.start(op);
            let started = Instant::now();

            match self.run_step(step, plan, step_id, &mut report) {
                Ok(outcome) => {
                    totals.absorb(&outcome.counters);
                    let status = if outcome.warning.is_some() {
                        OperationStatus::Warning
                    } else {
                        OperationStatus::Success
                    };
                    self.audit
                        .finish(step_id, status, outcome.warning.clone(), outcome.counters);
                    if let Some(warning) = outcome.warning {
                        report.warnings.push(warning);
                    }
                    report.steps.push(StepReport {
                        step_number: step.step_number,
                        name: step.name.clone(),
                        status,
                        operation_id: step_id,
                        rows_affected: outcome.counters.rows_processed,
                        statement: rendered,
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(failure) => {
                    totals.absorb(&failure.counters);
                    self.rollback_open_transaction(operation_id);
                    self.audit.finish(
                        step_id,
                        OperationStatus::Error,
                        Some(failure.message.clone()),
                        failure.counters,
                    );
                    self.audit.finish(
                        operation_id,
                        OperationStatus::Error,
                        Some(format!(
                            "step {} ({}) failed: {}",
                            step.step_number, step.name, failure.message
                        )),
                        totals,
                    );
                    self.set_state(object, DriverState::Failed);
                    error!(
                        operation_id,
                        object,
                        step_number = step.step_number,
                        step = %step.name,
                        error = %failure.message,
                        "Run failed"
                    );
                    return Err(ReorgError::StepExecution {
                        operation_id,
                        step_number: step.step_number,
                        step_name: step.name.clone(),
                        statement: failure.statement.or(rendered),
                        message: failure.message,
                    });
                }
            }
        }

        let warned = !report.warnings.is_empty();
        report.status = if warned {
            ExecutionStatus::Warning
        } else {
            ExecutionStatus::Success
        };
        self.audit.finish(
            operation_id,
            if warned {
                OperationStatus::Warning
            } else {
                OperationStatus::Success
            },
            warned.then(|| report.warnings.join("; ")),
            totals,
        );
        report.state = DriverState::Succeeded { warning: warned };
        self.set_state(object, report.state);
        info!(
            operation_id,
            object,
            rows_loaded = report.rows_loaded,
            warnings = report.warnings.len(),
            "Run succeeded"
        );
        Ok(report)
    }

    fn run_step(
        &self,
        step: &Step,
        plan: &MigrationPlan,
        step_id: u64,
        report: &mut ExecutionReport,
    ) -> Result<StepOutcome, StepFailure> {
        match &step.action {
            StepAction::Statement(statement) => {
                let outcome = self.executor.execute(statement).map_err(|e| StepFailure {
                    statement: None,
                    message: e.to_string(),
                    counters: ResourceCounters::default(),
                })?;
                Ok(StepOutcome {
                    counters: ResourceCounters::statement(outcome.rows_affected),
                    warning: None,
                })
            }
            StepAction::BulkLoad(spec) => {
                let loader = BulkLoader::new(
                    Arc::clone(&self.executor),
                    Arc::clone(&self.audit),
                    Arc::clone(&self.dialect),
                    self.loader_config.clone(),
                );
                let load = loader.load(spec, Some(step_id)).map_err(|f| StepFailure {
                    statement: f.statement.as_ref().map(|s| self.dialect.render(s)),
                    message: f.error.to_string(),
                    counters: ResourceCounters {
                        rows_processed: f.rows_loaded,
                        ..Default::default()
                    },
                })?;
                report.rows_loaded += load.rows_loaded;

                let warning = match &load.outcome {
                    LoadOutcome::Completed => self.verify_load(spec, &load, step_id),
                    LoadOutcome::BatchLimitReached => Some(format!(
                        "partial data: batch limit reached after {} of {} rows into {}",
                        load.rows_loaded, spec.expected_rows, spec.target
                    )),
                    LoadOutcome::StoppedEarly { constraint, .. } => Some(format!(
                        "partial data: loaded {} of {} rows into {}, stopped by constraint {constraint}",
                        load.rows_loaded, spec.expected_rows, spec.target
                    )),
                };
                Ok(StepOutcome {
                    counters: load.counters(),
                    warning,
                })
            }
            StepAction::PersistStrategy(draft) => {
                let config = self
                    .strategies
                    .create(draft, &self.config.actor)
                    .map_err(|e| StepFailure {
                        statement: None,
                        message: e.to_string(),
                        counters: ResourceCounters::default(),
                    })?;
                info!(
                    object = %plan.object,
                    strategy = %config.strategy_type,
                    version = config.version,
                    "Strategy persisted"
                );
                Ok(StepOutcome {
                    counters: ResourceCounters::default(),
                    warning: None,
                })
            }
        }
    }

    /// Compare the object with what the plan was built from.
    fn check_plan_current(&self, plan: &MigrationPlan) -> Result<(), ValidationError> {
        let current = self.inspector.inspect(plan.object.as_str());
        let reason = if !current.exists {
            Some("object no longer exists".to_string())
        } else if current.columns != plan.source_columns {
            Some("columns changed".to_string())
        } else if current.row_count != plan.source_rows {
            Some(format!(
                "row count changed from {} to {}",
                plan.source_rows, current.row_count
            ))
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ValidationError::StalePlan {
                object: plan.object.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Recount the source of a completed load. A mismatch means rows were
    /// skipped or duplicated and is reported as partial data.
    fn verify_load(&self, spec: &LoadSpec, load: &LoadReport, step_id: u64) -> Option<String> {
        let source = self.inspector.inspect(spec.source.as_str());
        if !source.exists || source.row_count == load.rows_loaded {
            return None;
        }

        let message = format!(
            "partial data: loaded {} rows into {} but {} holds {} rows",
            load.rows_loaded, spec.target, spec.source, source.row_count
        );
        self.audit.record(
            NewOperation::new("BULK_LOAD", spec.target.as_str())
                .with_parent(step_id)
                .with_context(serde_json::json!({
                    "source": spec.source.as_str(),
                    "source_rows": source.row_count,
                    "rows_loaded": load.rows_loaded,
                })),
            OperationStatus::Warning,
            Some(message.clone()),
            load.counters(),
        );
        warn!(
            table = %spec.target,
            source_rows = source.row_count,
            rows = load.rows_loaded,
            "Loaded row count does not match source"
        );
        Some(message)
    }

    fn rollback_open_transaction(&self, operation_id: u64) {
        if let Err(e) = self.executor.rollback() {
            warn!(operation_id, error = %e, "Engine rollback failed");
        }
    }

    fn set_state(&self, object: &str, next: DriverState) {
        let key = normalize(object);
        let current = self.state(&key);
        if !current.can_transition_to(next) {
            warn!(object = %key, from = %current, to = %next, "Unexpected driver state transition");
        }
        self.states.insert(key, next);
    }
}

fn normalize(object: &str) -> String {
    object.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnInfo, DependentKind, DependentObject};
    use crate::engine::{MemoryEngine, MemoryTable};
    use crate::statement::{StatementKind, Value};

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    fn setup() -> (Arc<MemoryEngine>, MigrationDriver) {
        let engine = Arc::new(MemoryEngine::new());
        let rows = (1..=500)
            .map(|i| vec![Value::Integer(i), Value::Text(format!("C{}", i % 7))])
            .collect();
        engine.create_table(
            MemoryTable::new(
                id("ORDERS"),
                vec![
                    ColumnInfo::new(id("ID"), "NUMBER", false),
                    ColumnInfo::new(id("CUSTOMER"), "VARCHAR2(10)", true),
                ],
            )
            .with_rows(rows)
            .with_dependent(DependentObject::new(id("ORDERS_PK"), DependentKind::PrimaryKey, vec![id("ID")])),
        );
        let db = sled::Config::new().temporary(true).open().unwrap();
        let driver = MigrationDriver::new(engine.clone(), engine.clone(), &db, ReorgConfig::default()).unwrap();
        (engine, driver)
    }

    #[test]
    fn test_migrate_to_hash() {
        let (engine, driver) = setup();
        let request = MigrationRequest::new("HASH").with_partition_column("ID");
        let report = driver
            .migrate("orders", &request, &PlanOptions::default().with_backup_suffix("A"))
            .unwrap();

        assert_eq!(report.status, ExecutionStatus::Success);
        assert_eq!(report.state, DriverState::Succeeded { warning: false });
        assert_eq!(report.rows_loaded, 500);
        assert_eq!(engine.row_count("ORDERS"), Some(500));
        assert!(engine.has_table("ORDERS_BKA"));
        assert_eq!(driver.state("ORDERS"), report.state);
        assert_eq!(driver.get_config("orders").unwrap().strategy_type.as_str(), "HASH");
    }

    #[test]
    fn test_step_failure_rolls_back_and_reports() {
        let (engine, driver) = setup();
        engine.fail_next(StatementKind::CreateTable, "insufficient privileges");

        let request = MigrationRequest::new("LIST").with_partition_column("CUSTOMER");
        let err = driver
            .migrate("ORDERS", &request, &PlanOptions::default().with_backup_suffix("B"))
            .unwrap_err();

        let ReorgError::StepExecution { operation_id, step_number, ref statement, .. } = err else {
            panic!("expected a step failure");
        };
        assert_eq!(step_number, 3);
        assert!(statement.as_deref().is_some_and(|s| s.starts_with("CREATE TABLE ORDERS")));
        assert_eq!(engine.rollbacks(), 1);
        assert_eq!(driver.state("ORDERS"), DriverState::Failed);
        // Backup survives for a manual rollback.
        assert!(engine.has_table("ORDERS_BKB"));
        assert!(!engine.has_table("ORDERS"));

        let entry = driver.audit().get(operation_id).unwrap();
        assert_eq!(entry.status, OperationStatus::Error);
        assert!(matches!(driver.get_config("ORDERS"), Err(ReorgError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_rollback_restores_backup() {
        let (engine, driver) = setup();
        engine.fail_next(StatementKind::CreateTable, "boom");
        let request = MigrationRequest::new("NONE");
        driver
            .migrate("ORDERS", &request, &PlanOptions::default().with_backup_suffix("C"))
            .unwrap_err();

        let report = driver.rollback("ORDERS", "ORDERS_BKC").unwrap();
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].name, "restore_backup");
        assert_eq!(engine.row_count("ORDERS"), Some(500));
        assert!(!engine.has_table("ORDERS_BKC"));

        assert!(matches!(
            driver.rollback("ORDERS", "ORDERS_BKC"),
            Err(ReorgError::Validation(ValidationError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_run_statement_checks_target() {
        let (engine, driver) = setup();
        let statement = Statement::GatherStatistics {
            table: id("ORDERS"),
            sampling_percent: 10.0,
            parallel_degree: 1,
            cascade: true,
        };

        let run = driver.run_statement("GATHER_STATS", "orders", &statement).unwrap();
        let entry = driver.audit().get(run.operation_id).unwrap();
        assert_eq!(entry.status, OperationStatus::Success);
        assert!(entry.statement.is_some());
        assert!(engine.table("ORDERS").unwrap().stats.is_some());

        assert!(matches!(
            driver.run_statement("GATHER_STATS", "CUSTOMERS", &statement),
            Err(ReorgError::Validation(ValidationError::InvalidOption(_)))
        ));
    }

    /// Lets one clamped reload batch through, then reports the source as drained.
    struct DrainsEarly {
        inner: Arc<MemoryEngine>,
        batches: std::sync::atomic::AtomicU32,
    }

    impl StatementExecutor for DrainsEarly {
        fn execute(&self, statement: &Statement) -> Result<crate::engine::ExecOutcome, crate::engine::EngineError> {
            let Statement::InsertBatch(batch) = statement else {
                return self.inner.execute(statement);
            };
            if self.batches.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0 {
                return Ok(crate::engine::ExecOutcome::rows(0));
            }
            let mut clamped = batch.clone();
            clamped.limit = clamped.limit.min(200);
            self.inner.execute(&Statement::InsertBatch(clamped))
        }

        fn commit(&self) -> Result<(), crate::engine::EngineError> {
            self.inner.commit()
        }

        fn rollback(&self) -> Result<(), crate::engine::EngineError> {
            self.inner.rollback()
        }
    }

    #[test]
    fn test_short_load_is_reported_as_partial() {
        let (engine, _) = setup();
        let executor = Arc::new(DrainsEarly {
            inner: engine.clone(),
            batches: std::sync::atomic::AtomicU32::new(0),
        });
        let db = sled::Config::new().temporary(true).open().unwrap();
        let driver = MigrationDriver::new(engine.clone(), executor, &db, ReorgConfig::default()).unwrap();

        let request = MigrationRequest::new("HASH").with_partition_column("ID");
        let report = driver
            .migrate("ORDERS", &request, &PlanOptions::default().with_backup_suffix("P"))
            .unwrap();

        assert_eq!(report.status, ExecutionStatus::Warning);
        assert_eq!(report.rows_loaded, 200);
        assert_eq!(engine.row_count("ORDERS"), Some(200));
        assert!(report.warnings[0].contains("ORDERS_BKP holds 500 rows"));

        let reload = report.steps.iter().find(|s| s.name == "reload").unwrap();
        assert_eq!(reload.status, OperationStatus::Warning);
        let warnings: Vec<_> = driver
            .get_operation_history(OperationFilter::new().with_status(OperationStatus::Warning))
            .filter(|e| e.operation_type == "BULK_LOAD")
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].parent_id, Some(reload.operation_id));
    }

    #[test]
    fn test_validation_failure_sets_failed_state() {
        let (_engine, driver) = setup();
        let request = MigrationRequest::new("RANGE");
        let err = driver
            .plan_migration("ORDERS", &request, &PlanOptions::default())
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(driver.state("ORDERS"), DriverState::Failed);
        assert_eq!(driver.get_operation_history(OperationFilter::new()).count(), 0);
    }
}
