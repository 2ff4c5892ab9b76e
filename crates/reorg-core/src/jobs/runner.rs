//! Maintenance job execution.
//!
//! The runner decides *whether* a job runs when the external scheduler fires
//! it, dispatches to a [`JobHandler`], and always records the outcome.

use super::store::JobStore;
use super::types::{JobStatus, JobType, MaintenanceJob};
use crate::audit::{AuditLog, NewOperation, OperationStatus, ResourceCounters};
use crate::catalog::{DependentKind, Inspection, ObjectInspector};
use crate::engine::{EngineError, StatementExecutor};
use crate::heuristics::{ResourceHeuristics, TuningParams};
use crate::migration::{ObjectLocks, ReorgError};
use crate::statement::{Dialect, Identifier, Statement};
use crate::storage::current_timestamp;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Inputs available to a handler.
pub struct JobContext<'a> {
    /// The job being run.
    pub job: &'a MaintenanceJob,
    /// Fresh inspection of the target object.
    pub inspection: &'a Inspection,
    /// Tuning for the object's size, capped by the job's limits.
    pub tuning: TuningParams,
    /// Statement executor.
    pub executor: &'a dyn StatementExecutor,
    /// Dialect used to render statements for the audit trail.
    pub dialect: &'a dyn Dialect,
}

impl JobContext<'_> {
    /// The target object as an identifier.
    pub fn table(&self) -> Result<Identifier, EngineError> {
        Identifier::new(&self.job.target_object).map_err(|e| EngineError::Execution(e.to_string()))
    }
}

/// Result of a successful handler run.
#[derive(Debug, Clone, Default)]
pub struct JobOutput {
    /// Work done.
    pub counters: ResourceCounters,
    /// Summary message.
    pub message: Option<String>,
    /// Rendered statements issued.
    pub statements: Vec<String>,
}

/// Performs one type of maintenance.
pub trait JobHandler: Send + Sync {
    /// Run the job.
    fn run(&self, ctx: &JobContext<'_>) -> Result<JobOutput, EngineError>;
}

/// Gathers statistics with the tuned sampling percent and degree.
#[derive(Debug, Default)]
pub struct StatisticsHandler;

impl JobHandler for StatisticsHandler {
    fn run(&self, ctx: &JobContext<'_>) -> Result<JobOutput, EngineError> {
        let stmt = Statement::GatherStatistics {
            table: ctx.table()?,
            sampling_percent: ctx.tuning.sampling_percent,
            parallel_degree: ctx.tuning.parallel_degree,
            cascade: true,
        };
        ctx.executor.execute(&stmt)?;
        Ok(JobOutput {
            counters: ResourceCounters::statement(0),
            message: Some(format!(
                "statistics gathered at {}% with degree {}",
                ctx.tuning.sampling_percent, ctx.tuning.parallel_degree
            )),
            statements: vec![ctx.dialect.render(&stmt)],
        })
    }
}

/// Rebuilds every index on the object online.
#[derive(Debug, Default)]
pub struct IndexRebuildHandler;

impl JobHandler for IndexRebuildHandler {
    fn run(&self, ctx: &JobContext<'_>) -> Result<JobOutput, EngineError> {
        let mut output = JobOutput::default();
        for index in ctx
            .inspection
            .dependents
            .iter()
            .filter(|d| matches!(d.kind, DependentKind::Index { .. }))
        {
            let stmt = Statement::RebuildIndex {
                index: index.name.clone(),
                online: true,
                parallel_degree: ctx.tuning.parallel_degree,
            };
            ctx.executor.execute(&stmt)?;
            output.counters.statements_executed += 1;
            output.statements.push(ctx.dialect.render(&stmt));
        }
        output.message = Some(format!("{} indexes rebuilt", output.counters.statements_executed));
        Ok(output)
    }
}

/// Outcome of [`JobRunner::execute_job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    /// Job ID.
    pub job_id: u64,
    /// Outcome.
    pub status: JobStatus,
    /// Outcome message.
    pub message: Option<String>,
    /// Recomputed next due time.
    pub next_run: u64,
    /// Audit entry for the run.
    pub operation_id: u64,
}

/// Runs maintenance jobs.
pub struct JobRunner {
    store: Arc<JobStore>,
    executor: Arc<dyn StatementExecutor>,
    inspector: ObjectInspector,
    heuristics: ResourceHeuristics,
    audit: Arc<AuditLog>,
    dialect: Arc<dyn Dialect>,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    locks: Arc<ObjectLocks>,
}

impl JobRunner {
    /// Create a runner with the built-in statistics and index rebuild handlers.
    pub fn new(
        store: Arc<JobStore>,
        executor: Arc<dyn StatementExecutor>,
        inspector: ObjectInspector,
        heuristics: ResourceHeuristics,
        audit: Arc<AuditLog>,
        dialect: Arc<dyn Dialect>,
    ) -> Self {
        let mut handlers: HashMap<JobType, Arc<dyn JobHandler>> = HashMap::new();
        handlers.insert(JobType::Statistics, Arc::new(StatisticsHandler));
        handlers.insert(JobType::IndexRebuild, Arc::new(IndexRebuildHandler));

        Self {
            store,
            executor,
            inspector,
            heuristics,
            audit,
            dialect,
            handlers,
            locks: Arc::new(ObjectLocks::new()),
        }
    }

    /// Share an object lock table, so jobs and migrations exclude each other.
    pub fn with_locks(mut self, locks: Arc<ObjectLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Register or replace the handler for a job type.
    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type, handler);
    }

    /// The job store.
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Run a job now.
    ///
    /// Disabled jobs, jobs with a dependency whose last run did not succeed
    /// and jobs whose object is held by another operation are skipped.
    /// Whatever happens, one audit entry is written and the job's run
    /// bookkeeping and next due time are updated.
    #[instrument(skip(self))]
    pub fn execute_job(&self, job_id: u64) -> Result<JobRun, ReorgError> {
        let mut job = self.store.get(job_id)?;
        let now = current_timestamp();
        let started = Instant::now();

        let skipped = |reason: String| {
            (JobStatus::Skipped, Some(reason), ResourceCounters::default(), Vec::new())
        };
        let (status, message, counters, statements) = match self.blocker(&job) {
            Some(reason) => skipped(reason),
            None => match self.locks.acquire(&job.target_object) {
                Ok(_guard) => self.dispatch(&job),
                Err(e) => skipped(e.to_string()),
            },
        };

        let elapsed = started.elapsed();
        if let Some(max) = job.resource_limits.max_duration_secs {
            if elapsed.as_secs() > max {
                warn!(job_id, elapsed_secs = elapsed.as_secs(), max_secs = max, "Job exceeded its duration limit");
            }
        }

        job.last_run = Some(now);
        job.last_status = Some(status);
        job.last_message = message.clone();
        job.execution_count += 1;
        job.next_run = job.schedule.next_after(now);

        let audit_status = match status {
            JobStatus::Success => OperationStatus::Success,
            JobStatus::Failed => OperationStatus::Error,
            JobStatus::Skipped => OperationStatus::Warning,
        };
        let mut operation = NewOperation::new(format!("JOB_{}", job.job_type), &job.target_object)
            .with_context(serde_json::json!({
                "job_id": job.job_id,
                "job_status": status.to_string(),
                "execution_count": job.execution_count,
                "elapsed_ms": elapsed.as_millis() as u64,
            }));
        if !statements.is_empty() {
            operation = operation.with_statement(statements.join(";\n"));
        }
        let operation_id = self
            .audit
            .record(operation, audit_status, message.clone(), counters);

        if let Err(e) = self.store.save(&job) {
            error!(job_id, operation_id, error = %e, "Could not save job bookkeeping");
            return Err(e.into());
        }

        info!(job_id, job_type = %job.job_type, status = %status, next_run = job.next_run, "Maintenance job finished");

        Ok(JobRun {
            job_id,
            status,
            message,
            next_run: job.next_run,
            operation_id,
        })
    }

    fn blocker(&self, job: &MaintenanceJob) -> Option<String> {
        if !job.enabled {
            return Some("job disabled".to_string());
        }
        for dep in &job.depends_on {
            match self.store.get(*dep) {
                Ok(dependency) if dependency.last_status == Some(JobStatus::Success) => {}
                Ok(dependency) => {
                    return Some(format!(
                        "dependency {dep} last status is {}",
                        dependency
                            .last_status
                            .map_or_else(|| "never run".to_string(), |s| s.to_string())
                    ))
                }
                Err(e) => return Some(format!("dependency {dep} unavailable: {e}")),
            }
        }
        None
    }

    fn dispatch(
        &self,
        job: &MaintenanceJob,
    ) -> (JobStatus, Option<String>, ResourceCounters, Vec<String>) {
        let failed = |message: String| {
            (JobStatus::Failed, Some(message), ResourceCounters::default(), Vec::new())
        };

        let inspection = self.inspector.inspect(&job.target_object);
        if !inspection.exists {
            return failed(format!("object {} not found", job.target_object));
        }
        let Some(handler) = self.handlers.get(&job.job_type) else {
            return failed(format!("no handler registered for {}", job.job_type));
        };

        let ctx = JobContext {
            job,
            inspection: &inspection,
            tuning: self
                .heuristics
                .tune_with_limits(inspection.approx_size_bytes, &job.resource_limits),
            executor: self.executor.as_ref(),
            dialect: self.dialect.as_ref(),
        };

        match handler.run(&ctx) {
            Ok(output) => (JobStatus::Success, output.message, output.counters, output.statements),
            Err(e) => {
                if let Err(rollback) = self.executor.rollback() {
                    warn!(job_id = job.job_id, error = %rollback, "Rollback after job failure failed");
                }
                failed(e.to_string())
            }
        }
    }
}
