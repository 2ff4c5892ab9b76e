//! Migration planning.
//!
//! A [`MigrationPlan`] is an ordered list of [`Step`]s that turns an
//! existing table into one with a new physical structure:
//!
//! 1. Snapshot the table into a backup copy
//! 2. Drop the original
//! 3. Create the new structure
//! 4. Reload rows from the backup in bounded batches
//! 5. Recreate each dependent index and constraint
//! 6. Refresh statistics
//! 7. Persist the declared strategy
//!
//! Planning is pure: it validates the request against an [`Inspection`] and
//! never touches the engine.

use super::loader::LoadSpec;
use crate::catalog::{ColumnInfo, DependentKind, DependentObject, Inspection};
use crate::error::ValidationError;
use crate::heuristics::TuningParams;
use crate::statement::{
    BoundValue, ColumnSpec, ConstraintKind, Identifier, IntervalExpr, PartitionClause,
    PartitionDef, PartitionMethod, Statement, SubpartitionClause, SubpartitionKind,
    TableConstraint, Value,
};
use crate::strategy::{StrategyDraft, StrategyType};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

/// Default backup suffix format (chrono syntax).
pub const DEFAULT_BACKUP_SUFFIX_FORMAT: &str = "%y%m%d%H%M%S";

/// Subpartitioning requested under the top-level strategy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubpartitionRequest {
    /// Subpartition key column.
    pub column: String,
    /// Subpartition kind.
    pub kind: SubpartitionKind,
}

/// What a caller asks a migration to produce.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MigrationRequest {
    /// Target strategy name, e.g. `RANGE` or `AUTO_LIST`.
    pub strategy: String,
    /// Partition key column.
    #[serde(default)]
    pub partition_column: Option<String>,
    /// Interval expression for interval strategies, e.g. `1 MONTH`.
    #[serde(default)]
    pub interval: Option<String>,
    /// Foreign key to partition by, for reference partitioning.
    #[serde(default)]
    pub reference_constraint: Option<String>,
    /// Optional subpartitioning.
    #[serde(default)]
    pub subpartition: Option<SubpartitionRequest>,
    /// Explicit initial partitions for range and list strategies.
    #[serde(default)]
    pub initial_partitions: Vec<PartitionDef>,
    /// Hash partition count (derived from the parallel degree when absent).
    #[serde(default)]
    pub hash_partitions: Option<u32>,
    /// Columns left out of the new structure.
    #[serde(default)]
    pub drop_columns: Vec<String>,
    /// Storage location of the new structure.
    #[serde(default)]
    pub location: Option<String>,
    /// Retention recorded with the strategy.
    #[serde(default)]
    pub retention_days: Option<u32>,
    /// Allow scheduled maintenance on the object.
    #[serde(default)]
    pub auto_maintenance: bool,
}

impl MigrationRequest {
    /// Request a strategy with every option at its default.
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            partition_column: None,
            interval: None,
            reference_constraint: None,
            subpartition: None,
            initial_partitions: Vec::new(),
            hash_partitions: None,
            drop_columns: Vec::new(),
            location: None,
            retention_days: None,
            auto_maintenance: false,
        }
    }

    /// Set the partition column.
    pub fn with_partition_column(mut self, column: impl Into<String>) -> Self {
        self.partition_column = Some(column.into());
        self
    }

    /// Set the interval expression.
    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());
        self
    }

    /// Partition by reference through a named foreign key.
    pub fn with_reference(mut self, constraint: impl Into<String>) -> Self {
        self.reference_constraint = Some(constraint.into());
        self
    }

    /// Add subpartitioning.
    pub fn with_subpartition(mut self, column: impl Into<String>, kind: SubpartitionKind) -> Self {
        self.subpartition = Some(SubpartitionRequest {
            column: column.into(),
            kind,
        });
        self
    }

    /// Set the initial partitions.
    pub fn with_partitions(mut self, partitions: Vec<PartitionDef>) -> Self {
        self.initial_partitions = partitions;
        self
    }

    /// Set the hash partition count.
    pub fn with_hash_partitions(mut self, count: u32) -> Self {
        self.hash_partitions = Some(count);
        self
    }

    /// Leave a column out of the new structure.
    pub fn drop_column(mut self, column: impl Into<String>) -> Self {
        self.drop_columns.push(column.into());
        self
    }

    /// Set the storage location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the retention recorded with the strategy.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    /// Enable or disable scheduled maintenance.
    pub fn with_auto_maintenance(mut self, enabled: bool) -> Self {
        self.auto_maintenance = enabled;
        self
    }
}

/// Execution options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    /// Snapshot and reload rows. Without it the table is recreated empty.
    pub preserve_data: bool,
    /// Build indexes online.
    pub online: bool,
    /// Backup name suffix. Generated from the clock when absent.
    pub backup_suffix: Option<String>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            preserve_data: true,
            online: true,
            backup_suffix: None,
        }
    }
}

impl PlanOptions {
    /// Keep or discard existing rows.
    pub fn with_preserve_data(mut self, preserve: bool) -> Self {
        self.preserve_data = preserve;
        self
    }

    /// Build indexes online or offline.
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Use a fixed backup suffix.
    pub fn with_backup_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.backup_suffix = Some(suffix.into());
        self
    }
}

/// What a step does.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Execute one statement.
    Statement(Statement),
    /// Copy rows in bounded batches.
    BulkLoad(LoadSpec),
    /// Record the declared strategy in the config store.
    PersistStrategy(StrategyDraft),
}

/// One unit of a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// 1-based position, gapless within a plan.
    pub step_number: u32,
    /// Short machine-readable name.
    pub name: String,
    /// Action.
    pub action: StepAction,
    /// Human-readable description.
    pub description: String,
    /// Whether the step runs with intra-statement parallelism.
    pub is_parallel: bool,
    /// Degree used when parallel.
    pub parallel_degree: u32,
}

impl Step {
    /// The statement, for statement steps.
    pub fn statement(&self) -> Option<&Statement> {
        match &self.action {
            StepAction::Statement(statement) => Some(statement),
            _ => None,
        }
    }
}

/// A validated migration plan.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationPlan {
    /// Object being reorganized.
    pub object: Identifier,
    /// Target strategy.
    pub strategy: StrategyType,
    /// Backup copy, when data is preserved.
    pub backup: Option<Identifier>,
    /// Tuning used for every step.
    pub tuning: TuningParams,
    /// Rows in the object at planning time.
    pub source_rows: u64,
    /// Columns of the object at planning time.
    pub source_columns: Vec<ColumnInfo>,
    /// Steps in execution order.
    pub steps: Vec<Step>,
}

impl MigrationPlan {
    /// Number of steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Statements in step order, skipping non-statement steps.
    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.steps.iter().filter_map(Step::statement)
    }
}

/// Builds [`MigrationPlan`]s.
pub struct PlanBuilder {
    steps: Vec<Step>,
}

impl PlanBuilder {
    /// Validate a request and produce the plan.
    ///
    /// Fails without side effects on any invalid input.
    pub fn build(
        inspection: &Inspection,
        request: &MigrationRequest,
        tuning: TuningParams,
        options: &PlanOptions,
    ) -> Result<MigrationPlan, ValidationError> {
        if !inspection.exists {
            return Err(ValidationError::NotFound {
                object: inspection.object.clone(),
            });
        }
        let object = Identifier::new(&inspection.object)?;
        let strategy: StrategyType = request.strategy.parse()?;
        let resolved = Resolved::new(&object, inspection, request, strategy, tuning)?;

        let backup = if options.preserve_data {
            let suffix = match &options.backup_suffix {
                Some(suffix) => suffix.clone(),
                None => Utc::now().format(DEFAULT_BACKUP_SUFFIX_FORMAT).to_string(),
            };
            Some(object.with_suffix(&format!("_BK{suffix}"))?)
        } else {
            None
        };

        let degree = tuning.parallel_degree;
        let mut builder = PlanBuilder { steps: Vec::new() };

        if let Some(backup) = &backup {
            builder.push(
                "snapshot",
                StepAction::Statement(Statement::CreateTableAs {
                    table: backup.clone(),
                    source: object.clone(),
                    columns: Vec::new(),
                    with_data: true,
                    parallel_degree: degree,
                    location: None,
                }),
                format!("Copy {object} into backup {backup}"),
                Some(degree),
            );
        }

        builder.push(
            "drop_original",
            StepAction::Statement(Statement::DropTable {
                table: object.clone(),
                purge: false,
            }),
            format!("Drop {object}"),
            None,
        );

        builder.push(
            "create_structure",
            StepAction::Statement(Statement::CreateTable {
                table: object.clone(),
                columns: resolved.columns.clone(),
                constraints: resolved.inline_constraints.clone(),
                partitioning: resolved.partitioning.clone(),
                location: resolved.location.clone(),
            }),
            format!("Create {object} with {strategy} structure"),
            None,
        );

        if let Some(backup) = &backup {
            builder.push(
                "reload",
                StepAction::BulkLoad(LoadSpec {
                    source: backup.clone(),
                    target: object.clone(),
                    columns: resolved.columns.iter().map(|c| c.name.clone()).collect(),
                    key: resolved.key.clone(),
                    batch_size: tuning.batch_size,
                    parallel_degree: degree,
                    expected_rows: inspection.row_count,
                }),
                format!(
                    "Reload {} rows from {backup} in batches of {}",
                    inspection.row_count, tuning.batch_size
                ),
                Some(degree),
            );
        }

        for dependent in &resolved.dependents {
            builder.push_dependent(&object, dependent, &resolved, options.online, degree);
        }

        builder.push(
            "refresh_statistics",
            StepAction::Statement(Statement::GatherStatistics {
                table: object.clone(),
                sampling_percent: tuning.sampling_percent,
                parallel_degree: degree,
                cascade: true,
            }),
            format!(
                "Gather statistics on {object} sampling {}%",
                tuning.sampling_percent
            ),
            Some(degree),
        );

        builder.push(
            "persist_strategy",
            StepAction::PersistStrategy(resolved.draft(&object, request)),
            format!("Record {strategy} as the declared strategy of {object}"),
            None,
        );

        debug!(
            object = %object,
            strategy = %strategy,
            steps = builder.steps.len(),
            preserve_data = options.preserve_data,
            "Migration planned"
        );

        Ok(MigrationPlan {
            object,
            strategy,
            backup,
            tuning,
            source_rows: inspection.row_count,
            source_columns: inspection.columns.clone(),
            steps: builder.steps,
        })
    }

    fn push(
        &mut self,
        name: &str,
        action: StepAction,
        description: String,
        parallel: Option<u32>,
    ) {
        self.steps.push(Step {
            step_number: self.steps.len() as u32 + 1,
            name: name.to_string(),
            action,
            description,
            is_parallel: parallel.is_some_and(|d| d > 1),
            parallel_degree: parallel.unwrap_or(1),
        });
    }

    fn push_dependent(
        &mut self,
        table: &Identifier,
        dependent: &DependentObject,
        resolved: &Resolved,
        online: bool,
        degree: u32,
    ) {
        let name = dependent.name.clone();
        let columns = dependent.columns.clone();
        let (statement, parallel) = match &dependent.kind {
            DependentKind::Index { unique } => (
                Statement::CreateIndex {
                    index: name.clone(),
                    table: table.clone(),
                    columns,
                    unique: *unique,
                    local: resolved.partitioning.is_some() && !unique,
                    online,
                    parallel_degree: degree,
                },
                Some(degree),
            ),
            DependentKind::PrimaryKey => (add_constraint(table, &name, ConstraintKind::PrimaryKey, columns), None),
            DependentKind::Unique => (add_constraint(table, &name, ConstraintKind::Unique, columns), None),
            DependentKind::ForeignKey {
                references,
                ref_columns,
            } => (
                add_constraint(
                    table,
                    &name,
                    ConstraintKind::ForeignKey {
                        references: references.clone(),
                        ref_columns: ref_columns.clone(),
                    },
                    columns,
                ),
                None,
            ),
            DependentKind::Check { condition } => (
                add_constraint(
                    table,
                    &name,
                    ConstraintKind::Check {
                        condition: condition.clone(),
                    },
                    columns,
                ),
                None,
            ),
        };
        let what = if dependent.kind.is_index() { "index" } else { "constraint" };
        self.push(
            "rebuild_dependent",
            StepAction::Statement(statement),
            format!("Recreate {what} {name} on {table}"),
            parallel,
        );
    }
}

fn add_constraint(
    table: &Identifier,
    name: &Identifier,
    kind: ConstraintKind,
    columns: Vec<Identifier>,
) -> Statement {
    Statement::AddConstraint {
        constraint: name.clone(),
        table: table.clone(),
        kind,
        columns,
    }
}

fn is_temporal(data_type: &str) -> bool {
    let upper = data_type.to_ascii_uppercase();
    upper.contains("DATE") || upper.contains("TIMESTAMP")
}

/// Keys first, then indexes, then foreign keys and checks.
fn rebuild_order(kind: &DependentKind) -> u8 {
    match kind {
        DependentKind::PrimaryKey => 0,
        DependentKind::Unique => 1,
        DependentKind::Index { .. } => 2,
        DependentKind::ForeignKey { .. } => 3,
        DependentKind::Check { .. } => 4,
    }
}

/// Request fields checked against the inspection.
struct Resolved {
    strategy: StrategyType,
    columns: Vec<ColumnSpec>,
    partition_column: Option<Identifier>,
    interval: Option<IntervalExpr>,
    partitioning: Option<PartitionClause>,
    inline_constraints: Vec<TableConstraint>,
    dependents: Vec<DependentObject>,
    key: Option<Identifier>,
    location: Option<Identifier>,
}

impl Resolved {
    fn new(
        object: &Identifier,
        inspection: &Inspection,
        request: &MigrationRequest,
        strategy: StrategyType,
        tuning: TuningParams,
    ) -> Result<Self, ValidationError> {
        let unknown = |column: &str| ValidationError::UnknownColumn {
            object: object.to_string(),
            column: column.to_string(),
        };
        let existing = |column: &str| -> Result<Identifier, ValidationError> {
            inspection
                .column(column)
                .map(|c| c.name.clone())
                .ok_or_else(|| unknown(column))
        };

        let mut dropped = HashSet::new();
        for column in &request.drop_columns {
            dropped.insert(existing(column)?);
        }
        let columns: Vec<ColumnSpec> = inspection
            .columns
            .iter()
            .filter(|c| !dropped.contains(&c.name))
            .map(|c| c.to_spec())
            .collect();
        if columns.is_empty() {
            return Err(ValidationError::InvalidOption(format!(
                "cannot drop every column of {object}"
            )));
        }
        let kept = |column: Identifier| -> Result<Identifier, ValidationError> {
            if dropped.contains(&column) {
                Err(ValidationError::InvalidOption(format!(
                    "column {column} is both dropped and used for partitioning"
                )))
            } else {
                Ok(column)
            }
        };

        let partition_column = match (strategy.requires_column(), &request.partition_column) {
            (true, Some(column)) => Some(kept(existing(column)?)?),
            (true, None) => {
                return Err(ValidationError::MissingPartitionColumn {
                    strategy: strategy.to_string(),
                })
            }
            (false, Some(column)) => {
                return Err(ValidationError::InvalidOption(format!(
                    "strategy {strategy} does not take a partition column (got {column})"
                )))
            }
            (false, None) => None,
        };

        let interval = if strategy.uses_interval() {
            let expr = match (&request.interval, strategy) {
                (Some(text), _) => text
                    .parse::<IntervalExpr>()
                    .map_err(ValidationError::InvalidOption)?,
                (None, StrategyType::AutoRange) => IntervalExpr::Months(1),
                (None, _) => {
                    return Err(ValidationError::InvalidOption(format!(
                        "strategy {strategy} requires an interval expression"
                    )))
                }
            };
            Some(expr)
        } else if let Some(text) = &request.interval {
            return Err(ValidationError::InvalidOption(format!(
                "strategy {strategy} does not take an interval (got '{text}')"
            )));
        } else {
            None
        };

        let mut inline_constraints = Vec::new();
        let method = match (strategy, &partition_column) {
            (StrategyType::None, _) => None,
            (StrategyType::Reference, _) => {
                let fk = Self::reference_key(object, inspection, request)?;
                for column in &fk.columns {
                    kept(column.clone())?;
                }
                if let DependentKind::ForeignKey {
                    references,
                    ref_columns,
                } = &fk.kind
                {
                    inline_constraints.push(TableConstraint {
                        name: fk.name.clone(),
                        kind: ConstraintKind::ForeignKey {
                            references: references.clone(),
                            ref_columns: ref_columns.clone(),
                        },
                        columns: fk.columns.clone(),
                    });
                }
                Some(PartitionMethod::Reference {
                    constraint: fk.name.clone(),
                })
            }
            (_, None) => {
                return Err(ValidationError::MissingPartitionColumn {
                    strategy: strategy.to_string(),
                })
            }
            (_, Some(column)) => Some(Self::method(
                strategy,
                column,
                inspection,
                request,
                interval,
                tuning,
            )?),
        };

        if !request.initial_partitions.is_empty()
            && !matches!(
                method,
                Some(PartitionMethod::Range { .. } | PartitionMethod::List { .. })
            )
        {
            return Err(ValidationError::InvalidOption(format!(
                "strategy {strategy} does not take explicit partitions"
            )));
        }

        let subpartition = match &request.subpartition {
            None => None,
            Some(_) if method.is_none() => {
                return Err(ValidationError::InvalidOption(
                    "subpartitioning requires a partitioned strategy".to_string(),
                ))
            }
            Some(sub) => {
                if let SubpartitionKind::Hash { count: 0 } = sub.kind {
                    return Err(ValidationError::InvalidOption(
                        "hash subpartition count must be positive".to_string(),
                    ));
                }
                Some(SubpartitionClause {
                    column: kept(existing(&sub.column)?)?,
                    kind: sub.kind.clone(),
                })
            }
        };

        let location = request.location.as_deref().map(Identifier::new).transpose()?;

        let inline: HashSet<&Identifier> = inline_constraints.iter().map(|c| &c.name).collect();
        let mut dependents: Vec<DependentObject> = inspection
            .dependents
            .iter()
            .filter(|d| !inline.contains(&d.name))
            .filter(|d| {
                let keep = !d.columns.iter().any(|c| dropped.contains(c));
                if !keep {
                    debug!(object = %object, dependent = %d.name, "Skipping dependent on dropped column");
                }
                keep
            })
            .cloned()
            .collect();
        dependents.sort_by_key(|d| rebuild_order(&d.kind));

        let key = inspection
            .key_column()
            .filter(|k| !dropped.contains(*k))
            .cloned();

        Ok(Self {
            strategy,
            columns,
            partition_column,
            interval,
            partitioning: method.map(|method| PartitionClause {
                method,
                subpartition,
            }),
            inline_constraints,
            dependents,
            key,
            location,
        })
    }

    fn reference_key<'a>(
        object: &Identifier,
        inspection: &'a Inspection,
        request: &MigrationRequest,
    ) -> Result<&'a DependentObject, ValidationError> {
        let missing = |constraint: &str| ValidationError::MissingReferenceConstraint {
            object: object.to_string(),
            constraint: constraint.to_string(),
        };
        match &request.reference_constraint {
            Some(name) => inspection
                .foreign_keys()
                .find(|fk| fk.name.matches(name))
                .ok_or_else(|| missing(name)),
            None => {
                let mut keys = inspection.foreign_keys();
                match (keys.next(), keys.next()) {
                    (Some(fk), None) => Ok(fk),
                    (None, _) => Err(missing("<none>")),
                    (Some(_), Some(_)) => Err(ValidationError::InvalidOption(format!(
                        "{object} has several foreign keys, name the one to partition by"
                    ))),
                }
            }
        }
    }

    fn method(
        strategy: StrategyType,
        column: &Identifier,
        inspection: &Inspection,
        request: &MigrationRequest,
        interval: Option<IntervalExpr>,
        tuning: TuningParams,
    ) -> Result<PartitionMethod, ValidationError> {
        let explicit = (!request.initial_partitions.is_empty()).then(|| request.initial_partitions.clone());
        let named = |name: &str| Identifier::new(name).map_err(ValidationError::from);

        let method = match strategy {
            StrategyType::Range | StrategyType::Hybrid => PartitionMethod::Range {
                column: column.clone(),
                partitions: match explicit {
                    Some(p) => p,
                    None => vec![PartitionDef::less_than(named("P_MAX")?, BoundValue::MaxValue)],
                },
                interval: None,
            },
            StrategyType::Interval | StrategyType::AutoRange => {
                let Some(interval) = interval else {
                    return Err(ValidationError::InvalidOption(format!(
                        "strategy {strategy} requires an interval expression"
                    )));
                };
                let temporal = inspection
                    .column(column.as_str())
                    .is_some_and(|c| is_temporal(&c.data_type));
                let first_bound = match (interval, temporal) {
                    (IntervalExpr::Numeric(_), false) => Value::Integer(1),
                    (IntervalExpr::Numeric(_), true) => {
                        return Err(ValidationError::InvalidOption(format!(
                            "numeric interval {interval} on date column {column}"
                        )))
                    }
                    (_, true) => NaiveDate::from_ymd_opt(2000, 1, 1)
                        .map(Value::Date)
                        .ok_or_else(|| ValidationError::InvalidOption("invalid initial bound".to_string()))?,
                    (_, false) => {
                        return Err(ValidationError::InvalidOption(format!(
                            "calendar interval {interval} on non-date column {column}"
                        )))
                    }
                };
                PartitionMethod::Range {
                    column: column.clone(),
                    partitions: match explicit {
                        Some(p) => p,
                        None => vec![PartitionDef::less_than(
                            named("P_INITIAL")?,
                            BoundValue::Literal(first_bound),
                        )],
                    },
                    interval: Some(interval),
                }
            }
            StrategyType::List => PartitionMethod::List {
                column: column.clone(),
                partitions: match explicit {
                    Some(p) => p,
                    None => vec![PartitionDef::values(named("P_DEFAULT")?, vec![BoundValue::Default])],
                },
                automatic: false,
            },
            StrategyType::AutoList => PartitionMethod::List {
                column: column.clone(),
                partitions: match explicit {
                    Some(p) => p,
                    None => vec![PartitionDef::values(
                        named("P_NULL")?,
                        vec![BoundValue::Literal(Value::Null)],
                    )],
                },
                automatic: true,
            },
            StrategyType::Hash => {
                let partitions = match request.hash_partitions {
                    Some(0) => {
                        return Err(ValidationError::InvalidOption(
                            "hash partition count must be positive".to_string(),
                        ))
                    }
                    Some(n) => n,
                    None => default_hash_partitions(tuning.parallel_degree),
                };
                PartitionMethod::Hash {
                    column: column.clone(),
                    partitions,
                }
            }
            StrategyType::Reference | StrategyType::None => {
                return Err(ValidationError::InvalidOption(format!(
                    "strategy {strategy} has no column partitioning"
                )))
            }
        };
        Ok(method)
    }

    fn draft(&self, object: &Identifier, request: &MigrationRequest) -> StrategyDraft {
        let mut draft = StrategyDraft::new(object.as_str(), self.strategy)
            .with_auto_maintenance(request.auto_maintenance);
        if let Some(column) = &self.partition_column {
            draft = draft.with_partition_column(column.as_str());
        }
        if let Some(interval) = &self.interval {
            draft = draft.with_interval(interval.to_string());
        }
        if let Some(days) = request.retention_days {
            draft = draft.with_retention_days(days);
        }
        draft
    }
}

/// Hash partition count for a parallel degree: a power of two, at least 4.
pub fn default_hash_partitions(parallel_degree: u32) -> u32 {
    parallel_degree
        .saturating_mul(2)
        .max(4)
        .checked_next_power_of_two()
        .unwrap_or(1 << 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnInfo, StructureKind};

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    fn tuning() -> TuningParams {
        TuningParams {
            parallel_degree: 8,
            batch_size: 20_000,
            sampling_percent: 2.0,
        }
    }

    fn sales() -> Inspection {
        Inspection {
            object: "SALES".to_string(),
            exists: true,
            is_structured: false,
            structure_kind: StructureKind::Heap,
            columns: vec![
                ColumnInfo::new(id("ID"), "NUMBER", false),
                ColumnInfo::new(id("SALE_DATE"), "DATE", false),
                ColumnInfo::new(id("REGION"), "VARCHAR2(10)", true),
                ColumnInfo::new(id("LEGACY_CODE"), "VARCHAR2(4)", true),
            ],
            approx_size_bytes: 50_000 * 1024 * 1024,
            row_count: 1_000_000,
            dependents: vec![
                DependentObject::new(id("SALES_REGION_IX"), DependentKind::Index { unique: false }, vec![id("REGION")]),
                DependentObject::new(id("SALES_PK"), DependentKind::PrimaryKey, vec![id("ID")]),
            ],
            location: None,
        }
    }

    fn options() -> PlanOptions {
        PlanOptions::default().with_backup_suffix("T1")
    }

    fn names(plan: &MigrationPlan) -> Vec<&str> {
        plan.steps.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_range_plan_has_canonical_steps() {
        let request = MigrationRequest::new("range").with_partition_column("sale_date");
        let plan = PlanBuilder::build(&sales(), &request, tuning(), &options()).unwrap();

        assert_eq!(
            names(&plan),
            vec![
                "snapshot",
                "drop_original",
                "create_structure",
                "reload",
                "rebuild_dependent",
                "rebuild_dependent",
                "refresh_statistics",
                "persist_strategy",
            ]
        );
        assert_eq!(plan.backup, Some(id("SALES_BKT1")));
        assert_eq!(plan.strategy, StrategyType::Range);
        for (i, step) in plan.steps.iter().enumerate() {
            assert_eq!(step.step_number as usize, i + 1);
        }

        // Primary key is recreated before the index.
        assert!(matches!(
            plan.steps[4].statement(),
            Some(Statement::AddConstraint { kind: ConstraintKind::PrimaryKey, .. })
        ));
        assert!(matches!(
            plan.steps[5].statement(),
            Some(Statement::CreateIndex { local: true, online: true, parallel_degree: 8, .. })
        ));
    }

    #[test]
    fn test_reload_uses_key_and_tuning() {
        let request = MigrationRequest::new("RANGE").with_partition_column("SALE_DATE");
        let plan = PlanBuilder::build(&sales(), &request, tuning(), &options()).unwrap();

        let StepAction::BulkLoad(spec) = &plan.steps[3].action else {
            panic!("step 4 should be the reload");
        };
        assert_eq!(spec.key, Some(id("ID")));
        assert_eq!(spec.batch_size, 20_000);
        assert_eq!(spec.source, id("SALES_BKT1"));
        assert_eq!(spec.expected_rows, 1_000_000);
        assert!(plan.steps[3].is_parallel);
    }

    #[test]
    fn test_without_preserve_data_skips_snapshot_and_reload() {
        let request = MigrationRequest::new("HASH").with_partition_column("ID");
        let plan = PlanBuilder::build(
            &sales(),
            &request,
            tuning(),
            &PlanOptions::default().with_preserve_data(false),
        )
        .unwrap();

        assert_eq!(plan.backup, None);
        assert_eq!(names(&plan)[0], "drop_original");
        assert!(!names(&plan).contains(&"reload"));
        assert_eq!(plan.steps.last().map(|s| s.step_number), Some(plan.step_count() as u32));
    }

    #[test]
    fn test_missing_object_is_rejected() {
        let request = MigrationRequest::new("RANGE").with_partition_column("ID");
        let result = PlanBuilder::build(&Inspection::missing("GHOST"), &request, tuning(), &options());
        assert!(matches!(result, Err(ValidationError::NotFound { ref object }) if object == "GHOST"));
    }

    #[test]
    fn test_request_validation() {
        let inspection = sales();
        let build = |request: MigrationRequest| PlanBuilder::build(&inspection, &request, tuning(), &options());

        assert!(matches!(
            build(MigrationRequest::new("composite")),
            Err(ValidationError::UnknownStrategy { .. })
        ));
        assert!(matches!(
            build(MigrationRequest::new("LIST")),
            Err(ValidationError::MissingPartitionColumn { .. })
        ));
        assert!(matches!(
            build(MigrationRequest::new("LIST").with_partition_column("COUNTRY")),
            Err(ValidationError::UnknownColumn { ref column, .. }) if column == "COUNTRY"
        ));
        assert!(matches!(
            build(MigrationRequest::new("INTERVAL").with_partition_column("SALE_DATE")),
            Err(ValidationError::InvalidOption(_))
        ));
        assert!(matches!(
            build(
                MigrationRequest::new("RANGE")
                    .with_partition_column("SALE_DATE")
                    .drop_column("SALE_DATE")
            ),
            Err(ValidationError::InvalidOption(_))
        ));
        assert!(matches!(
            build(MigrationRequest::new("REFERENCE")),
            Err(ValidationError::MissingReferenceConstraint { .. })
        ));
        assert!(matches!(
            build(MigrationRequest::new("NONE").with_location("bad location")),
            Err(ValidationError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_interval_partitions() {
        let request = MigrationRequest::new("INTERVAL")
            .with_partition_column("SALE_DATE")
            .with_interval("1 MONTH")
            .with_retention_days(365);
        let plan = PlanBuilder::build(&sales(), &request, tuning(), &options()).unwrap();

        let Some(Statement::CreateTable { partitioning: Some(clause), .. }) = plan.steps[2].statement() else {
            panic!("step 3 should create the structure");
        };
        let PartitionMethod::Range { partitions, interval, .. } = &clause.method else {
            panic!("interval strategies render as range");
        };
        assert_eq!(*interval, Some(IntervalExpr::Months(1)));
        assert_eq!(partitions[0].name, id("P_INITIAL"));

        let Some(StepAction::PersistStrategy(draft)) = plan.steps.last().map(|s| &s.action) else {
            panic!("last step should persist the strategy");
        };
        assert_eq!(draft.interval_expression.as_deref(), Some("1 MONTH"));
        assert_eq!(draft.partition_column.as_deref(), Some("SALE_DATE"));
        assert_eq!(draft.retention_days, Some(365));
    }

    #[test]
    fn test_numeric_interval_on_date_rejected() {
        let request = MigrationRequest::new("INTERVAL")
            .with_partition_column("SALE_DATE")
            .with_interval("1000");
        let result = PlanBuilder::build(&sales(), &request, tuning(), &options());
        assert!(matches!(result, Err(ValidationError::InvalidOption(_))));
    }

    #[test]
    fn test_dropped_columns_and_their_dependents() {
        let mut inspection = sales();
        inspection.dependents.push(DependentObject::new(
            id("SALES_LEGACY_IX"),
            DependentKind::Index { unique: false },
            vec![id("LEGACY_CODE")],
        ));
        let request = MigrationRequest::new("NONE").drop_column("legacy_code");
        let plan = PlanBuilder::build(&inspection, &request, tuning(), &options()).unwrap();

        let Some(Statement::CreateTable { columns, partitioning, .. }) = plan.steps[2].statement() else {
            panic!("step 3 should create the structure");
        };
        assert!(partitioning.is_none());
        assert!(!columns.iter().any(|c| c.name == id("LEGACY_CODE")));
        assert!(!plan.statements().any(|s| matches!(
            s,
            Statement::CreateIndex { index, .. } if *index == id("SALES_LEGACY_IX")
        )));
        // Heap targets get global indexes.
        assert!(plan.statements().any(|s| matches!(s, Statement::CreateIndex { local: false, .. })));
    }

    #[test]
    fn test_reference_declares_foreign_key_inline() {
        let mut inspection = sales();
        inspection.dependents.push(DependentObject::new(
            id("SALES_REGION_FK"),
            DependentKind::ForeignKey {
                references: id("REGIONS"),
                ref_columns: vec![id("CODE")],
            },
            vec![id("REGION")],
        ));
        let request = MigrationRequest::new("REFERENCE");
        let plan = PlanBuilder::build(&inspection, &request, tuning(), &options()).unwrap();

        let Some(Statement::CreateTable { constraints, partitioning: Some(clause), .. }) =
            plan.steps[2].statement()
        else {
            panic!("step 3 should create the structure");
        };
        assert_eq!(constraints.len(), 1);
        assert_eq!(
            clause.method,
            PartitionMethod::Reference { constraint: id("SALES_REGION_FK") }
        );
        assert!(!plan.statements().any(|s| matches!(
            s,
            Statement::AddConstraint { constraint, .. } if *constraint == id("SALES_REGION_FK")
        )));
    }

    #[test]
    fn test_hash_partition_count() {
        assert_eq!(default_hash_partitions(1), 4);
        assert_eq!(default_hash_partitions(2), 4);
        assert_eq!(default_hash_partitions(3), 8);
        assert_eq!(default_hash_partitions(8), 16);

        let request = MigrationRequest::new("HASH").with_partition_column("ID");
        let plan = PlanBuilder::build(&sales(), &request, tuning(), &options()).unwrap();
        assert!(plan.statements().any(|s| matches!(
            s,
            Statement::CreateTable {
                partitioning: Some(PartitionClause { method: PartitionMethod::Hash { partitions: 16, .. }, .. }),
                ..
            }
        )));

        let request = MigrationRequest::new("HASH").with_partition_column("ID").with_hash_partitions(0);
        assert!(PlanBuilder::build(&sales(), &request, tuning(), &options()).is_err());
    }

    #[test]
    fn test_subpartition_requires_partitioning() {
        let request = MigrationRequest::new("NONE").with_subpartition("REGION", SubpartitionKind::List);
        assert!(matches!(
            PlanBuilder::build(&sales(), &request, tuning(), &options()),
            Err(ValidationError::InvalidOption(_))
        ));

        let request = MigrationRequest::new("RANGE")
            .with_partition_column("SALE_DATE")
            .with_subpartition("REGION", SubpartitionKind::Hash { count: 4 });
        let plan = PlanBuilder::build(&sales(), &request, tuning(), &options()).unwrap();
        let Some(Statement::CreateTable { partitioning: Some(clause), .. }) = plan.steps[2].statement() else {
            panic!("step 3 should create the structure");
        };
        assert_eq!(clause.subpartition.as_ref().map(|s| &s.column), Some(&id("REGION")));
    }

    #[test]
    fn test_request_from_json() {
        let request: MigrationRequest = serde_json::from_str(
            r#"{"strategy": "AUTO_LIST", "partition_column": "REGION", "auto_maintenance": true}"#,
        )
        .unwrap();
        let plan = PlanBuilder::build(&sales(), &request, tuning(), &options()).unwrap();
        assert_eq!(plan.strategy, StrategyType::AutoList);
        assert!(plan.statements().any(|s| matches!(
            s,
            Statement::CreateTable {
                partitioning: Some(PartitionClause { method: PartitionMethod::List { automatic: true, .. }, .. }),
                ..
            }
        )));
    }
}
