//! In-memory reference engine.
//!
//! Implements both [`Catalog`] and [`StatementExecutor`] over plain row
//! vectors. DDL implicitly commits pending inserts; inserts stay pending
//! until `commit`. Faults can be injected per statement kind, and a
//! constraint violation can be armed to fire after a number of inserted rows.

use super::{EngineError, ExecOutcome, StatementExecutor};
use crate::catalog::{
    Catalog, ColumnInfo, DependentKind, DependentObject, ObjectDescription, StructureKind,
};
use crate::statement::{
    BatchCursor, ConstraintKind, Identifier, InsertBatch, PartitionMethod, Statement,
    StatementKind, Value,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Statistics recorded by a `GatherStatistics` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    /// Row count at gather time.
    pub row_count: u64,
    /// Sampling percent used.
    pub sampling_percent: f64,
    /// Degree used.
    pub parallel_degree: u32,
}

/// A table held by the [`MemoryEngine`].
#[derive(Debug, Clone)]
pub struct MemoryTable {
    /// Table name.
    pub name: Identifier,
    /// Columns.
    pub columns: Vec<ColumnInfo>,
    /// Committed rows, one value per column.
    pub rows: Vec<Vec<Value>>,
    /// Physical structure.
    pub kind: StructureKind,
    /// Partition names.
    pub partitions: Vec<Identifier>,
    /// Indexes and constraints.
    pub dependents: Vec<DependentObject>,
    /// Storage location.
    pub location: Option<Identifier>,
    /// Bytes each row contributes to the reported size.
    pub bytes_per_row: u64,
    /// Reported size override.
    pub declared_size_bytes: Option<u64>,
    /// Last gathered statistics.
    pub stats: Option<TableStats>,
    /// Number of times an index on this table was rebuilt.
    pub index_rebuilds: u64,
}

impl MemoryTable {
    /// Create an empty heap table.
    pub fn new(name: Identifier, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name,
            columns,
            rows: Vec::new(),
            kind: StructureKind::Heap,
            partitions: Vec::new(),
            dependents: Vec::new(),
            location: None,
            bytes_per_row: 100,
            declared_size_bytes: None,
            stats: None,
            index_rebuilds: 0,
        }
    }

    /// Set the rows.
    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        self
    }

    /// Add an index or constraint.
    pub fn with_dependent(mut self, dependent: DependentObject) -> Self {
        self.dependents.push(dependent);
        self
    }

    /// Report a fixed size instead of one derived from the row count.
    pub fn with_size_bytes(mut self, size: u64) -> Self {
        self.declared_size_bytes = Some(size);
        self
    }

    /// Set the per-row size.
    pub fn with_bytes_per_row(mut self, bytes: u64) -> Self {
        self.bytes_per_row = bytes;
        self
    }

    /// Set the storage location.
    pub fn with_location(mut self, location: Identifier) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the partitioning.
    pub fn with_structure(mut self, kind: StructureKind, partitions: Vec<Identifier>) -> Self {
        self.kind = kind;
        self.partitions = partitions;
        self
    }

    /// Reported size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.declared_size_bytes
            .unwrap_or(self.rows.len() as u64 * self.bytes_per_row)
    }

    /// Index of a column.
    pub fn column_index(&self, name: &Identifier) -> Option<usize> {
        self.columns.iter().position(|c| &c.name == name)
    }

    fn column_indexes(&self, names: &[Identifier]) -> Result<Vec<usize>, EngineError> {
        names
            .iter()
            .map(|n| {
                self.column_index(n).ok_or_else(|| {
                    EngineError::Execution(format!("column {n} does not exist on {}", self.name))
                })
            })
            .collect()
    }

    fn describe(&self) -> ObjectDescription {
        ObjectDescription {
            name: self.name.clone(),
            kind: self.kind.clone(),
            columns: self.columns.clone(),
            size_bytes: self.size_bytes(),
            row_count: self.rows.len() as u64,
            dependents: self.dependents.clone(),
            location: self.location.clone(),
        }
    }

    fn update_partition_count(&mut self) {
        if let StructureKind::Partitioned {
            partition_count, ..
        } = &mut self.kind
        {
            *partition_count = self.partitions.len() as u32;
        }
    }
}

#[derive(Debug)]
struct ArmedViolation {
    after_rows: u64,
    constraint: String,
    inserted: u64,
}

#[derive(Debug, Default)]
struct EngineState {
    tables: HashMap<Identifier, MemoryTable>,
    pending: HashMap<Identifier, Vec<Vec<Value>>>,
    executed: Vec<Statement>,
    commits: u64,
    rollbacks: u64,
    failures: Vec<(StatementKind, String)>,
    violation: Option<ArmedViolation>,
}

/// In-memory engine used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<EngineState>,
}

impl MemoryEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a committed table.
    pub fn create_table(&self, table: MemoryTable) {
        self.state.lock().tables.insert(table.name.clone(), table);
    }

    /// Snapshot of a committed table.
    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        let name = Identifier::new(name).ok()?;
        self.state.lock().tables.get(&name).cloned()
    }

    /// Whether a table exists.
    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// Committed row count of a table.
    pub fn row_count(&self, name: &str) -> Option<usize> {
        self.table(name).map(|t| t.rows.len())
    }

    /// Every statement passed to `execute`, in order.
    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().executed.clone()
    }

    /// Number of executed statements of a kind.
    pub fn count(&self, kind: StatementKind) -> usize {
        self.state
            .lock()
            .executed
            .iter()
            .filter(|s| s.kind() == kind)
            .count()
    }

    /// Number of explicit commits.
    pub fn commits(&self) -> u64 {
        self.state.lock().commits
    }

    /// Number of explicit rollbacks.
    pub fn rollbacks(&self) -> u64 {
        self.state.lock().rollbacks
    }

    /// Fail the next statement of `kind` with an execution error.
    pub fn fail_next(&self, kind: StatementKind, message: impl Into<String>) {
        self.state.lock().failures.push((kind, message.into()));
    }

    /// Raise a constraint violation once more than `rows` rows have been
    /// inserted by `InsertBatch` statements. The offending batch fails whole.
    pub fn violate_after(&self, rows: u64, constraint: impl Into<String>) {
        self.state.lock().violation = Some(ArmedViolation {
            after_rows: rows,
            constraint: constraint.into(),
            inserted: 0,
        });
    }
}

impl Catalog for MemoryEngine {
    fn describe(&self, name: &Identifier) -> Result<Option<ObjectDescription>, EngineError> {
        Ok(self.state.lock().tables.get(name).map(MemoryTable::describe))
    }
}

impl StatementExecutor for MemoryEngine {
    fn execute(&self, statement: &Statement) -> Result<ExecOutcome, EngineError> {
        let mut state = self.state.lock();
        state.executed.push(statement.clone());

        let kind = statement.kind();
        if let Some(pos) = state.failures.iter().position(|(k, _)| *k == kind) {
            let (_, message) = state.failures.remove(pos);
            return Err(EngineError::Execution(message));
        }

        if statement.is_ddl() {
            state.apply_pending();
        }
        state.apply(statement)
    }

    fn commit(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.apply_pending();
        state.commits += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.pending.clear();
        state.rollbacks += 1;
        Ok(())
    }
}

fn not_found(name: &Identifier) -> EngineError {
    EngineError::ObjectNotFound {
        object: name.to_string(),
    }
}

fn exists(name: &Identifier) -> EngineError {
    EngineError::ObjectExists {
        object: name.to_string(),
    }
}

fn dependent_kind(kind: &ConstraintKind) -> DependentKind {
    match kind {
        ConstraintKind::PrimaryKey => DependentKind::PrimaryKey,
        ConstraintKind::Unique => DependentKind::Unique,
        ConstraintKind::ForeignKey {
            references,
            ref_columns,
        } => DependentKind::ForeignKey {
            references: references.clone(),
            ref_columns: ref_columns.clone(),
        },
        ConstraintKind::Check { condition } => DependentKind::Check {
            condition: condition.clone(),
        },
    }
}

fn is_unique(kind: &DependentKind) -> bool {
    matches!(
        kind,
        DependentKind::PrimaryKey | DependentKind::Unique | DependentKind::Index { unique: true }
    )
}

impl EngineState {
    fn table(&self, name: &Identifier) -> Result<&MemoryTable, EngineError> {
        self.tables.get(name).ok_or_else(|| not_found(name))
    }

    fn table_mut(&mut self, name: &Identifier) -> Result<&mut MemoryTable, EngineError> {
        self.tables.get_mut(name).ok_or_else(|| not_found(name))
    }

    fn partitioned_mut(&mut self, name: &Identifier) -> Result<&mut MemoryTable, EngineError> {
        let table = self.table_mut(name)?;
        if matches!(table.kind, StructureKind::Heap) {
            return Err(EngineError::Execution(format!("table {name} is not partitioned")));
        }
        Ok(table)
    }

    fn apply_pending(&mut self) {
        for (name, rows) in self.pending.drain() {
            if let Some(table) = self.tables.get_mut(&name) {
                table.rows.extend(rows);
            }
        }
    }

    fn dependent_name_taken(&self, name: &Identifier) -> bool {
        self.tables
            .values()
            .any(|t| t.dependents.iter().any(|d| &d.name == name))
    }

    fn apply(&mut self, statement: &Statement) -> Result<ExecOutcome, EngineError> {
        match statement {
            Statement::CreateTable {
                table,
                columns,
                constraints,
                partitioning,
                location,
            } => {
                if self.tables.contains_key(table) {
                    return Err(exists(table));
                }
                let columns = columns
                    .iter()
                    .map(|c| ColumnInfo::new(c.name.clone(), c.data_type.clone(), c.nullable))
                    .collect();
                let mut created = MemoryTable::new(table.clone(), columns);
                created.location = location.clone();

                for constraint in constraints {
                    if self.dependent_name_taken(&constraint.name) {
                        return Err(exists(&constraint.name));
                    }
                    created.column_indexes(&constraint.columns)?;
                    created.dependents.push(DependentObject::new(
                        constraint.name.clone(),
                        dependent_kind(&constraint.kind),
                        constraint.columns.clone(),
                    ));
                }

                if let Some(clause) = partitioning {
                    let partitions = match &clause.method {
                        PartitionMethod::Range { partitions, .. }
                        | PartitionMethod::List { partitions, .. } => {
                            partitions.iter().map(|p| p.name.clone()).collect()
                        }
                        PartitionMethod::Hash { partitions, .. } => (1..=*partitions)
                            .map(|i| Identifier::new(format!("SYS_P{i}")))
                            .collect::<Result<Vec<_>, _>>()
                            .map_err(|e| EngineError::Execution(e.to_string()))?,
                        PartitionMethod::Reference { .. } => Vec::new(),
                    };
                    created.kind = StructureKind::Partitioned {
                        strategy: clause.method.strategy_type(),
                        column: clause.method.column().cloned(),
                        partition_count: partitions.len() as u32,
                    };
                    created.partitions = partitions;
                }

                self.tables.insert(table.clone(), created);
                Ok(ExecOutcome::default())
            }

            Statement::CreateTableAs {
                table,
                source,
                columns,
                with_data,
                location,
                ..
            } => {
                if self.tables.contains_key(table) {
                    return Err(exists(table));
                }
                let src = self.table(source)?;
                let indexes = if columns.is_empty() {
                    (0..src.columns.len()).collect()
                } else {
                    src.column_indexes(columns)?
                };

                let mut copy = MemoryTable::new(
                    table.clone(),
                    indexes.iter().map(|&i| src.columns[i].clone()).collect(),
                )
                .with_bytes_per_row(src.bytes_per_row);
                copy.declared_size_bytes = src.declared_size_bytes;
                copy.location = location.clone();
                if *with_data {
                    copy.rows = src
                        .rows
                        .iter()
                        .map(|row| indexes.iter().map(|&i| row[i].clone()).collect())
                        .collect();
                }

                let copied = copy.rows.len() as u64;
                self.tables.insert(table.clone(), copy);
                Ok(ExecOutcome::rows(copied))
            }

            Statement::DropTable { table, .. } => {
                self.tables.remove(table).ok_or_else(|| not_found(table))?;
                self.pending.remove(table);
                Ok(ExecOutcome::default())
            }

            Statement::RenameTable { from, to } => {
                if self.tables.contains_key(to) {
                    return Err(exists(to));
                }
                let mut table = self.tables.remove(from).ok_or_else(|| not_found(from))?;
                table.name = to.clone();
                self.tables.insert(to.clone(), table);
                Ok(ExecOutcome::default())
            }

            Statement::InsertBatch(batch) => self.insert_batch(batch),

            Statement::CreateIndex {
                index,
                table,
                columns,
                unique,
                ..
            } => {
                if self.dependent_name_taken(index) {
                    return Err(exists(index));
                }
                let target = self.table_mut(table)?;
                let positions = target.column_indexes(columns)?;
                if *unique {
                    check_unique(&target.rows, &positions, index)?;
                }
                target.dependents.push(DependentObject::new(
                    index.clone(),
                    DependentKind::Index { unique: *unique },
                    columns.clone(),
                ));
                Ok(ExecOutcome::default())
            }

            Statement::RebuildIndex { index, .. } => {
                let table = self
                    .tables
                    .values_mut()
                    .find(|t| {
                        t.dependents
                            .iter()
                            .any(|d| &d.name == index && d.kind.is_index())
                    })
                    .ok_or_else(|| not_found(index))?;
                table.index_rebuilds += 1;
                Ok(ExecOutcome::default())
            }

            Statement::AddConstraint {
                constraint,
                table,
                kind,
                columns,
            } => {
                if self.dependent_name_taken(constraint) {
                    return Err(exists(constraint));
                }
                if let ConstraintKind::ForeignKey { references, .. } = kind {
                    self.table(references)?;
                }
                let target = self.table_mut(table)?;
                let positions = target.column_indexes(columns)?;
                let kind = dependent_kind(kind);
                if is_unique(&kind) {
                    check_unique(&target.rows, &positions, constraint)?;
                }
                target
                    .dependents
                    .push(DependentObject::new(constraint.clone(), kind, columns.clone()));
                Ok(ExecOutcome::default())
            }

            Statement::GatherStatistics {
                table,
                sampling_percent,
                parallel_degree,
                ..
            } => {
                let target = self.table_mut(table)?;
                target.stats = Some(TableStats {
                    row_count: target.rows.len() as u64,
                    sampling_percent: *sampling_percent,
                    parallel_degree: *parallel_degree,
                });
                Ok(ExecOutcome::default())
            }

            Statement::AddPartition { table, partition } => {
                let target = self.partitioned_mut(table)?;
                if target.partitions.contains(&partition.name) {
                    return Err(exists(&partition.name));
                }
                target.partitions.push(partition.name.clone());
                target.update_partition_count();
                Ok(ExecOutcome::default())
            }

            Statement::DropPartition {
                table, partition, ..
            } => {
                let target = self.partitioned_mut(table)?;
                let pos = target
                    .partitions
                    .iter()
                    .position(|p| p == partition)
                    .ok_or_else(|| not_found(partition))?;
                target.partitions.remove(pos);
                target.update_partition_count();
                Ok(ExecOutcome::default())
            }

            Statement::SplitPartition {
                table,
                partition,
                into,
                ..
            } => {
                let target = self.partitioned_mut(table)?;
                let pos = target
                    .partitions
                    .iter()
                    .position(|p| p == partition)
                    .ok_or_else(|| not_found(partition))?;
                for name in [&into.0, &into.1] {
                    if name != partition && target.partitions.contains(name) {
                        return Err(exists(name));
                    }
                }
                target
                    .partitions
                    .splice(pos..=pos, [into.0.clone(), into.1.clone()]);
                target.update_partition_count();
                Ok(ExecOutcome::default())
            }

            Statement::MergePartitions {
                table,
                first,
                second,
                into,
            } => {
                let target = self.partitioned_mut(table)?;
                let first_pos = target
                    .partitions
                    .iter()
                    .position(|p| p == first)
                    .ok_or_else(|| not_found(first))?;
                let second_pos = target
                    .partitions
                    .iter()
                    .position(|p| p == second)
                    .ok_or_else(|| not_found(second))?;
                if second_pos != first_pos + 1 {
                    return Err(EngineError::Execution(format!(
                        "partitions {first} and {second} are not adjacent"
                    )));
                }
                target
                    .partitions
                    .splice(first_pos..=second_pos, [into.clone()]);
                target.update_partition_count();
                Ok(ExecOutcome::default())
            }

            Statement::MoveObject {
                table,
                partition,
                location,
                ..
            } => {
                let target = self.table_mut(table)?;
                match partition {
                    Some(partition) => {
                        if !target.partitions.contains(partition) {
                            return Err(not_found(partition));
                        }
                    }
                    None => target.location = Some(location.clone()),
                }
                Ok(ExecOutcome::default())
            }
        }
    }

    fn insert_batch(&mut self, batch: &InsertBatch) -> Result<ExecOutcome, EngineError> {
        let source = self.table(&batch.source)?;
        let target = self.table(&batch.target)?;
        let src_cols = source.column_indexes(&batch.columns)?;
        let dst_cols = target.column_indexes(&batch.columns)?;
        let pending = self.pending.get(&batch.target);

        let (selected, last_key): (Vec<&Vec<Value>>, Option<Value>) = match &batch.cursor {
            BatchCursor::Watermark { key, after } => {
                let key_pos = source.column_index(key).ok_or_else(|| {
                    EngineError::Execution(format!("column {key} does not exist on {}", source.name))
                })?;
                let mut rows: Vec<&Vec<Value>> = source
                    .rows
                    .iter()
                    .filter(|row| after.as_ref().map_or(true, |a| &row[key_pos] > a))
                    .collect();
                rows.sort_by(|a, b| a[key_pos].cmp(&b[key_pos]));
                rows.truncate(batch.limit as usize);
                let last = rows.last().map(|row| row[key_pos].clone());
                (rows, last)
            }
            BatchCursor::RowPosition { skip } => (
                source
                    .rows
                    .iter()
                    .skip(*skip as usize)
                    .take(batch.limit as usize)
                    .collect(),
                None,
            ),
            BatchCursor::AntiJoin { match_columns } => {
                let src_match = source.column_indexes(match_columns)?;
                let dst_match = target.column_indexes(match_columns)?;
                let present: HashSet<Vec<&Value>> = target
                    .rows
                    .iter()
                    .chain(pending.into_iter().flatten())
                    .map(|row| dst_match.iter().map(|&i| &row[i]).collect())
                    .collect();
                let rows = source
                    .rows
                    .iter()
                    .filter(|row| {
                        let key: Vec<&Value> = src_match.iter().map(|&i| &row[i]).collect();
                        !present.contains(&key)
                    })
                    .take(batch.limit as usize)
                    .collect();
                (rows, None)
            }
        };

        let new_rows: Vec<Vec<Value>> = selected
            .into_iter()
            .map(|row| {
                let mut out = vec![Value::Null; target.columns.len()];
                for (&s, &d) in src_cols.iter().zip(&dst_cols) {
                    out[d] = row[s].clone();
                }
                out
            })
            .collect();

        for dependent in target.dependents.iter().filter(|d| is_unique(&d.kind)) {
            let positions = target.column_indexes(&dependent.columns)?;
            let all: Vec<Vec<Value>> = target
                .rows
                .iter()
                .chain(pending.into_iter().flatten())
                .chain(new_rows.iter())
                .cloned()
                .collect();
            check_unique(&all, &positions, &dependent.name)?;
        }

        let count = new_rows.len() as u64;
        if let Some(armed) = &mut self.violation {
            if armed.inserted + count > armed.after_rows {
                return Err(EngineError::ConstraintViolation {
                    constraint: armed.constraint.clone(),
                    message: format!(
                        "unique constraint ({}) violated after {} rows",
                        armed.constraint, armed.inserted
                    ),
                });
            }
            armed.inserted += count;
        }

        self.pending
            .entry(batch.target.clone())
            .or_default()
            .extend(new_rows);
        Ok(ExecOutcome::rows(count).with_last_key(last_key))
    }
}

fn check_unique(
    rows: &[Vec<Value>],
    positions: &[usize],
    constraint: &Identifier,
) -> Result<(), EngineError> {
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        let key: Vec<&Value> = positions.iter().map(|&i| &row[i]).collect();
        if key.iter().all(|v| matches!(v, Value::Null)) {
            continue;
        }
        if !seen.insert(key) {
            return Err(EngineError::ConstraintViolation {
                constraint: constraint.to_string(),
                message: format!("duplicate key in {constraint}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::ColumnSpec;

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    fn seeded(rows: i64) -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine.create_table(
            MemoryTable::new(
                id("SRC"),
                vec![
                    ColumnInfo::new(id("ID"), "NUMBER", false),
                    ColumnInfo::new(id("NAME"), "VARCHAR2(30)", true),
                ],
            )
            .with_rows(
                (1..=rows)
                    .rev()
                    .map(|i| vec![Value::Integer(i), Value::Text(format!("n{i}"))])
                    .collect(),
            ),
        );
        engine
            .execute(&Statement::CreateTableAs {
                table: id("DST"),
                source: id("SRC"),
                columns: vec![],
                with_data: false,
                parallel_degree: 1,
                location: None,
            })
            .unwrap();
        engine
    }

    fn batch(cursor: BatchCursor, limit: u64) -> Statement {
        Statement::InsertBatch(InsertBatch {
            target: id("DST"),
            source: id("SRC"),
            columns: vec![id("ID"), id("NAME")],
            limit,
            cursor,
            parallel_degree: 1,
        })
    }

    #[test]
    fn test_watermark_batches_are_ordered() {
        let engine = seeded(10);
        let out = engine
            .execute(&batch(
                BatchCursor::Watermark {
                    key: id("ID"),
                    after: None,
                },
                4,
            ))
            .unwrap();
        assert_eq!(out.rows_affected, 4);
        assert_eq!(out.last_key, Some(Value::Integer(4)));

        let out = engine
            .execute(&batch(
                BatchCursor::Watermark {
                    key: id("ID"),
                    after: Some(Value::Integer(8)),
                },
                4,
            ))
            .unwrap();
        assert_eq!(out.rows_affected, 2);
        assert_eq!(out.last_key, Some(Value::Integer(10)));
    }

    #[test]
    fn test_inserts_pending_until_commit() {
        let engine = seeded(5);
        let anti = BatchCursor::AntiJoin {
            match_columns: vec![id("ID")],
        };
        engine.execute(&batch(anti.clone(), 3)).unwrap();
        assert_eq!(engine.row_count("DST"), Some(0));

        // Anti-join sees the transaction's own pending rows.
        let out = engine.execute(&batch(anti.clone(), 3)).unwrap();
        assert_eq!(out.rows_affected, 2);

        engine.rollback().unwrap();
        assert_eq!(engine.row_count("DST"), Some(0));

        engine.execute(&batch(anti, 10)).unwrap();
        engine.commit().unwrap();
        assert_eq!(engine.row_count("DST"), Some(5));
    }

    #[test]
    fn test_ddl_commits_pending_rows() {
        let engine = seeded(3);
        engine
            .execute(&batch(
                BatchCursor::AntiJoin {
                    match_columns: vec![id("ID")],
                },
                10,
            ))
            .unwrap();
        engine
            .execute(&Statement::CreateIndex {
                index: id("DST_IX"),
                table: id("DST"),
                columns: vec![id("NAME")],
                unique: false,
                local: false,
                online: true,
                parallel_degree: 1,
            })
            .unwrap();
        assert_eq!(engine.row_count("DST"), Some(3));
    }

    #[test]
    fn test_armed_violation_fails_whole_batch() {
        let engine = seeded(10);
        engine.violate_after(5, "DST_PK");
        let cursor = |after| BatchCursor::Watermark {
            key: id("ID"),
            after,
        };

        engine.execute(&batch(cursor(None), 4)).unwrap();
        let err = engine
            .execute(&batch(cursor(Some(Value::Integer(4))), 4))
            .unwrap_err();
        assert!(err.is_constraint_violation());

        engine.commit().unwrap();
        assert_eq!(engine.row_count("DST"), Some(4));
    }

    #[test]
    fn test_unique_constraint_rejects_duplicates() {
        let engine = seeded(3);
        engine
            .execute(&Statement::AddConstraint {
                constraint: id("DST_PK"),
                table: id("DST"),
                kind: ConstraintKind::PrimaryKey,
                columns: vec![id("ID")],
            })
            .unwrap();
        let all = BatchCursor::Watermark {
            key: id("ID"),
            after: None,
        };
        engine.execute(&batch(all.clone(), 10)).unwrap();
        let err = engine.execute(&batch(all, 10)).unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation { ref constraint, .. } if constraint == "DST_PK"));
    }

    #[test]
    fn test_fail_next_fires_once() {
        let engine = seeded(1);
        engine.fail_next(StatementKind::DropTable, "locked");
        let drop = Statement::DropTable {
            table: id("DST"),
            purge: true,
        };
        assert_eq!(
            engine.execute(&drop),
            Err(EngineError::Execution("locked".to_string()))
        );
        assert!(engine.execute(&drop).is_ok());
        assert!(!engine.has_table("DST"));
    }

    #[test]
    fn test_partition_maintenance() {
        let engine = MemoryEngine::new();
        engine
            .execute(&Statement::CreateTable {
                table: id("T"),
                columns: vec![ColumnSpec {
                    name: id("K"),
                    data_type: "NUMBER".to_string(),
                    nullable: false,
                }],
                constraints: vec![],
                partitioning: Some(crate::statement::PartitionClause {
                    method: PartitionMethod::Hash {
                        column: id("K"),
                        partitions: 2,
                    },
                    subpartition: None,
                }),
                location: None,
            })
            .unwrap();

        engine
            .execute(&Statement::MergePartitions {
                table: id("T"),
                first: id("SYS_P1"),
                second: id("SYS_P2"),
                into: id("P_ALL"),
            })
            .unwrap();
        let table = engine.table("T").unwrap();
        assert_eq!(table.partitions, vec![id("P_ALL")]);
        assert!(matches!(
            table.kind,
            StructureKind::Partitioned {
                partition_count: 1,
                ..
            }
        ));

        let err = engine
            .execute(&Statement::DropPartition {
                table: id("T"),
                partition: id("SYS_P1"),
                update_indexes: true,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::ObjectNotFound { .. }));
    }

    #[test]
    fn test_describe_reports_declared_size() {
        let engine = MemoryEngine::new();
        engine.create_table(
            MemoryTable::new(id("BIG"), vec![ColumnInfo::new(id("A"), "NUMBER", true)])
                .with_size_bytes(50_000 * 1024 * 1024),
        );
        let desc = engine.describe(&id("big")).unwrap().unwrap();
        assert_eq!(desc.size_bytes, 50_000 * 1024 * 1024);
        assert!(engine.describe(&id("other")).unwrap().is_none());
    }
}
