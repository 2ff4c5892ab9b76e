//! Typed statement builder.
//!
//! Every structural operation the engine can issue is a [`Statement`]
//! variant. Statements carry only validated [`Identifier`]s and typed
//! literals; a [`Dialect`] renders them to the target engine's SQL text.

mod dialect;
mod identifier;

pub use dialect::{Dialect, StandardDialect};
pub use identifier::{Identifier, IdentifierError};

use crate::strategy::StrategyType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A typed literal value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Integer literal.
    Integer(i64),
    /// Calendar date literal.
    Date(NaiveDate),
    /// Text literal (escaped on render).
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Date(d) => write!(f, "DATE '{}'", d.format("%Y-%m-%d")),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// Upper bound or member of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundValue {
    /// `MAXVALUE` in a range bound.
    MaxValue,
    /// `DEFAULT` in a list partition.
    Default,
    /// A literal.
    Literal(Value),
}

/// Partition bound definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionBound {
    /// Range partition: `VALUES LESS THAN (bound)`.
    LessThan(BoundValue),
    /// List partition: `VALUES (v1, v2, ...)`.
    In(Vec<BoundValue>),
}

/// A single partition definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDef {
    /// Partition name.
    pub name: Identifier,
    /// Bound of the partition.
    pub bound: PartitionBound,
    /// Optional storage location.
    pub location: Option<Identifier>,
}

impl PartitionDef {
    /// Range partition bounded above by `bound`.
    pub fn less_than(name: Identifier, bound: BoundValue) -> Self {
        Self {
            name,
            bound: PartitionBound::LessThan(bound),
            location: None,
        }
    }

    /// List partition holding `values`.
    pub fn values(name: Identifier, values: Vec<BoundValue>) -> Self {
        Self {
            name,
            bound: PartitionBound::In(values),
            location: None,
        }
    }
}

/// Interval used by interval-range partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalExpr {
    /// N days.
    Days(u32),
    /// N months.
    Months(u32),
    /// N years.
    Years(u32),
    /// Numeric step for number-typed partition keys.
    Numeric(u64),
}

impl fmt::Display for IntervalExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalExpr::Days(n) => write!(f, "{n} DAY"),
            IntervalExpr::Months(n) => write!(f, "{n} MONTH"),
            IntervalExpr::Years(n) => write!(f, "{n} YEAR"),
            IntervalExpr::Numeric(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for IntervalExpr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let count = parts
            .next()
            .ok_or_else(|| "empty interval expression".to_string())?;
        let unit = parts.next();
        if parts.next().is_some() {
            return Err(format!("unexpected trailing input in interval '{s}'"));
        }

        let parse_u32 = |c: &str| -> Result<u32, String> {
            match c.parse::<u32>() {
                Ok(0) | Err(_) => Err(format!("invalid interval count '{c}'")),
                Ok(n) => Ok(n),
            }
        };

        match unit.map(|u| u.to_ascii_uppercase()) {
            None => match count.parse::<u64>() {
                Ok(0) | Err(_) => Err(format!("invalid numeric interval '{count}'")),
                Ok(n) => Ok(IntervalExpr::Numeric(n)),
            },
            Some(u) if u == "DAY" || u == "DAYS" => Ok(IntervalExpr::Days(parse_u32(count)?)),
            Some(u) if u == "MONTH" || u == "MONTHS" => Ok(IntervalExpr::Months(parse_u32(count)?)),
            Some(u) if u == "YEAR" || u == "YEARS" => Ok(IntervalExpr::Years(parse_u32(count)?)),
            Some(u) => Err(format!("unknown interval unit '{u}'")),
        }
    }
}

/// Top-level partitioning method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMethod {
    /// Range partitioning, optionally with automatic interval partitions.
    Range {
        /// Partition key column.
        column: Identifier,
        /// Initial partitions.
        partitions: Vec<PartitionDef>,
        /// Interval for automatically created partitions.
        interval: Option<IntervalExpr>,
    },
    /// List partitioning, optionally automatic.
    List {
        /// Partition key column.
        column: Identifier,
        /// Initial partitions.
        partitions: Vec<PartitionDef>,
        /// Create a partition per new distinct value.
        automatic: bool,
    },
    /// Hash partitioning.
    Hash {
        /// Partition key column.
        column: Identifier,
        /// Number of partitions.
        partitions: u32,
    },
    /// Partition by a parent's scheme through a foreign key.
    Reference {
        /// Foreign key constraint name.
        constraint: Identifier,
    },
}

impl PartitionMethod {
    /// Strategy type an engine reports for a table created with this method.
    pub fn strategy_type(&self) -> StrategyType {
        match self {
            PartitionMethod::Range { interval: None, .. } => StrategyType::Range,
            PartitionMethod::Range { interval: Some(_), .. } => StrategyType::Interval,
            PartitionMethod::List { automatic: false, .. } => StrategyType::List,
            PartitionMethod::List { automatic: true, .. } => StrategyType::AutoList,
            PartitionMethod::Hash { .. } => StrategyType::Hash,
            PartitionMethod::Reference { .. } => StrategyType::Reference,
        }
    }

    /// Partition key column, if the method has one.
    pub fn column(&self) -> Option<&Identifier> {
        match self {
            PartitionMethod::Range { column, .. }
            | PartitionMethod::List { column, .. }
            | PartitionMethod::Hash { column, .. } => Some(column),
            PartitionMethod::Reference { .. } => None,
        }
    }

    /// Number of partitions declared up front.
    pub fn initial_partition_count(&self) -> u32 {
        match self {
            PartitionMethod::Range { partitions, .. } | PartitionMethod::List { partitions, .. } => {
                partitions.len() as u32
            }
            PartitionMethod::Hash { partitions, .. } => *partitions,
            PartitionMethod::Reference { .. } => 0,
        }
    }
}

/// Subpartitioning scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubpartitionKind {
    /// Hash subpartitions.
    Hash {
        /// Subpartitions per partition.
        count: u32,
    },
    /// List subpartitions (single default subpartition template).
    List,
    /// Range subpartitions (single MAXVALUE subpartition template).
    Range,
}

/// Subpartition clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubpartitionClause {
    /// Subpartition key column.
    pub column: Identifier,
    /// Subpartition kind.
    pub kind: SubpartitionKind,
}

/// Full partitioning clause of a `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionClause {
    /// Top-level method.
    pub method: PartitionMethod,
    /// Optional subpartitioning.
    pub subpartition: Option<SubpartitionClause>,
}

/// Column definition used when recreating a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: Identifier,
    /// Engine type text as reported by the catalog.
    pub data_type: String,
    /// Whether NULLs are allowed.
    pub nullable: bool,
}

/// Constraint kinds that can be (re)added to a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Primary key.
    PrimaryKey,
    /// Unique key.
    Unique,
    /// Foreign key.
    ForeignKey {
        /// Referenced table.
        references: Identifier,
        /// Referenced columns.
        ref_columns: Vec<Identifier>,
    },
    /// Check constraint; the condition text comes from the catalog.
    Check {
        /// Condition expression.
        condition: String,
    },
}

/// A constraint declared inline in `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConstraint {
    /// Constraint name.
    pub name: Identifier,
    /// Kind.
    pub kind: ConstraintKind,
    /// Constrained columns.
    pub columns: Vec<Identifier>,
}

/// How the loader identifies rows that have not been copied yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchCursor {
    /// Copy rows with `key > after`, ordered by key.
    Watermark {
        /// Single-column unique key.
        key: Identifier,
        /// Highest key already copied.
        after: Option<Value>,
    },
    /// Copy the next rows in physical (row ID) order after skipping `skip`
    /// rows. The source must not change while the load runs.
    RowPosition {
        /// Rows already copied.
        skip: u64,
    },
    /// Copy rows that are not yet present in the target, compared on
    /// `match_columns`. Only exact when `match_columns` form a unique key.
    AntiJoin {
        /// Columns compared between source and target.
        match_columns: Vec<Identifier>,
    },
}

/// One bounded batch of the bulk loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertBatch {
    /// Table rows are inserted into.
    pub target: Identifier,
    /// Table rows are read from.
    pub source: Identifier,
    /// Columns copied.
    pub columns: Vec<Identifier>,
    /// Maximum rows in this batch.
    pub limit: u64,
    /// Row selection.
    pub cursor: BatchCursor,
    /// Intra-statement parallel degree.
    pub parallel_degree: u32,
}

/// A single structural or data statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Create an empty table from column definitions.
    CreateTable {
        /// New table name.
        table: Identifier,
        /// Columns.
        columns: Vec<ColumnSpec>,
        /// Constraints declared with the table.
        constraints: Vec<TableConstraint>,
        /// Partitioning clause.
        partitioning: Option<PartitionClause>,
        /// Storage location.
        location: Option<Identifier>,
    },
    /// Create a table as a projection of another.
    CreateTableAs {
        /// New table name.
        table: Identifier,
        /// Source table.
        source: Identifier,
        /// Columns copied (all columns when empty).
        columns: Vec<Identifier>,
        /// Copy rows (`false` copies structure only).
        with_data: bool,
        /// Parallel degree.
        parallel_degree: u32,
        /// Storage location.
        location: Option<Identifier>,
    },
    /// Drop a table.
    DropTable {
        /// Table name.
        table: Identifier,
        /// Bypass the recycle bin.
        purge: bool,
    },
    /// Rename a table.
    RenameTable {
        /// Current name.
        from: Identifier,
        /// New name.
        to: Identifier,
    },
    /// One loader batch.
    InsertBatch(InsertBatch),
    /// Create an index.
    CreateIndex {
        /// Index name.
        index: Identifier,
        /// Indexed table.
        table: Identifier,
        /// Indexed columns.
        columns: Vec<Identifier>,
        /// Unique index.
        unique: bool,
        /// Local (per-partition) index.
        local: bool,
        /// Build without blocking DML.
        online: bool,
        /// Parallel degree.
        parallel_degree: u32,
    },
    /// Rebuild an existing index.
    RebuildIndex {
        /// Index name.
        index: Identifier,
        /// Build without blocking DML.
        online: bool,
        /// Parallel degree.
        parallel_degree: u32,
    },
    /// Add a constraint.
    AddConstraint {
        /// Constraint name.
        constraint: Identifier,
        /// Constrained table.
        table: Identifier,
        /// Kind.
        kind: ConstraintKind,
        /// Constrained columns.
        columns: Vec<Identifier>,
    },
    /// Refresh optimizer statistics.
    GatherStatistics {
        /// Table name.
        table: Identifier,
        /// Sampling percent in (0, 100].
        sampling_percent: f64,
        /// Parallel degree.
        parallel_degree: u32,
        /// Include dependent indexes.
        cascade: bool,
    },
    /// Add a partition.
    AddPartition {
        /// Partitioned table.
        table: Identifier,
        /// New partition.
        partition: PartitionDef,
    },
    /// Drop a partition.
    DropPartition {
        /// Partitioned table.
        table: Identifier,
        /// Partition to drop.
        partition: Identifier,
        /// Maintain global indexes.
        update_indexes: bool,
    },
    /// Split a range partition in two.
    SplitPartition {
        /// Partitioned table.
        table: Identifier,
        /// Partition being split.
        partition: Identifier,
        /// Split point.
        at: BoundValue,
        /// Names of the lower and upper halves.
        into: (Identifier, Identifier),
    },
    /// Merge two adjacent partitions.
    MergePartitions {
        /// Partitioned table.
        table: Identifier,
        /// First partition.
        first: Identifier,
        /// Second partition.
        second: Identifier,
        /// Resulting partition name.
        into: Identifier,
    },
    /// Move a table or one of its partitions to another location.
    MoveObject {
        /// Table name.
        table: Identifier,
        /// Partition to move, or the whole table.
        partition: Option<Identifier>,
        /// Destination location.
        location: Identifier,
        /// Keep the object readable and writable during the move.
        online: bool,
        /// Parallel degree.
        parallel_degree: u32,
    },
}

/// Statement discriminant, used for logging and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    CreateTable,
    CreateTableAs,
    DropTable,
    RenameTable,
    InsertBatch,
    CreateIndex,
    RebuildIndex,
    AddConstraint,
    GatherStatistics,
    AddPartition,
    DropPartition,
    SplitPartition,
    MergePartitions,
    MoveObject,
}

impl Statement {
    /// Discriminant of this statement.
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::CreateTable { .. } => StatementKind::CreateTable,
            Statement::CreateTableAs { .. } => StatementKind::CreateTableAs,
            Statement::DropTable { .. } => StatementKind::DropTable,
            Statement::RenameTable { .. } => StatementKind::RenameTable,
            Statement::InsertBatch(_) => StatementKind::InsertBatch,
            Statement::CreateIndex { .. } => StatementKind::CreateIndex,
            Statement::RebuildIndex { .. } => StatementKind::RebuildIndex,
            Statement::AddConstraint { .. } => StatementKind::AddConstraint,
            Statement::GatherStatistics { .. } => StatementKind::GatherStatistics,
            Statement::AddPartition { .. } => StatementKind::AddPartition,
            Statement::DropPartition { .. } => StatementKind::DropPartition,
            Statement::SplitPartition { .. } => StatementKind::SplitPartition,
            Statement::MergePartitions { .. } => StatementKind::MergePartitions,
            Statement::MoveObject { .. } => StatementKind::MoveObject,
        }
    }

    /// Whether the statement is DDL (implicitly committed by the engine).
    pub fn is_ddl(&self) -> bool {
        !matches!(self, Statement::InsertBatch(_) | Statement::GatherStatistics { .. })
    }

    /// The table this statement primarily acts on, if any.
    pub fn object(&self) -> Option<&Identifier> {
        match self {
            Statement::CreateTable { table, .. }
            | Statement::CreateTableAs { table, .. }
            | Statement::DropTable { table, .. }
            | Statement::CreateIndex { table, .. }
            | Statement::AddConstraint { table, .. }
            | Statement::GatherStatistics { table, .. }
            | Statement::AddPartition { table, .. }
            | Statement::DropPartition { table, .. }
            | Statement::SplitPartition { table, .. }
            | Statement::MergePartitions { table, .. }
            | Statement::MoveObject { table, .. } => Some(table),
            Statement::RenameTable { from, .. } => Some(from),
            Statement::InsertBatch(batch) => Some(&batch.target),
            Statement::RebuildIndex { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_parse_and_display() {
        assert_eq!("1 month".parse::<IntervalExpr>(), Ok(IntervalExpr::Months(1)));
        assert_eq!("7 DAYS".parse::<IntervalExpr>(), Ok(IntervalExpr::Days(7)));
        assert_eq!("1000".parse::<IntervalExpr>(), Ok(IntervalExpr::Numeric(1000)));
        assert!("0 MONTH".parse::<IntervalExpr>().is_err());
        assert!("1 FORTNIGHT".parse::<IntervalExpr>().is_err());
        assert!("1 MONTH; DROP".parse::<IntervalExpr>().is_err());

        let expr = IntervalExpr::Years(2);
        assert_eq!(expr.to_string().parse::<IntervalExpr>(), Ok(expr));
    }

    #[test]
    fn test_text_literal_is_escaped() {
        let v = Value::Text("O'Brien".to_string());
        assert_eq!(v.to_string(), "'O''Brien'");
    }

    #[test]
    fn test_method_strategy_type() {
        let col = Identifier::new("sale_date").unwrap();
        let method = PartitionMethod::Range {
            column: col.clone(),
            partitions: vec![],
            interval: Some(IntervalExpr::Months(1)),
        };
        assert_eq!(method.strategy_type(), StrategyType::Interval);
        assert_eq!(method.column(), Some(&col));

        let method = PartitionMethod::Hash {
            column: col,
            partitions: 8,
        };
        assert_eq!(method.initial_partition_count(), 8);
    }

    #[test]
    fn test_statement_kind_and_ddl() {
        let table = Identifier::new("sales").unwrap();
        let stats = Statement::GatherStatistics {
            table: table.clone(),
            sampling_percent: 5.0,
            parallel_degree: 4,
            cascade: true,
        };
        assert_eq!(stats.kind(), StatementKind::GatherStatistics);
        assert!(!stats.is_ddl());

        let drop = Statement::DropTable { table: table.clone(), purge: true };
        assert!(drop.is_ddl());
        assert_eq!(drop.object(), Some(&table));
    }
}
