//! Object metadata as reported by the engine catalog.

use crate::engine::EngineError;
use crate::statement::{ColumnSpec, Identifier};
use crate::strategy::StrategyType;
use serde::{Deserialize, Serialize};

/// Physical structure of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureKind {
    /// Unpartitioned heap table.
    Heap,
    /// Partitioned table.
    Partitioned {
        /// Partitioning scheme.
        strategy: StrategyType,
        /// Partition key column (absent for reference partitioning).
        column: Option<Identifier>,
        /// Current number of partitions.
        partition_count: u32,
    },
}

impl StructureKind {
    /// Strategy type of this structure.
    pub fn strategy_type(&self) -> StrategyType {
        match self {
            StructureKind::Heap => StrategyType::None,
            StructureKind::Partitioned { strategy, .. } => *strategy,
        }
    }
}

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: Identifier,
    /// Engine type text.
    pub data_type: String,
    /// Whether NULLs are allowed.
    pub nullable: bool,
}

impl ColumnInfo {
    /// Create a column description.
    pub fn new(name: Identifier, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name,
            data_type: data_type.into(),
            nullable,
        }
    }

    /// Column definition for recreating the table.
    pub fn to_spec(&self) -> ColumnSpec {
        ColumnSpec {
            name: self.name.clone(),
            data_type: self.data_type.clone(),
            nullable: self.nullable,
        }
    }
}

/// Kind of a dependent object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependentKind {
    /// Index.
    Index {
        /// Unique index.
        unique: bool,
    },
    /// Primary key constraint.
    PrimaryKey,
    /// Unique constraint.
    Unique,
    /// Foreign key constraint.
    ForeignKey {
        /// Referenced table.
        references: Identifier,
        /// Referenced columns.
        ref_columns: Vec<Identifier>,
    },
    /// Check constraint.
    Check {
        /// Condition text.
        condition: String,
    },
}

impl DependentKind {
    /// Whether this is an index rather than a constraint.
    pub fn is_index(&self) -> bool {
        matches!(self, DependentKind::Index { .. })
    }
}

/// An index or constraint that depends on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentObject {
    /// Object name.
    pub name: Identifier,
    /// Kind.
    pub kind: DependentKind,
    /// Covered columns, in order.
    pub columns: Vec<Identifier>,
}

impl DependentObject {
    /// Create a dependent object.
    pub fn new(name: Identifier, kind: DependentKind, columns: Vec<Identifier>) -> Self {
        Self { name, kind, columns }
    }

    /// Whether the object identifies rows by a unique single column.
    pub fn single_key_column(&self) -> Option<&Identifier> {
        match (&self.kind, self.columns.as_slice()) {
            (DependentKind::PrimaryKey | DependentKind::Unique, [column]) => Some(column),
            _ => None,
        }
    }
}

/// Catalog description of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescription {
    /// Table name.
    pub name: Identifier,
    /// Physical structure.
    pub kind: StructureKind,
    /// Columns in declaration order.
    pub columns: Vec<ColumnInfo>,
    /// Approximate segment size in bytes.
    pub size_bytes: u64,
    /// Approximate row count.
    pub row_count: u64,
    /// Indexes and constraints.
    pub dependents: Vec<DependentObject>,
    /// Storage location.
    pub location: Option<Identifier>,
}

/// Read-only metadata source.
pub trait Catalog: Send + Sync {
    /// Describe a table. `Ok(None)` when the table does not exist.
    fn describe(&self, name: &Identifier) -> Result<Option<ObjectDescription>, EngineError>;
}
