//! Object inspection.

use super::object::{Catalog, ColumnInfo, DependentKind, DependentObject, StructureKind};
use crate::statement::Identifier;
use std::sync::Arc;
use tracing::{debug, warn};

const MIB: u64 = 1024 * 1024;

/// Snapshot of an object's structure at inspection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    /// Object name as requested.
    pub object: String,
    /// Whether the object exists.
    pub exists: bool,
    /// Whether the object is partitioned.
    pub is_structured: bool,
    /// Current physical structure.
    pub structure_kind: StructureKind,
    /// Columns in declaration order.
    pub columns: Vec<ColumnInfo>,
    /// Approximate size in bytes.
    pub approx_size_bytes: u64,
    /// Approximate row count.
    pub row_count: u64,
    /// Indexes and constraints.
    pub dependents: Vec<DependentObject>,
    /// Current storage location.
    pub location: Option<Identifier>,
}

impl Inspection {
    /// Inspection of an object that does not exist.
    pub fn missing(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            exists: false,
            is_structured: false,
            structure_kind: StructureKind::Heap,
            columns: Vec::new(),
            approx_size_bytes: 0,
            row_count: 0,
            dependents: Vec::new(),
            location: None,
        }
    }

    /// Approximate size in MiB.
    pub fn size_mib(&self) -> u64 {
        self.approx_size_bytes / MIB
    }

    /// Look up a column by name, case-insensitively.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.matches(name))
    }

    /// Whether the object has the column.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Single-column primary key, or failing that a single-column unique key
    /// on a NOT NULL column.
    pub fn key_column(&self) -> Option<&Identifier> {
        let primary = self
            .dependents
            .iter()
            .filter(|d| matches!(d.kind, DependentKind::PrimaryKey))
            .find_map(|d| d.single_key_column());
        primary.or_else(|| {
            self.dependents
                .iter()
                .filter(|d| matches!(d.kind, DependentKind::Unique))
                .filter_map(|d| d.single_key_column())
                .find(|col| self.column(col.as_str()).is_some_and(|c| !c.nullable))
        })
    }

    /// Foreign key constraints on the object.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &DependentObject> {
        self.dependents
            .iter()
            .filter(|d| matches!(d.kind, DependentKind::ForeignKey { .. }))
    }
}

/// Reads object metadata from a [`Catalog`]. Never caches.
#[derive(Clone)]
pub struct ObjectInspector {
    catalog: Arc<dyn Catalog>,
}

impl ObjectInspector {
    /// Create an inspector over a catalog.
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Inspect an object.
    ///
    /// Never fails: an invalid name, a missing object, or a catalog error all
    /// produce an inspection with `exists == false`.
    pub fn inspect(&self, object: &str) -> Inspection {
        let name = match Identifier::new(object) {
            Ok(name) => name,
            Err(e) => {
                debug!(object, error = %e, "Inspected name is not a valid identifier");
                return Inspection::missing(object);
            }
        };

        match self.catalog.describe(&name) {
            Ok(Some(desc)) => Inspection {
                object: object.to_string(),
                exists: true,
                is_structured: matches!(desc.kind, StructureKind::Partitioned { .. }),
                structure_kind: desc.kind,
                columns: desc.columns,
                approx_size_bytes: desc.size_bytes,
                row_count: desc.row_count,
                dependents: desc.dependents,
                location: desc.location,
            },
            Ok(None) => Inspection::missing(object),
            Err(e) => {
                warn!(object = %name, error = %e, "Catalog lookup failed, treating object as missing");
                Inspection::missing(object)
            }
        }
    }
}
