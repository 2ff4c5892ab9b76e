//! Catalog access and object inspection.

mod inspector;
mod object;

pub use inspector::{Inspection, ObjectInspector};
pub use object::{
    Catalog, ColumnInfo, DependentKind, DependentObject, ObjectDescription, StructureKind,
};
