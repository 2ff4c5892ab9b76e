//! Strategy types and configuration records.

use crate::error::{Error, ValidationError};
use crate::storage::current_timestamp;
use rkyv::{Archive, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared physical partitioning scheme of a table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum StrategyType {
    /// Range partitioning on a column.
    Range,
    /// List partitioning on a column.
    List,
    /// Hash partitioning on a column.
    Hash,
    /// Range partitioning with automatically created interval partitions.
    Interval,
    /// Partitioning inherited from a parent through a foreign key.
    Reference,
    /// List partitioning that creates a partition per new value.
    AutoList,
    /// Interval range partitioning under automatic maintenance.
    AutoRange,
    /// Range partitioning mixing internal and external partitions.
    Hybrid,
    /// Not partitioned.
    None,
}

impl StrategyType {
    /// Every supported strategy type.
    pub const ALL: [StrategyType; 9] = [
        StrategyType::Range,
        StrategyType::List,
        StrategyType::Hash,
        StrategyType::Interval,
        StrategyType::Reference,
        StrategyType::AutoList,
        StrategyType::AutoRange,
        StrategyType::Hybrid,
        StrategyType::None,
    ];

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Range => "RANGE",
            StrategyType::List => "LIST",
            StrategyType::Hash => "HASH",
            StrategyType::Interval => "INTERVAL",
            StrategyType::Reference => "REFERENCE",
            StrategyType::AutoList => "AUTO_LIST",
            StrategyType::AutoRange => "AUTO_RANGE",
            StrategyType::Hybrid => "HYBRID",
            StrategyType::None => "NONE",
        }
    }

    /// Whether the strategy partitions on a named column.
    pub fn requires_column(&self) -> bool {
        !matches!(self, StrategyType::None | StrategyType::Reference)
    }

    /// Whether the strategy creates interval partitions automatically.
    pub fn uses_interval(&self) -> bool {
        matches!(self, StrategyType::Interval | StrategyType::AutoRange)
    }

    /// Whether the result is a partitioned table.
    pub fn is_partitioned(&self) -> bool {
        !matches!(self, StrategyType::None)
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_uppercase();

        match normalized.as_str() {
            "RANGE" => Ok(StrategyType::Range),
            "LIST" => Ok(StrategyType::List),
            "HASH" => Ok(StrategyType::Hash),
            "INTERVAL" => Ok(StrategyType::Interval),
            "REFERENCE" => Ok(StrategyType::Reference),
            "AUTOLIST" => Ok(StrategyType::AutoList),
            "AUTORANGE" => Ok(StrategyType::AutoRange),
            "HYBRID" => Ok(StrategyType::Hybrid),
            "NONE" => Ok(StrategyType::None),
            _ => Err(ValidationError::UnknownStrategy { name: s.to_string() }),
        }
    }
}

impl TryFrom<String> for StrategyType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StrategyType> for String {
    fn from(value: StrategyType) -> Self {
        value.as_str().to_string()
    }
}

/// Versioned record of an object's declared target strategy.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Object the strategy applies to.
    pub target_object: String,
    /// Declared strategy.
    pub strategy_type: StrategyType,
    /// Partition key column.
    pub partition_column: Option<String>,
    /// Interval expression for interval strategies (e.g. `1 MONTH`).
    pub interval_expression: Option<String>,
    /// Partitions older than this many days are eligible for cleanup.
    pub retention_days: Option<u32>,
    /// Whether scheduled maintenance may act on this object.
    pub auto_maintenance: bool,
    /// Whether this is the object's current row.
    pub is_active: bool,
    /// Version number, starting at 1 per object.
    pub version: u64,
    /// Creation time (microseconds since epoch).
    pub created_at: u64,
    /// Who created this row.
    pub created_by: String,
    /// Last modification time (microseconds since epoch).
    pub updated_at: u64,
    /// Who last modified this row.
    pub updated_by: String,
}

impl StrategyConfig {
    /// Build version `version` of a config from a draft.
    pub(crate) fn from_draft(draft: &StrategyDraft, version: u64, actor: &str) -> Self {
        let now = current_timestamp();
        Self {
            target_object: draft.target_object.clone(),
            strategy_type: draft.strategy_type,
            partition_column: draft.partition_column.clone(),
            interval_expression: draft.interval_expression.clone(),
            retention_days: draft.retention_days,
            auto_maintenance: draft.auto_maintenance,
            is_active: true,
            version,
            created_at: now,
            created_by: actor.to_string(),
            updated_at: now,
            updated_by: actor.to_string(),
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// The draft this row was built from.
    pub fn to_draft(&self) -> StrategyDraft {
        StrategyDraft {
            target_object: self.target_object.clone(),
            strategy_type: self.strategy_type,
            partition_column: self.partition_column.clone(),
            interval_expression: self.interval_expression.clone(),
            retention_days: self.retention_days,
            auto_maintenance: self.auto_maintenance,
        }
    }
}

/// The declarative part of a [`StrategyConfig`], as written by a migration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StrategyDraft {
    /// Object the strategy applies to.
    pub target_object: String,
    /// Declared strategy.
    pub strategy_type: StrategyType,
    /// Partition key column.
    pub partition_column: Option<String>,
    /// Interval expression.
    pub interval_expression: Option<String>,
    /// Retention in days.
    pub retention_days: Option<u32>,
    /// Allow scheduled maintenance.
    pub auto_maintenance: bool,
}

impl StrategyDraft {
    /// Create a draft with no column, interval or retention.
    pub fn new(target_object: impl Into<String>, strategy_type: StrategyType) -> Self {
        Self {
            target_object: target_object.into(),
            strategy_type,
            partition_column: None,
            interval_expression: None,
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
        self.interval_expression = Some(interval.into());
        self
    }

    /// Set the retention in days.
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

/// Partial update of the active config. `None` keeps the prior value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyUpdate {
    /// New strategy type.
    pub strategy_type: Option<StrategyType>,
    /// New partition column.
    pub partition_column: Option<String>,
    /// New interval expression.
    pub interval_expression: Option<String>,
    /// New retention.
    pub retention_days: Option<u32>,
    /// New maintenance flag.
    pub auto_maintenance: Option<bool>,
}

impl StrategyUpdate {
    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the update on top of `base`, producing the next draft.
    pub fn apply(&self, base: &StrategyConfig) -> StrategyDraft {
        StrategyDraft {
            target_object: base.target_object.clone(),
            strategy_type: self.strategy_type.unwrap_or(base.strategy_type),
            partition_column: self
                .partition_column
                .clone()
                .or_else(|| base.partition_column.clone()),
            interval_expression: self
                .interval_expression
                .clone()
                .or_else(|| base.interval_expression.clone()),
            retention_days: self.retention_days.or(base.retention_days),
            auto_maintenance: self.auto_maintenance.unwrap_or(base.auto_maintenance),
        }
    }
}

impl From<&StrategyDraft> for StrategyUpdate {
    fn from(draft: &StrategyDraft) -> Self {
        Self {
            strategy_type: Some(draft.strategy_type),
            partition_column: draft.partition_column.clone(),
            interval_expression: draft.interval_expression.clone(),
            retention_days: draft.retention_days,
            auto_maintenance: Some(draft.auto_maintenance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_type_parse() {
        assert_eq!("range".parse::<StrategyType>(), Ok(StrategyType::Range));
        assert_eq!("AUTO_LIST".parse::<StrategyType>(), Ok(StrategyType::AutoList));
        assert_eq!("auto-range".parse::<StrategyType>(), Ok(StrategyType::AutoRange));
        assert!(matches!(
            "composite".parse::<StrategyType>(),
            Err(ValidationError::UnknownStrategy { .. })
        ));
    }

    #[test]
    fn test_strategy_type_round_trips_through_name() {
        for ty in StrategyType::ALL {
            assert_eq!(ty.as_str().parse::<StrategyType>(), Ok(ty));
        }
    }

    #[test]
    fn test_requires_column() {
        assert!(StrategyType::Range.requires_column());
        assert!(StrategyType::Hash.requires_column());
        assert!(!StrategyType::Reference.requires_column());
        assert!(!StrategyType::None.requires_column());
        assert!(StrategyType::AutoRange.uses_interval());
    }

    #[test]
    fn test_update_keeps_unspecified_fields() {
        let draft = StrategyDraft::new("SALES", StrategyType::Range)
            .with_partition_column("SALE_DATE")
            .with_retention_days(365);
        let config = StrategyConfig::from_draft(&draft, 1, "dba");

        let update = StrategyUpdate {
            retention_days: Some(90),
            ..Default::default()
        };
        let next = update.apply(&config);

        assert_eq!(next.strategy_type, StrategyType::Range);
        assert_eq!(next.partition_column.as_deref(), Some("SALE_DATE"));
        assert_eq!(next.retention_days, Some(90));
    }

    #[test]
    fn test_config_serialization() {
        let draft = StrategyDraft::new("ORDERS", StrategyType::Interval)
            .with_partition_column("ORDER_DATE")
            .with_interval("1 MONTH");
        let config = StrategyConfig::from_draft(&draft, 3, "scheduler");

        let bytes = config.to_bytes().unwrap();
        let restored = StrategyConfig::from_bytes(&bytes).unwrap();
        assert_eq!(restored, config);
    }
}
