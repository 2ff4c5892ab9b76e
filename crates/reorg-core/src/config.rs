//! Top-level configuration.

use crate::audit::AuditConfig;
use crate::error::Error;
use crate::heuristics::HeuristicsConfig;
use crate::migration::{LoaderConfig, DEFAULT_BACKUP_SUFFIX_FORMAT};
use crate::statement::Identifier;
use crate::storage::StorageConfig;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

/// Everything a [`MigrationDriver`](crate::migration::MigrationDriver) needs
/// besides the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReorgConfig {
    /// Administrative database.
    pub storage: StorageConfig,
    /// Size tiers.
    pub heuristics: HeuristicsConfig,
    /// Bulk loader.
    pub loader: LoaderConfig,
    /// Operation log.
    pub audit: AuditConfig,
    /// chrono format of the backup name suffix.
    pub backup_suffix_format: String,
    /// Recorded as `created_by`/`updated_by` on strategy configs.
    pub actor: String,
}

impl Default for ReorgConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            heuristics: HeuristicsConfig::default(),
            loader: LoaderConfig::default(),
            audit: AuditConfig::default(),
            backup_suffix_format: DEFAULT_BACKUP_SUFFIX_FORMAT.to_string(),
            actor: "reorg".to_string(),
        }
    }
}

impl ReorgConfig {
    /// Configuration backed by a temporary administrative database.
    pub fn temporary() -> Self {
        Self {
            storage: StorageConfig::temporary(),
            ..Default::default()
        }
    }

    /// Set the storage configuration.
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Set the heuristics configuration.
    pub fn with_heuristics(mut self, heuristics: HeuristicsConfig) -> Self {
        self.heuristics = heuristics;
        self
    }

    /// Set the loader configuration.
    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    /// Set the audit configuration.
    pub fn with_audit(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }

    /// Set the backup suffix format.
    pub fn with_backup_suffix_format(mut self, format: impl Into<String>) -> Self {
        self.backup_suffix_format = format.into();
        self
    }

    /// Set the actor name.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let config: ReorgConfig =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration.
    ///
    /// An invalid tier table is only warned about: tuning falls back to safe
    /// defaults at run time.
    pub fn validate(&self) -> Result<(), Error> {
        if self.loader.checkpoint_every == 0 {
            return Err(Error::InvalidConfig(
                "loader.checkpoint_every must be positive".to_string(),
            ));
        }
        if self.actor.trim().is_empty() {
            return Err(Error::InvalidConfig("actor must not be empty".to_string()));
        }
        self.backup_suffix_at(Utc::now())?;

        if let Err(reason) = self.heuristics.validate() {
            warn!(reason = %reason, "Heuristics tier table is invalid, tuning will use safe defaults");
        }
        Ok(())
    }

    /// Backup suffix for a snapshot taken at `at`.
    pub fn backup_suffix_at(&self, at: DateTime<Utc>) -> Result<String, Error> {
        let items: Vec<Item<'_>> = StrftimeItems::new(&self.backup_suffix_format).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(Error::InvalidConfig(format!(
                "invalid backup suffix format '{}'",
                self.backup_suffix_format
            )));
        }
        let suffix = at.format_with_items(items.into_iter()).to_string();
        Identifier::new(format!("X{suffix}")).map_err(|e| {
            Error::InvalidConfig(format!(
                "backup suffix format '{}' yields an invalid name: {e}",
                self.backup_suffix_format
            ))
        })?;
        Ok(suffix)
    }
}
