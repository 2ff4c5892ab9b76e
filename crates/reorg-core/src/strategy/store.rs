//! Versioned strategy configuration store.
//!
//! Rows are keyed `object \0 version` in the configs tree. The heads tree maps
//! each object to its latest version; only the latest row can be active, and
//! every write that creates a row deactivates its predecessor inside the same
//! sled transaction.

use super::types::{StrategyConfig, StrategyDraft, StrategyUpdate};
use crate::error::Error;
use crate::storage::current_timestamp;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

/// Tree holding every config version.
const CONFIGS_TREE: &str = "strategy:configs";

/// Tree mapping object name to latest version.
const HEADS_TREE: &str = "strategy:heads";

/// Store for [`StrategyConfig`] rows.
pub struct StrategyConfigStore {
    configs: Tree,
    heads: Tree,
}

impl StrategyConfigStore {
    /// Open or create the store in the given database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        Ok(Self {
            configs: db.open_tree(CONFIGS_TREE)?,
            heads: db.open_tree(HEADS_TREE)?,
        })
    }

    /// Declare a new strategy for an object.
    ///
    /// The previously active row (if any) is deactivated atomically.
    pub fn create(&self, draft: &StrategyDraft, actor: &str) -> Result<StrategyConfig, Error> {
        let object = normalize(&draft.target_object);
        let mut draft = draft.clone();
        draft.target_object = object.clone();

        let result = (&self.configs, &self.heads).transaction(|(configs, heads)| {
            let previous = Self::load_head(configs, heads, &object)?;
            Self::append_version(configs, heads, previous, &draft, actor)
        });
        let config = finish_txn(result)?;

        info!(
            object = %config.target_object,
            strategy = %config.strategy_type,
            version = config.version,
            "Strategy configuration created"
        );
        Ok(config)
    }

    /// Partially update the active config, writing a new version.
    ///
    /// Fails with [`Error::ConfigNotFound`] when no active row exists.
    pub fn update(
        &self,
        object: &str,
        update: &StrategyUpdate,
        actor: &str,
    ) -> Result<StrategyConfig, Error> {
        let object = normalize(object);

        let result = (&self.configs, &self.heads).transaction(|(configs, heads)| {
            let previous = Self::load_head(configs, heads, &object)?;
            let base = match &previous {
                Some(config) if config.is_active => config.clone(),
                _ => {
                    return Err(ConflictableTransactionError::Abort(Error::ConfigNotFound {
                        object: object.clone(),
                    }))
                }
            };
            let draft = update.apply(&base);
            Self::append_version(configs, heads, previous, &draft, actor)
        });
        let config = finish_txn(result)?;

        debug!(object = %config.target_object, version = config.version, "Strategy configuration updated");
        Ok(config)
    }

    /// Create the config if the object has no active row, otherwise apply the
    /// draft as an update.
    pub fn upsert(&self, draft: &StrategyDraft, actor: &str) -> Result<StrategyConfig, Error> {
        match self.update(&draft.target_object, &StrategyUpdate::from(draft), actor) {
            Err(Error::ConfigNotFound { .. }) => self.create(draft, actor),
            other => other,
        }
    }

    /// Soft-deactivate the active config. The row is kept for history.
    pub fn deactivate(&self, object: &str, actor: &str) -> Result<StrategyConfig, Error> {
        let object = normalize(object);

        let result = (&self.configs, &self.heads).transaction(|(configs, heads)| {
            let mut config = match Self::load_head(configs, heads, &object)? {
                Some(config) if config.is_active => config,
                _ => {
                    return Err(ConflictableTransactionError::Abort(Error::ConfigNotFound {
                        object: object.clone(),
                    }))
                }
            };
            config.is_active = false;
            config.updated_at = current_timestamp();
            config.updated_by = actor.to_string();
            let bytes = config.to_bytes().map_err(ConflictableTransactionError::Abort)?;
            configs.insert(config_key(&object, config.version), bytes)?;
            Ok(config)
        });
        let config = finish_txn(result)?;

        info!(object = %config.target_object, version = config.version, "Strategy configuration deactivated");
        Ok(config)
    }

    /// The active config for an object.
    pub fn get_active(&self, object: &str) -> Result<StrategyConfig, Error> {
        let object = normalize(object);
        let Some(head) = self.heads.get(object.as_bytes())? else {
            return Err(Error::ConfigNotFound { object });
        };
        let version = decode_version(&head)?;
        match self.configs.get(config_key(&object, version))? {
            Some(bytes) => {
                let config = StrategyConfig::from_bytes(&bytes)?;
                if config.is_active {
                    Ok(config)
                } else {
                    Err(Error::ConfigNotFound { object })
                }
            }
            None => Err(Error::ConfigNotFound { object }),
        }
    }

    /// Every version of an object's config, oldest first.
    pub fn history(&self, object: &str) -> Result<Vec<StrategyConfig>, Error> {
        let object = normalize(object);
        let mut prefix = object.into_bytes();
        prefix.push(0);

        self.configs
            .scan_prefix(prefix)
            .map(|item| {
                let (_, bytes) = item?;
                StrategyConfig::from_bytes(&bytes)
            })
            .collect()
    }

    /// All active configs.
    pub fn list_active(&self) -> Result<Vec<StrategyConfig>, Error> {
        let mut active = Vec::new();
        for item in self.heads.iter() {
            let (object, _) = item?;
            let object = String::from_utf8_lossy(&object).into_owned();
            match self.get_active(&object) {
                Ok(config) => active.push(config),
                Err(Error::ConfigNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(active)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.configs.flush()?;
        self.heads.flush()?;
        Ok(())
    }

    fn load_head(
        configs: &TransactionalTree,
        heads: &TransactionalTree,
        object: &str,
    ) -> Result<Option<StrategyConfig>, ConflictableTransactionError<Error>> {
        let Some(head) = heads.get(object.as_bytes())? else {
            return Ok(None);
        };
        let version = decode_version(&head).map_err(ConflictableTransactionError::Abort)?;
        match configs.get(config_key(object, version))? {
            Some(bytes) => StrategyConfig::from_bytes(&bytes)
                .map(Some)
                .map_err(ConflictableTransactionError::Abort),
            None => Err(ConflictableTransactionError::Abort(Error::Deserialization(format!(
                "head of {object} points at missing version {version}"
            )))),
        }
    }

    fn append_version(
        configs: &TransactionalTree,
        heads: &TransactionalTree,
        previous: Option<StrategyConfig>,
        draft: &StrategyDraft,
        actor: &str,
    ) -> Result<StrategyConfig, ConflictableTransactionError<Error>> {
        let object = draft.target_object.as_str();
        let mut next_version = 1;

        if let Some(mut prev) = previous {
            next_version = prev.version + 1;
            if prev.is_active {
                prev.is_active = false;
                prev.updated_at = current_timestamp();
                prev.updated_by = actor.to_string();
                let bytes = prev.to_bytes().map_err(ConflictableTransactionError::Abort)?;
                configs.insert(config_key(object, prev.version), bytes)?;
            }
        }

        let config = StrategyConfig::from_draft(draft, next_version, actor);
        let bytes = config.to_bytes().map_err(ConflictableTransactionError::Abort)?;
        configs.insert(config_key(object, next_version), bytes)?;
        heads.insert(object.as_bytes(), &next_version.to_be_bytes())?;
        Ok(config)
    }
}

fn normalize(object: &str) -> String {
    object.trim().to_ascii_uppercase()
}

fn config_key(object: &str, version: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(object.len() + 9);
    key.extend_from_slice(object.as_bytes());
    key.push(0);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

fn decode_version(bytes: &[u8]) -> Result<u64, Error> {
    let buf: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization("invalid version pointer".to_string()))?;
    Ok(u64::from_be_bytes(buf))
}

fn finish_txn<T>(result: Result<T, TransactionError<Error>>) -> Result<T, Error> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
    }
}
