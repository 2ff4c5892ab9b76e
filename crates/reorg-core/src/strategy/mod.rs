//! Strategy configuration.
//!
//! A [`StrategyConfig`] records the partitioning scheme an object is declared
//! to have. Configs are versioned and never deleted.

mod store;
mod types;

pub use store::StrategyConfigStore;
pub use types::{StrategyConfig, StrategyDraft, StrategyType, StrategyUpdate};
