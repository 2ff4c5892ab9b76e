//! Size-driven tuning of parallel degree, batch size and sampling.

use crate::jobs::ResourceLimits;
use serde::Deserialize;
use tracing::warn;

const MIB: u64 = 1024 * 1024;

/// Tuning parameters derived from an object's size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningParams {
    /// Intra-statement parallel degree.
    pub parallel_degree: u32,
    /// Rows per loader batch.
    pub batch_size: u64,
    /// Statistics sampling percent in (0, 100].
    pub sampling_percent: f64,
}

impl TuningParams {
    /// Returned when the tier table is invalid.
    pub const SAFE_DEFAULT: TuningParams = TuningParams {
        parallel_degree: 2,
        batch_size: 10_000,
        sampling_percent: 5.0,
    };
}

/// One row of the tier table.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SizeTier {
    /// Exclusive upper bound in MiB. `None` matches every larger size.
    pub below_mib: Option<u64>,
    /// Parallel degree for this tier.
    pub parallel_degree: u32,
    /// Batch size for this tier.
    pub batch_size: u64,
    /// Sampling percent for this tier.
    pub sampling_percent: f64,
}

impl SizeTier {
    /// Create a tier.
    pub const fn new(
        below_mib: Option<u64>,
        parallel_degree: u32,
        batch_size: u64,
        sampling_percent: f64,
    ) -> Self {
        Self {
            below_mib,
            parallel_degree,
            batch_size,
            sampling_percent,
        }
    }
}

/// Heuristics configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HeuristicsConfig {
    /// Tiers in ascending size order.
    pub tiers: Vec<SizeTier>,
    /// Upper bound on the parallel degree.
    pub max_parallel_degree: u32,
    /// Lower bound on the batch size.
    pub min_batch_size: u64,
    /// Upper bound on the batch size.
    pub max_batch_size: u64,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                SizeTier::new(Some(1_000), 1, 1_000, 10.0),
                SizeTier::new(Some(10_000), 2, 10_000, 10.0),
                SizeTier::new(Some(50_000), 4, 25_000, 5.0),
                SizeTier::new(None, 8, 50_000, 1.0),
            ],
            max_parallel_degree: 16,
            min_batch_size: 1_000,
            max_batch_size: 50_000,
        }
    }
}

impl HeuristicsConfig {
    /// Replace the tier table.
    pub fn with_tiers(mut self, tiers: Vec<SizeTier>) -> Self {
        self.tiers = tiers;
        self
    }

    /// Set the degree cap.
    pub fn with_max_parallel_degree(mut self, max: u32) -> Self {
        self.max_parallel_degree = max;
        self
    }

    /// Check the tier table.
    ///
    /// Bounds must be strictly ascending with only the last tier unbounded.
    /// Degrees and batch sizes must not decrease and sampling must not
    /// increase from one tier to the next.
    pub fn validate(&self) -> Result<(), String> {
        if self.tiers.is_empty() {
            return Err("tier table is empty".to_string());
        }
        if self.max_parallel_degree == 0 {
            return Err("max_parallel_degree must be at least 1".to_string());
        }
        if self.min_batch_size == 0 || self.min_batch_size > self.max_batch_size {
            return Err(format!(
                "invalid batch bounds [{}, {}]",
                self.min_batch_size, self.max_batch_size
            ));
        }

        let last = self.tiers.len() - 1;
        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.parallel_degree == 0 {
                return Err(format!("tier {i} has zero parallel degree"));
            }
            if tier.batch_size == 0 {
                return Err(format!("tier {i} has zero batch size"));
            }
            if !(tier.sampling_percent > 0.0 && tier.sampling_percent <= 100.0) {
                return Err(format!(
                    "tier {i} sampling percent {} outside (0, 100]",
                    tier.sampling_percent
                ));
            }
            if tier.below_mib.is_none() && i != last {
                return Err(format!("tier {i} is unbounded but not last"));
            }
        }

        for (i, pair) in self.tiers.windows(2).enumerate() {
            let (lo, hi) = (&pair[0], &pair[1]);
            if let (Some(a), Some(b)) = (lo.below_mib, hi.below_mib) {
                if a >= b {
                    return Err(format!("tier bounds not strictly ascending at tier {}", i + 1));
                }
            }
            if hi.parallel_degree < lo.parallel_degree
                || hi.batch_size < lo.batch_size
                || hi.sampling_percent > lo.sampling_percent
            {
                return Err(format!("tier {} is not monotonic", i + 1));
            }
        }

        Ok(())
    }
}

/// Maps object sizes to tuning parameters.
#[derive(Debug, Clone, Default)]
pub struct ResourceHeuristics {
    config: HeuristicsConfig,
}

impl ResourceHeuristics {
    /// Create heuristics over a configuration.
    pub fn new(config: HeuristicsConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &HeuristicsConfig {
        &self.config
    }

    /// Tuning parameters for an object of `size_bytes`.
    ///
    /// Never fails; an invalid tier table yields
    /// [`TuningParams::SAFE_DEFAULT`].
    pub fn tune(&self, size_bytes: u64) -> TuningParams {
        if let Err(reason) = self.config.validate() {
            warn!(reason = %reason, "Invalid heuristics tier table, using safe defaults");
            return TuningParams::SAFE_DEFAULT;
        }

        let size_mib = size_bytes / MIB;
        let tier = self
            .config
            .tiers
            .iter()
            .find(|t| t.below_mib.map_or(true, |bound| size_mib < bound))
            .or_else(|| self.config.tiers.last());

        let Some(tier) = tier else {
            return TuningParams::SAFE_DEFAULT;
        };

        TuningParams {
            parallel_degree: tier
                .parallel_degree
                .clamp(1, self.config.max_parallel_degree),
            batch_size: tier
                .batch_size
                .clamp(self.config.min_batch_size, self.config.max_batch_size),
            sampling_percent: tier.sampling_percent,
        }
    }

    /// Like [`tune`](Self::tune), with the degree capped by a job's limits.
    pub fn tune_with_limits(&self, size_bytes: u64, limits: &ResourceLimits) -> TuningParams {
        let mut params = self.tune(size_bytes);
        if let Some(cap) = limits.max_parallel_degree {
            params.parallel_degree = params.parallel_degree.min(cap.max(1));
        }
        params
    }
}

/// Tune with the default tier table.
pub fn tune(size_bytes: u64) -> TuningParams {
    ResourceHeuristics::default().tune(size_bytes)
}
