//! # Model Parameters
//!
//! ## Role
//! Pure data structures for algorithm hyperparameters: conditioning size, iteration
//! schedule, merge/prune thresholds and the recombination floor.

use serde::{Deserialize, Serialize};

use crate::error::{PhaseError, Result};
use crate::model::states::N_SLOTS;

/// Numeric parameters of the phasing model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Conditioning haplotypes per chromosome copy (at most 8)
    pub k: usize,

    /// Burn-in iterations: sample paths, do not store
    pub burnin: usize,

    /// Main iterations: sample paths and store marginals
    pub iterations: usize,

    /// Total-variation distance below which adjacent segments are merged.
    /// Zero disables merging.
    pub merge_threshold: f64,

    /// States below `prune_floor * max` posterior are dropped before the
    /// second round. Zero disables pruning.
    pub prune_floor: f64,

    /// Minimum confidence for a stored site to count as resolved
    pub mask_threshold: f64,

    /// Lower clamp of the per-boundary switch probability
    pub min_recomb: f64,

    /// Seed from which every per-sample RNG stream is derived
    pub seed: u64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            k: N_SLOTS,
            burnin: 2,
            iterations: 3,
            merge_threshold: 0.0,
            prune_floor: 0.0,
            mask_threshold: 0.9,
            min_recomb: 1e-7,
            seed: 0,
        }
    }
}

impl ModelParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 || self.k > N_SLOTS {
            return Err(PhaseError::config(format!(
                "k must be in 1..={N_SLOTS}, got {}",
                self.k
            )));
        }
        if !(0.0..=1.0).contains(&self.merge_threshold) {
            return Err(PhaseError::config(format!(
                "merge threshold must be in [0, 1], got {}",
                self.merge_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.prune_floor) {
            return Err(PhaseError::config(format!(
                "prune floor must be in [0, 1), got {}",
                self.prune_floor
            )));
        }
        if !(0.5..=1.0).contains(&self.mask_threshold) {
            return Err(PhaseError::config(format!(
                "mask threshold must be in [0.5, 1], got {}",
                self.mask_threshold
            )));
        }
        if !(self.min_recomb > 0.0 && self.min_recomb < 1.0) {
            return Err(PhaseError::config(format!(
                "minimum recombination must be in (0, 1), got {}",
                self.min_recomb
            )));
        }
        Ok(())
    }

    /// Total number of iterations
    pub fn n_iterations(&self) -> usize {
        self.burnin + self.iterations
    }
}
