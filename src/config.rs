//! # Configuration Logic
//!
//! ## Role
//! CLI argument parsing and validation for the `rephase` binary, which phases a
//! synthetic panel end to end.
//!
//! ## Example CLI
//! ```bash
//! rephase --samples 200 --sites 5000 --reference-haps 400 --nthreads 8 --profile
//! ```

use clap::Parser;

use crate::error::{PhaseError, Result};
use crate::model::parameters::ModelParams;
use crate::model::states::N_SLOTS;

/// Phase and impute diploid genotypes with a PBWT-conditioned segment HMM.
#[derive(Parser, Debug, Clone)]
#[command(name = "rephase", version, about)]
pub struct Config {
    /// Number of diploid samples to phase
    #[arg(long, default_value_t = 100)]
    pub samples: usize,

    /// Number of biallelic sites
    #[arg(long, default_value_t = 2_000)]
    pub sites: usize,

    /// Additional phased reference haplotypes in the panel
    #[arg(long = "reference-haps", default_value_t = 200)]
    pub reference_haps: usize,

    /// Founder haplotypes the synthetic panel is a mosaic of
    #[arg(long, default_value_t = 20)]
    pub founders: usize,

    /// Fraction of calls set to missing in the synthetic samples
    #[arg(long = "missing-rate", default_value_t = 0.01)]
    pub missing_rate: f64,

    /// Conditioning haplotypes per chromosome copy (1..=8)
    #[arg(long, default_value_t = 8)]
    pub k: usize,

    /// Burn-in iterations
    #[arg(long, default_value_t = 2)]
    pub burnin: usize,

    /// Main iterations (marginals are stored)
    #[arg(long, default_value_t = 3)]
    pub iterations: usize,

    /// Merge adjacent segments whose posteriors differ by less than this
    #[arg(long = "merge-threshold", default_value_t = 0.0)]
    pub merge_threshold: f64,

    /// Prune states below this fraction of the segment maximum
    #[arg(long = "prune-floor", default_value_t = 0.0)]
    pub prune_floor: f64,

    /// Minimum confidence for a site to count as resolved
    #[arg(long = "mask-threshold", default_value_t = 0.9)]
    pub mask_threshold: f64,

    /// Per-site switch rate of the uniform recombination model
    #[arg(long, default_value_t = 0.01)]
    pub rate: f64,

    /// Random seed for reproducibility
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Number of threads (default: all cores)
    #[arg(long)]
    pub nthreads: Option<usize>,

    /// Print span timings to stderr
    #[arg(long)]
    pub profile: bool,
}

impl Config {
    /// Parse command-line arguments and validate them
    pub fn parse_and_validate() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.samples == 0 {
            return Err(PhaseError::config("--samples must be at least 1"));
        }
        if self.sites == 0 {
            return Err(PhaseError::config("--sites must be at least 1"));
        }
        if self.k == 0 || self.k > N_SLOTS {
            return Err(PhaseError::config(format!(
                "--k must be in 1..={}, got {}",
                N_SLOTS, self.k
            )));
        }
        if 2 * self.samples + self.reference_haps < 3 {
            return Err(PhaseError::config(
                "panel needs at least one haplotype besides each sample's own",
            ));
        }
        if !(0.0..1.0).contains(&self.missing_rate) {
            return Err(PhaseError::config(format!(
                "--missing-rate must be in [0, 1), got {}",
                self.missing_rate
            )));
        }
        if !(self.rate > 0.0 && self.rate.is_finite()) {
            return Err(PhaseError::config(format!(
                "--rate must be positive, got {}",
                self.rate
            )));
        }
        if self.nthreads == Some(0) {
            return Err(PhaseError::config("--nthreads must be at least 1"));
        }
        self.to_params().validate()
    }

    /// Model parameters carried by this configuration
    pub fn to_params(&self) -> ModelParams {
        ModelParams {
            k: self.k,
            burnin: self.burnin,
            iterations: self.iterations,
            merge_threshold: self.merge_threshold,
            prune_floor: self.prune_floor,
            mask_threshold: self.mask_threshold,
            seed: self.seed,
            ..ModelParams::default()
        }
    }

    /// Number of worker threads that will be used
    pub fn nthreads(&self) -> usize {
        self.nthreads.unwrap_or_else(rayon::current_num_threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("rephase").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        let config = parse(&[]);
        assert!(config.validate().is_ok());
        assert_eq!(config.to_params().k, 8);
    }

    #[test]
    fn test_flags_reach_params() {
        let config = parse(&["--k", "4", "--merge-threshold", "0.05", "--seed", "9", "--nthreads", "3"]);
        let params = config.to_params();
        assert_eq!(params.k, 4);
        assert_eq!(params.merge_threshold, 0.05);
        assert_eq!(params.seed, 9);
        assert_eq!(config.nthreads(), 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(parse(&["--k", "9"]).validate().is_err());
        assert!(parse(&["--sites", "0"]).validate().is_err());
        assert!(parse(&["--rate", "0"]).validate().is_err());
        assert!(matches!(
            parse(&["--mask-threshold", "0.1"]).validate(),
            Err(PhaseError::Config { .. })
        ));
    }
}
