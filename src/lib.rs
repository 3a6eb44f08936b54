//! # Rephase Library
//!
//! Phasing and imputation of diploid genotypes. A positional prefix sort finds, at
//! every site, the haplotypes closest to each of a sample's two copies; a compressed
//! hidden-state model over segments of sites then samples phase and fills in missing
//! calls.
//!
//! ## Modules
//! - `config`: CLI argument parsing and validation
//! - `data`: Haplotype matrix, genotype calls and recombination models
//! - `error`: Error types and result aliases
//! - `model`: Prefix index, state model and recursion
//! - `pipelines`: High-level workflow orchestration
//! - `utils`: Telemetry and thread pools

pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipelines;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use data::calls::{Call, PhaseConstraint, SampleCalls};
pub use data::genetic_map::{GeneticMap, MarkerMap, RecombinationModel, UniformRecombination};
pub use data::haplotype::{HapIdx, SampleIdx};
pub use data::matrix::{BitMatrix, HaplotypeMatrix};
pub use error::{PhaseError, Result};
pub use model::conditioning::Conditioning;
pub use model::genotype::Genotype;
pub use model::parameters::ModelParams;
pub use model::pbwt::PrefixIndex;

pub use pipelines::{PhasedSample, PhasingPipeline};
