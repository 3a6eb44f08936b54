//! # Model Module
//!
//! The phasing core:
//! - `pbwt`: positional prefix sort and nearest-neighbour queries
//! - `conditioning`: per-site conditioning slots of one sample
//! - `states`: diplotype states and state sets
//! - `genotype`: variant records, phase blocks, segmentation and probability storage
//! - `guess`: PBWT neighbour vote for the haplotypes the first iteration starts from
//! - `hmm`: forward-backward over segments and path choices
//! - `merge`: merging and pruning between rounds
//! - `parameters`: model hyperparameters

pub mod conditioning;
pub mod genotype;
pub mod guess;
pub mod hmm;
pub mod merge;
pub mod parameters;
pub mod pbwt;
pub mod states;

pub use conditioning::{Conditioning, SiteAlleles};
pub use genotype::{Genotype, Segment, VariantCode, VariantKind};
pub use guess::initial_guess;
pub use hmm::{ForwardBackward, Pass, Posteriors, Transition};
pub use parameters::ModelParams;
pub use pbwt::{Neighbors, PrefixIndex};
pub use states::{DipCodes, Diplotype, StateSet, N_SLOTS, N_STATES};
