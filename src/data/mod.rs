//! # Data Module
//!
//! In-memory inputs of the phasing core: the haplotype panel, raw genotype calls and
//! the recombination model.
//!
//! ## Design Philosophy: Data-Oriented Design
//! - **Bit-packed columns:** one `BitVec` per site, so the prefix-sort sweep reads
//!   memory sequentially.
//! - **Zero-cost newtypes:** `HapIdx`, `SampleIdx` prevent index bugs at compile time.
//! - **Trait seams:** the core reads the panel through `HaplotypeMatrix` and the map
//!   through `RecombinationModel`; the implementations here are replaceable.

pub mod calls;
pub mod genetic_map;
pub mod haplotype;
pub mod matrix;

pub use calls::{Call, PhaseConstraint, SampleCalls};
pub use genetic_map::{GeneticMap, MarkerMap, RecombinationModel, UniformRecombination};
pub use haplotype::{HapIdx, SampleIdx};
pub use matrix::{BitMatrix, HaplotypeMatrix};
