//! # Pipelines Module
//!
//! High-level workflow orchestration.
//!
//! ## Sub-modules
//! - `phasing`: iterative PBWT-conditioned phasing with matrix write-back

pub mod phasing;

pub use phasing::{PhasedSample, PhasingPipeline};
