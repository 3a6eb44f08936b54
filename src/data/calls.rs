//! # Raw Genotype Calls
//!
//! Unphased diploid calls and externally supplied phase-set constraints, as handed
//! over by the (external) variant reader.

use serde::{Deserialize, Serialize};

/// Unphased biallelic genotype call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Call {
    HomRef,
    HomAlt,
    Het,
    Missing,
}

impl Call {
    /// Call implied by a pair of alleles (order ignored)
    pub fn from_alleles(a0: u8, a1: u8) -> Self {
        match (a0 != 0, a1 != 0) {
            (false, false) => Call::HomRef,
            (true, true) => Call::HomAlt,
            _ => Call::Het,
        }
    }

    /// Whether the ordered allele pair reproduces this call
    #[inline]
    pub fn accepts(self, a0: u8, a1: u8) -> bool {
        match self {
            Call::HomRef => a0 == 0 && a1 == 0,
            Call::HomAlt => a0 == 1 && a1 == 1,
            Call::Het => a0 != a1,
            Call::Missing => true,
        }
    }

    pub fn is_het(self) -> bool {
        self == Call::Het
    }

    pub fn is_missing(self) -> bool {
        self == Call::Missing
    }

    /// Default alleles before any phasing: het as 0|1, missing as 0|0
    pub fn default_alleles(self) -> [u8; 2] {
        match self {
            Call::HomRef | Call::Missing => [0, 0],
            Call::HomAlt => [1, 1],
            Call::Het => [0, 1],
        }
    }
}

/// Hard phase constraint: at `site`, copy 0 carries `alleles[0]` and copy 1
/// carries `alleles[1]`, up to the orientation of the phase set. Constraints
/// sharing a `phase_set` keep their relative phase; the set may flip as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseConstraint {
    pub phase_set: u32,
    pub site: usize,
    pub alleles: [u8; 2],
}

impl PhaseConstraint {
    pub fn new(phase_set: u32, site: usize, a0: u8, a1: u8) -> Self {
        Self {
            phase_set,
            site,
            alleles: [a0 & 1, a1 & 1],
        }
    }
}

/// Everything the external reader supplies for one sample
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SampleCalls {
    pub calls: Vec<Call>,
    pub constraints: Vec<PhaseConstraint>,
}

impl SampleCalls {
    pub fn new(calls: Vec<Call>) -> Self {
        Self {
            calls,
            constraints: Vec::new(),
        }
    }

    pub fn with_constraints(mut self, constraints: Vec<PhaseConstraint>) -> Self {
        self.constraints = constraints;
        self
    }

    /// Unphased default haplotypes used before phasing and as the fallback
    pub fn default_haplotypes(&self) -> [Vec<u8>; 2] {
        let mut haps = [
            Vec::with_capacity(self.calls.len()),
            Vec::with_capacity(self.calls.len()),
        ];
        for call in &self.calls {
            let [a0, a1] = call.default_alleles();
            haps[0].push(a0);
            haps[1].push(a1);
        }
        haps
    }
}
