//! # Haplotype and Sample Indices
//!
//! Zero-cost index newtypes. Main haplotypes are laid out two per sample
//! (`2s`, `2s + 1`); reference haplotypes follow the main ones.

use serde::{Deserialize, Serialize};

/// Zero-cost newtype for sample indices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SampleIdx(pub u32);

impl SampleIdx {
    pub fn new(idx: u32) -> Self {
        Self(idx)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// First haplotype of this sample (chromosome copy 0)
    pub fn hap1(self) -> HapIdx {
        HapIdx::new(self.0 * 2)
    }

    /// Second haplotype of this sample (chromosome copy 1)
    pub fn hap2(self) -> HapIdx {
        HapIdx::new(self.0 * 2 + 1)
    }

    /// Haplotype carrying chromosome copy `copy` (0 or 1)
    pub fn hap(self, copy: usize) -> HapIdx {
        HapIdx::new(self.0 * 2 + (copy as u32 & 1))
    }

    /// Whether `hap` is one of this sample's own haplotypes
    pub fn owns(self, hap: HapIdx) -> bool {
        hap.0 >> 1 == self.0
    }
}

impl From<usize> for SampleIdx {
    fn from(idx: usize) -> Self {
        Self(idx as u32)
    }
}

impl std::fmt::Display for SampleIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zero-cost newtype for haplotype indices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct HapIdx(pub u32);

impl HapIdx {
    pub fn new(idx: u32) -> Self {
        Self(idx)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}
