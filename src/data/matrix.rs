//! # Haplotype Bit-Matrix
//!
//! Sites × haplotypes allele matrix. The phasing core only reads it through the
//! [`HaplotypeMatrix`] trait; [`BitMatrix`] is the in-memory implementation used by
//! the pipeline, one bit-packed column per site.
//!
//! Every mutation stamps the matrix with a fresh, process-unique version so that a
//! prefix index built from an older state can be detected.

use std::sync::atomic::{AtomicU64, Ordering};

use bitvec::prelude::*;
use rand::Rng;

use crate::data::haplotype::{HapIdx, SampleIdx};
use crate::error::{PhaseError, Result};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// Read-only view of a biallelic haplotype panel
pub trait HaplotypeMatrix: Sync {
    /// Number of sites (columns)
    fn site_count(&self) -> usize;

    /// Number of haplotypes, main and reference
    fn haplotype_count(&self) -> usize;

    /// Allele (0 or 1) carried by `hap` at `site`
    fn allele(&self, site: usize, hap: HapIdx) -> u8;

    /// Version stamp; changes whenever the content changes
    fn version(&self) -> u64;
}

/// Bit-packed haplotype matrix: main haplotypes (two per sample) then reference
/// haplotypes.
#[derive(Clone, Debug)]
pub struct BitMatrix {
    columns: Vec<BitVec<u64, Lsb0>>,
    n_main_haps: usize,
    n_haps: usize,
    version: u64,
}

impl BitMatrix {
    /// All-reference matrix
    pub fn new(n_sites: usize, n_main_haps: usize, n_ref_haps: usize) -> Self {
        let n_haps = n_main_haps + n_ref_haps;
        Self {
            columns: vec![bitvec![u64, Lsb0; 0; n_haps]; n_sites],
            n_main_haps,
            n_haps,
            version: next_version(),
        }
    }

    /// Build from row-major haplotypes (`haps[h][site]`). The first `n_main_haps`
    /// rows are main haplotypes.
    pub fn from_haplotypes(haps: &[Vec<u8>], n_main_haps: usize) -> Result<Self> {
        if n_main_haps > haps.len() || n_main_haps % 2 != 0 {
            return Err(PhaseError::invalid_data(format!(
                "{} main haplotypes requested from {} rows (must be even and not exceed rows)",
                n_main_haps,
                haps.len()
            )));
        }
        let n_sites = haps.first().map_or(0, |h| h.len());
        let mut matrix = Self::new(n_sites, n_main_haps, haps.len() - n_main_haps);
        for (h, alleles) in haps.iter().enumerate() {
            matrix.write_haplotype(HapIdx::new(h as u32), alleles)?;
        }
        matrix.version = next_version();
        Ok(matrix)
    }

    /// Synthetic panel: every haplotype is a mosaic of `n_founders` random founder
    /// haplotypes, switching founder with probability `switch_rate` per site.
    pub fn random_mosaic<R: Rng>(
        n_sites: usize,
        n_main_haps: usize,
        n_ref_haps: usize,
        n_founders: usize,
        switch_rate: f64,
        rng: &mut R,
    ) -> Self {
        let n_founders = n_founders.max(1);
        let mut founders: Vec<Vec<u8>> = vec![Vec::with_capacity(n_sites); n_founders];
        for _ in 0..n_sites {
            let freq = rng.random_range(0.05..0.5);
            for founder in founders.iter_mut() {
                founder.push(u8::from(rng.random::<f64>() < freq));
            }
        }

        let mut matrix = Self::new(n_sites, n_main_haps, n_ref_haps);
        for h in 0..matrix.n_haps {
            let mut current = rng.random_range(0..n_founders);
            for site in 0..n_sites {
                if site > 0 && rng.random::<f64>() < switch_rate {
                    current = rng.random_range(0..n_founders);
                }
                matrix.columns[site].set(h, founders[current][site] == 1);
            }
        }
        matrix.version = next_version();
        matrix
    }

    /// Number of main (sample) haplotypes
    pub fn n_main_haps(&self) -> usize {
        self.n_main_haps
    }

    /// Number of samples owning main haplotypes
    pub fn n_samples(&self) -> usize {
        self.n_main_haps / 2
    }

    /// Bit-packed column for a site
    pub fn column(&self, site: usize) -> &BitSlice<u64, Lsb0> {
        &self.columns[site]
    }

    /// Alleles of one haplotype across all sites
    pub fn haplotype(&self, hap: HapIdx) -> Vec<u8> {
        self.columns
            .iter()
            .map(|col| u8::from(col[hap.as_usize()]))
            .collect()
    }

    /// Overwrite one haplotype; bumps the version
    pub fn set_haplotype(&mut self, hap: HapIdx, alleles: &[u8]) -> Result<()> {
        self.write_haplotype(hap, alleles)?;
        self.version = next_version();
        Ok(())
    }

    /// Overwrite both haplotypes of a sample; bumps the version once
    pub fn set_sample(&mut self, sample: SampleIdx, haps: [&[u8]; 2]) -> Result<()> {
        if sample.hap2().as_usize() >= self.n_main_haps {
            return Err(PhaseError::invalid_data(format!(
                "sample {} has no main haplotypes ({} main haplotypes)",
                sample, self.n_main_haps
            )));
        }
        self.write_haplotype(sample.hap1(), haps[0])?;
        self.write_haplotype(sample.hap2(), haps[1])?;
        self.version = next_version();
        Ok(())
    }

    fn write_haplotype(&mut self, hap: HapIdx, alleles: &[u8]) -> Result<()> {
        if alleles.len() != self.columns.len() {
            return Err(PhaseError::invalid_data(format!(
                "haplotype has {} alleles, matrix has {} sites",
                alleles.len(),
                self.columns.len()
            )));
        }
        if hap.as_usize() >= self.n_haps {
            return Err(PhaseError::invalid_data(format!(
                "haplotype {} out of range ({} haplotypes)",
                hap.0, self.n_haps
            )));
        }
        for (col, &allele) in self.columns.iter_mut().zip(alleles) {
            col.set(hap.as_usize(), allele != 0);
        }
        Ok(())
    }
}

impl HaplotypeMatrix for BitMatrix {
    fn site_count(&self) -> usize {
        self.columns.len()
    }

    fn haplotype_count(&self) -> usize {
        self.n_haps
    }

    #[inline]
    fn allele(&self, site: usize, hap: HapIdx) -> u8 {
        u8::from(self.columns[site][hap.as_usize()])
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_from_haplotypes() {
        let haps = vec![vec![0, 1, 1], vec![1, 0, 1], vec![0, 0, 0]];
        assert!(BitMatrix::from_haplotypes(&haps, 1).is_err());

        let m = BitMatrix::from_haplotypes(&haps, 2).unwrap();
        assert_eq!(m.site_count(), 3);
        assert_eq!(m.haplotype_count(), 3);
        assert_eq!(m.n_samples(), 1);
        assert_eq!(m.allele(1, HapIdx::new(0)), 1);
        assert_eq!(m.allele(1, HapIdx::new(1)), 0);
        assert_eq!(m.haplotype(HapIdx::new(1)), vec![1, 0, 1]);
    }

    #[test]
    fn test_version_changes_on_write() {
        let mut m = BitMatrix::new(4, 2, 2);
        let v0 = m.version();
        m.set_haplotype(HapIdx::new(3), &[1, 1, 0, 0]).unwrap();
        let v1 = m.version();
        assert_ne!(v0, v1);
        m.set_sample(SampleIdx::new(0), [&[1, 0, 0, 0], &[0, 0, 0, 1]]).unwrap();
        assert_ne!(v1, m.version());
        assert_eq!(m.haplotype(HapIdx::new(1)), vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_rejects_bad_lengths() {
        let mut m = BitMatrix::new(4, 2, 0);
        assert!(m.set_haplotype(HapIdx::new(0), &[1, 1]).is_err());
        assert!(m.set_haplotype(HapIdx::new(5), &[1, 1, 1, 1]).is_err());
        assert!(m.set_sample(SampleIdx::new(1), [&[0; 4], &[0; 4]]).is_err());
    }

    #[test]
    fn test_random_mosaic_shape() {
        let mut rng = SmallRng::seed_from_u64(7);
        let m = BitMatrix::random_mosaic(50, 10, 6, 4, 0.05, &mut rng);
        assert_eq!(m.site_count(), 50);
        assert_eq!(m.haplotype_count(), 16);
        assert_eq!(m.n_main_haps(), 10);
    }
}
