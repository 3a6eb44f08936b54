//! # Conditioning Haplotypes
//!
//! At every site each chromosome copy of a sample is conditioned on up to
//! [`N_SLOTS`] neighbour haplotypes from the prefix index. Slot `j` of a copy is its
//! `j`-th nearest neighbour at that site. The alleles the slots carry are packed into
//! one byte per copy ([`SiteAlleles`]), which is all the state model needs.

use crate::data::calls::Call;
use crate::data::haplotype::{HapIdx, SampleIdx};
use crate::data::matrix::HaplotypeMatrix;
use crate::error::{PhaseError, Result};
use crate::model::pbwt::PrefixIndex;
use crate::model::states::{StateSet, N_SLOTS};

/// Alleles of the conditioning slots at one site, bit `j` of byte `c` = slot `j` of copy `c`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SiteAlleles([u8; 2]);

impl SiteAlleles {
    /// Pack per-slot alleles of both copies (at most 8 each)
    pub fn new(copy0: &[u8], copy1: &[u8]) -> Self {
        Self([Self::pack(copy0), Self::pack(copy1)])
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(bytes)
    }

    fn pack(alleles: &[u8]) -> u8 {
        alleles
            .iter()
            .take(N_SLOTS)
            .enumerate()
            .fold(0u8, |acc, (j, &a)| acc | ((a & 1) << j))
    }

    /// Allele carried by `slot` of chromosome copy `copy`
    #[inline]
    pub fn allele(self, copy: usize, slot: usize) -> u8 {
        (self.0[copy] >> slot) & 1
    }

    /// Slots of `copy` (among the first `n_slots`) carrying `allele`
    #[inline]
    pub fn slots_with(self, copy: usize, allele: u8, n_slots: usize) -> u8 {
        let bits = if allele == 0 { !self.0[copy] } else { self.0[copy] };
        bits & StateSet::slot_mask(n_slots)
    }

    /// States whose ordered alleles reproduce `call`
    pub fn call_states(self, call: Call, n_slots: [usize; 2]) -> StateSet {
        let with = |copy: usize, allele: u8| self.slots_with(copy, allele, n_slots[copy]);
        match call {
            Call::HomRef => StateSet::product(with(0, 0), with(1, 0)),
            Call::HomAlt => StateSet::product(with(0, 1), with(1, 1)),
            Call::Het => {
                StateSet::product(with(0, 1), with(1, 0)) | StateSet::product(with(0, 0), with(1, 1))
            }
            Call::Missing => StateSet::valid(n_slots[0], n_slots[1]),
        }
    }

    /// States carrying exactly `alleles` on copies 0 and 1
    pub fn fixed_states(self, alleles: [u8; 2], n_slots: [usize; 2]) -> StateSet {
        StateSet::product(
            self.slots_with(0, alleles[0], n_slots[0]),
            self.slots_with(1, alleles[1], n_slots[1]),
        )
    }
}

/// Per-site conditioning slots of one sample
#[derive(Clone, Debug, Default)]
pub struct Conditioning {
    n_slots: [usize; 2],
    alleles: Vec<SiteAlleles>,
    haps: Vec<[[HapIdx; N_SLOTS]; 2]>,
}

impl Conditioning {
    /// Query the index at every site for `sample`'s `k` nearest haplotypes per copy
    ///
    /// Fails with `StaleIndex` if `matrix` changed since `index` was built.
    pub fn select<M: HaplotypeMatrix + ?Sized>(
        index: &PrefixIndex,
        matrix: &M,
        sample: SampleIdx,
        k: usize,
    ) -> Result<Self> {
        index.ensure_current(matrix)?;
        if index.n_sites() != matrix.site_count() {
            return Err(PhaseError::invalid_data(format!(
                "prefix index covers {} sites but matrix has {}",
                index.n_sites(),
                matrix.site_count()
            )));
        }
        if sample.hap2().as_usize() >= index.n_haps() {
            return Err(PhaseError::invalid_data(format!(
                "sample {} has no haplotypes in a panel of {}",
                sample,
                index.n_haps()
            )));
        }
        let k = k.min(N_SLOTS);
        let n_sites = matrix.site_count();
        let eligible = matrix.haplotype_count().saturating_sub(2);

        let mut n_slots = [k.min(eligible); 2];
        let mut alleles = Vec::with_capacity(n_sites);
        let mut haps = Vec::with_capacity(n_sites);
        let mut buf: [Vec<HapIdx>; 2] = [Vec::with_capacity(k), Vec::with_capacity(k)];

        for site in 0..n_sites {
            let mut bytes = [0u8; 2];
            let mut site_haps = [[HapIdx::default(); N_SLOTS]; 2];
            for copy in 0..2 {
                index.neighbors_of(sample, sample.hap(copy), site, k, &mut buf[copy]);
                n_slots[copy] = n_slots[copy].min(buf[copy].len());
                for (slot, &hap) in buf[copy].iter().enumerate() {
                    bytes[copy] |= (matrix.allele(site, hap) & 1) << slot;
                    site_haps[copy][slot] = hap;
                }
            }
            alleles.push(SiteAlleles(bytes));
            haps.push(site_haps);
        }

        Ok(Self {
            n_slots,
            alleles,
            haps,
        })
    }

    /// Conditioning given directly as packed alleles (haplotype ids unknown)
    pub fn from_sites(n_slots: [usize; 2], alleles: Vec<SiteAlleles>) -> Self {
        let haps = vec![[[HapIdx::default(); N_SLOTS]; 2]; alleles.len()];
        Self {
            n_slots: [n_slots[0].min(N_SLOTS), n_slots[1].min(N_SLOTS)],
            alleles,
            haps,
        }
    }

    pub fn n_sites(&self) -> usize {
        self.alleles.len()
    }

    /// Valid slots per copy
    pub fn slot_counts(&self) -> [usize; 2] {
        self.n_slots
    }

    #[inline]
    pub fn site(&self, site: usize) -> SiteAlleles {
        self.alleles[site]
    }

    /// Haplotype behind `slot` of `copy` at `site`
    pub fn haplotype(&self, site: usize, copy: usize, slot: usize) -> HapIdx {
        self.haps[site][copy][slot]
    }
}
