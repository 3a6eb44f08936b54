//! # Positional Burrows-Wheeler Transform (PBWT)
//!
//! ## Role
//! Find, at every site, the haplotypes sharing the longest allele match with each of
//! a sample's two haplotypes, ending just before that site.
//!
//! ## Background
//! The PBWT (Durbin 2014) maintains, per site, an ordering of haplotypes sorted by
//! their reversed prefixes, so haplotypes with long common suffixes are adjacent. The
//! divergence array records how far back each adjacent pair agrees. Column `k+1` is
//! derived from column `k` by a stable bucket split on the alleles at site `k`.
//!
//! ## Layout
//! Column `site` (for `site` in `0..=n_sites`) covers sites `[0, site)`. All columns
//! are kept (flat `(n_sites + 1) * n_haps` arrays) so any site can be queried after the
//! sweep; the index is immutable once built and is shared read-only by all workers.

use crate::data::haplotype::{HapIdx, SampleIdx};
use crate::data::matrix::HaplotypeMatrix;
use crate::error::{PhaseError, Result};

/// Reusable single-column PBWT update (Durbin's algorithm 2)
///
/// Keeps divergence as match *start* positions internally; the index stores match
/// lengths.
#[derive(Clone, Debug)]
pub struct PbwtDivUpdater {
    zeros: Vec<u32>,
    ones: Vec<u32>,
    zero_starts: Vec<u32>,
    one_starts: Vec<u32>,
}

impl PbwtDivUpdater {
    pub fn new(n_haps: usize) -> Self {
        Self {
            zeros: Vec::with_capacity(n_haps),
            ones: Vec::with_capacity(n_haps),
            zero_starts: Vec::with_capacity(n_haps),
            one_starts: Vec::with_capacity(n_haps),
        }
    }

    /// Advance `ppa`/`starts` across `site`, reading each haplotype's allele from
    /// `allele`. On entry `starts[i]` is the first site of the match between `ppa[i]`
    /// and `ppa[i-1]` (or `site` for `i == 0`); on exit it describes column `site + 1`.
    pub fn fwd_update<F>(&mut self, site: usize, ppa: &mut [u32], starts: &mut [u32], allele: F)
    where
        F: Fn(u32) -> u8,
    {
        self.zeros.clear();
        self.ones.clear();
        self.zero_starts.clear();
        self.one_starts.clear();

        let next = site as u32 + 1;
        let mut p = next;
        let mut q = next;
        for (&hap, &start) in ppa.iter().zip(starts.iter()) {
            p = p.max(start);
            q = q.max(start);
            if allele(hap) == 0 {
                self.zeros.push(hap);
                self.zero_starts.push(p);
                p = 0;
            } else {
                self.ones.push(hap);
                self.one_starts.push(q);
                q = 0;
            }
        }

        let n0 = self.zeros.len();
        ppa[..n0].copy_from_slice(&self.zeros);
        ppa[n0..].copy_from_slice(&self.ones);
        starts[..n0].copy_from_slice(&self.zero_starts);
        starts[n0..].copy_from_slice(&self.one_starts);
    }
}

/// Conditioning haplotypes found for the two copies of one sample at one site
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Neighbors {
    pub copies: [Vec<HapIdx>; 2],
}

impl Neighbors {
    /// Neighbours of chromosome copy `copy`, closest first
    pub fn copy(&self, copy: usize) -> &[HapIdx] {
        &self.copies[copy]
    }
}

/// Prefix arrays and divergence (match length) arrays for every site of a panel
#[derive(Clone, Debug)]
pub struct PrefixIndex {
    n_sites: usize,
    n_haps: usize,
    /// Matrix version this index was built from
    version: u64,
    /// `ordering[site * n_haps + i]`: haplotype at sorted position `i`
    ordering: Vec<u32>,
    /// `divergence[site * n_haps + i]`: match length between positions `i-1` and `i`
    divergence: Vec<u32>,
    /// `positions[site * n_haps + hap]`: sorted position of `hap`
    positions: Vec<u32>,
}

impl PrefixIndex {
    /// Build all columns in one left-to-right sweep
    pub fn build<M: HaplotypeMatrix + ?Sized>(matrix: &M) -> Self {
        let _span = tracing::info_span!(
            "pbwt_build",
            n_sites = matrix.site_count(),
            n_haps = matrix.haplotype_count()
        )
        .entered();

        let n_sites = matrix.site_count();
        let n_haps = matrix.haplotype_count();
        let n_cols = n_sites + 1;

        let mut ordering = vec![0u32; n_cols * n_haps];
        let mut divergence = vec![0u32; n_cols * n_haps];
        let mut positions = vec![0u32; n_cols * n_haps];

        let mut ppa: Vec<u32> = (0..n_haps as u32).collect();
        let mut starts: Vec<u32> = vec![0; n_haps];
        let mut updater = PbwtDivUpdater::new(n_haps);

        Self::write_column(0, &ppa, &starts, &mut ordering, &mut divergence, &mut positions);
        for site in 0..n_sites {
            updater.fwd_update(site, &mut ppa, &mut starts, |hap| {
                matrix.allele(site, HapIdx::new(hap))
            });
            Self::write_column(
                site + 1,
                &ppa,
                &starts,
                &mut ordering,
                &mut divergence,
                &mut positions,
            );
        }

        Self {
            n_sites,
            n_haps,
            version: matrix.version(),
            ordering,
            divergence,
            positions,
        }
    }

    fn write_column(
        col: usize,
        ppa: &[u32],
        starts: &[u32],
        ordering: &mut [u32],
        divergence: &mut [u32],
        positions: &mut [u32],
    ) {
        let n_haps = ppa.len();
        let offset = col * n_haps;
        ordering[offset..offset + n_haps].copy_from_slice(ppa);
        for (i, (&hap, &start)) in ppa.iter().zip(starts).enumerate() {
            divergence[offset + i] = if i == 0 { 0 } else { col as u32 - start.min(col as u32) };
            positions[offset + hap as usize] = i as u32;
        }
    }

    pub fn n_sites(&self) -> usize {
        self.n_sites
    }

    pub fn n_haps(&self) -> usize {
        self.n_haps
    }

    /// Matrix version this index reflects
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Fail with `StaleIndex` unless the matrix is still at the version indexed
    pub fn ensure_current<M: HaplotypeMatrix + ?Sized>(&self, matrix: &M) -> Result<()> {
        if matrix.version() != self.version {
            return Err(PhaseError::StaleIndex {
                built: self.version,
                current: matrix.version(),
            });
        }
        Ok(())
    }

    /// Haplotype ordering of column `site` (sites `[0, site)` sorted)
    pub fn ordering(&self, site: usize) -> &[u32] {
        let offset = site * self.n_haps;
        &self.ordering[offset..offset + self.n_haps]
    }

    /// Match lengths of column `site`, parallel to [`ordering`](Self::ordering)
    pub fn divergence(&self, site: usize) -> &[u32] {
        let offset = site * self.n_haps;
        &self.divergence[offset..offset + self.n_haps]
    }

    /// Sorted position of `hap` in column `site`
    pub fn position(&self, site: usize, hap: HapIdx) -> usize {
        self.positions[site * self.n_haps + hap.as_usize()] as usize
    }

    /// Up to `k` nearest haplotypes for each copy of `sample` at `site`
    ///
    /// Returns fewer than `k` per copy only when the panel has fewer eligible
    /// haplotypes; the sample's own two haplotypes are never returned.
    pub fn neighbors(&self, sample: SampleIdx, site: usize, k: usize) -> Result<Neighbors> {
        if site >= self.n_sites.max(1) {
            return Err(PhaseError::invalid_data(format!(
                "site {} out of range ({} sites)",
                site, self.n_sites
            )));
        }
        if sample.hap2().as_usize() >= self.n_haps {
            return Err(PhaseError::invalid_data(format!(
                "sample {} has no haplotypes in a panel of {}",
                sample, self.n_haps
            )));
        }
        let mut out = Neighbors::default();
        for copy in 0..2 {
            self.neighbors_of(sample, sample.hap(copy), site, k, &mut out.copies[copy]);
        }
        Ok(out)
    }

    /// Up to `k` haplotypes nearest `target` at `site`, ordered by match length
    /// (longest first) and then by haplotype id. Callers check the ranges.
    pub(crate) fn neighbors_of(
        &self,
        sample: SampleIdx,
        target: HapIdx,
        site: usize,
        k: usize,
        out: &mut Vec<HapIdx>,
    ) {
        nearest(
            self.ordering(site),
            self.divergence(site),
            self.position(site, target),
            k,
            |hap| !sample.owns(HapIdx::new(hap)),
            out,
        );
    }

    /// Match length between two haplotypes in column `site`
    pub fn match_length(&self, site: usize, a: HapIdx, b: HapIdx) -> u32 {
        let (pa, pb) = (self.position(site, a), self.position(site, b));
        if pa == pb {
            return site as u32;
        }
        let (lo, hi) = (pa.min(pb), pa.max(pb));
        self.divergence(site)[lo + 1..=hi]
            .iter()
            .copied()
            .min()
            .unwrap_or(0)
    }
}

/// Up to `k` eligible haplotypes nearest sorted position `pos` of one column, ordered
/// by match length (longest first) and then by haplotype id. `lengths[i]` is the
/// match length between sorted positions `i - 1` and `i`.
pub(crate) fn nearest<F>(
    ordering: &[u32],
    lengths: &[u32],
    pos: usize,
    k: usize,
    eligible: F,
    out: &mut Vec<HapIdx>,
) where
    F: Fn(u32) -> bool,
{
    out.clear();
    if k == 0 {
        return;
    }
    let n_haps = ordering.len();

    // Next candidate above is ordering[up - 1], below is ordering[down]. Taking the
    // longer frontier each step visits match lengths in non-increasing order, so
    // once k are found only the ties with the k-th remain to be collected.
    let mut up = pos;
    let mut down = pos + 1;
    let mut up_len = u32::MAX;
    let mut down_len = u32::MAX;
    let mut found: Vec<(u32, u32)> = Vec::with_capacity(2 * k);
    let mut floor: Option<u32> = None;

    loop {
        let up_next = (up > 0).then(|| up_len.min(lengths[up]));
        let down_next = (down < n_haps).then(|| down_len.min(lengths[down]));
        let (len, hap) = match (up_next, down_next) {
            (Some(lu), Some(ld)) if lu >= ld => {
                up_len = lu;
                up -= 1;
                (lu, ordering[up])
            }
            (Some(lu), None) => {
                up_len = lu;
                up -= 1;
                (lu, ordering[up])
            }
            (_, Some(ld)) => {
                down_len = ld;
                down += 1;
                (ld, ordering[down - 1])
            }
            (None, None) => break,
        };
        if floor.is_some_and(|f| len < f) {
            break;
        }
        if !eligible(hap) {
            continue;
        }
        found.push((len, hap));
        if found.len() == k {
            floor = Some(len);
        }
    }

    found.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    out.extend(found.iter().take(k).map(|&(_, hap)| HapIdx::new(hap)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::matrix::BitMatrix;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(seed: u64, n_sites: usize, n_haps: usize) -> BitMatrix {
        let mut rng = SmallRng::seed_from_u64(seed);
        let haps: Vec<Vec<u8>> = (0..n_haps)
            .map(|_| (0..n_sites).map(|_| u8::from(rng.random::<f64>() < 0.3)).collect())
            .collect();
        BitMatrix::from_haplotypes(&haps, n_haps - n_haps % 2).unwrap()
    }

    fn brute_match(m: &BitMatrix, site: usize, a: u32, b: u32) -> u32 {
        let mut len = 0;
        while len < site {
            let s = site - 1 - len;
            if m.allele(s, HapIdx::new(a)) != m.allele(s, HapIdx::new(b)) {
                break;
            }
            len += 1;
        }
        len as u32
    }

    #[test]
    fn test_orderings_are_permutations() {
        let m = random_matrix(1, 30, 17);
        let index = PrefixIndex::build(&m);
        for site in 0..=30 {
            let mut seen = vec![false; 17];
            for &h in index.ordering(site) {
                assert!(!seen[h as usize]);
                seen[h as usize] = true;
            }
            assert!(seen.iter().all(|&s| s));
        }
        assert_eq!(index.ordering(0), (0..17).collect::<Vec<u32>>().as_slice());
    }

    #[test]
    fn test_divergence_matches_brute_force() {
        for seed in 0..5 {
            let m = random_matrix(seed, 25, 12);
            let index = PrefixIndex::build(&m);
            for site in 0..=25 {
                let ord = index.ordering(site);
                let div = index.divergence(site);
                assert_eq!(div[0], 0);
                for i in 1..ord.len() {
                    assert_eq!(
                        div[i],
                        brute_match(&m, site, ord[i - 1], ord[i]),
                        "seed {seed} site {site} position {i}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_sorted_by_reversed_prefix() {
        let m = random_matrix(9, 20, 10);
        let index = PrefixIndex::build(&m);
        let site = 20;
        let key = |h: u32| -> Vec<u8> {
            (0..site).rev().map(|s| m.allele(s, HapIdx::new(h))).collect()
        };
        let ord = index.ordering(site);
        for w in ord.windows(2) {
            assert!(key(w[0]) <= key(w[1]));
        }
    }

    #[test]
    fn test_stable_for_ties() {
        // Identical haplotypes keep their initial relative order
        let haps = vec![vec![1, 0, 1], vec![1, 0, 1], vec![0, 0, 0], vec![1, 0, 1]];
        let m = BitMatrix::from_haplotypes(&haps, 4).unwrap();
        let index = PrefixIndex::build(&m);
        assert_eq!(index.ordering(3), &[2, 0, 1, 3]);
        assert_eq!(index.divergence(3), &[0, 0, 3, 3]);
    }

    #[test]
    fn test_neighbors_longest_match_first() {
        let m = random_matrix(3, 40, 24);
        let index = PrefixIndex::build(&m);
        let sample = SampleIdx::new(2);
        let site = 30;
        let n = index.neighbors(sample, site, 6).unwrap();
        for copy in 0..2 {
            let target = sample.hap(copy);
            let got = n.copy(copy);
            assert_eq!(got.len(), 6);
            assert!(got.iter().all(|&h| !sample.owns(h)));

            // Every returned haplotype matches at least as long as every eligible
            // haplotype that was left out.
            let worst = got
                .iter()
                .map(|&h| brute_match(&m, site, target.0, h.0))
                .min()
                .unwrap();
            for h in 0..24u32 {
                let h = HapIdx::new(h);
                if sample.owns(h) || got.contains(&h) {
                    continue;
                }
                assert!(brute_match(&m, site, target.0, h.0) <= worst);
            }
            for &h in got {
                assert_eq!(
                    index.match_length(site, target, h),
                    brute_match(&m, site, target.0, h.0)
                );
            }
        }
    }

    #[test]
    fn test_neighbors_ordered_by_length_then_id() {
        for seed in 0..20 {
            // Few distinct alleles so many haplotypes tie on match length
            let m = random_matrix(100 + seed, 12, 40);
            let index = PrefixIndex::build(&m);
            for sample in [0u32, 7, 19] {
                let sample = SampleIdx::new(sample);
                for site in [0, 3, 8, 11] {
                    let n = index.neighbors(sample, site, 4).unwrap();
                    for copy in 0..2 {
                        let target = sample.hap(copy);
                        let mut want: Vec<(u32, u32)> = (0..40u32)
                            .filter(|&h| !sample.owns(HapIdx::new(h)))
                            .map(|h| (brute_match(&m, site, target.0, h), h))
                            .collect();
                        want.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
                        let want: Vec<HapIdx> =
                            want.iter().take(4).map(|&(_, h)| HapIdx::new(h)).collect();
                        assert_eq!(n.copy(copy), want.as_slice(), "seed {seed} site {site}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_neighbors_small_panel() {
        let m = random_matrix(4, 10, 6);
        let index = PrefixIndex::build(&m);
        let n = index.neighbors(SampleIdx::new(0), 5, 8).unwrap();
        assert_eq!(n.copy(0).len(), 4);
        assert_eq!(n.copy(1).len(), 4);
    }

    #[test]
    fn test_neighbors_out_of_range() {
        let m = random_matrix(4, 10, 6);
        let index = PrefixIndex::build(&m);
        assert!(index.neighbors(SampleIdx::new(0), 10, 2).is_err());
        assert!(index.neighbors(SampleIdx::new(3), 0, 2).is_err());
    }

    #[test]
    fn test_stale_index_detected() {
        let mut m = random_matrix(5, 10, 6);
        let index = PrefixIndex::build(&m);
        assert!(index.ensure_current(&m).is_ok());
        m.set_haplotype(HapIdx::new(4), &[1; 10]).unwrap();
        assert!(matches!(
            index.ensure_current(&m),
            Err(PhaseError::StaleIndex { .. })
        ));
    }
}
