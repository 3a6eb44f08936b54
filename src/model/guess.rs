//! # Initial Haplotype Guess
//!
//! ## Role
//! One left-to-right PBWT sweep that replaces the unphased defaults before the
//! first iteration. At every site each het and missing call is decided by a vote of
//! the nearest haplotypes of each chromosome copy.
//!
//! ## Rules
//! - Only haplotypes whose allele at the site is certain vote: reference
//!   haplotypes and samples with a homozygous call there.
//! - A het goes 1|0 when copy 0's neighbours carry the alternate allele more often
//!   than copy 1's, 0|1 when less often, and keeps its current phase on a tie.
//! - A missing copy takes the majority allele of its neighbours (ref on a tie).
//! - Guessed alleles feed the sort of the following sites, so each copy keeps
//!   following the haplotypes it matched so far.

use bitvec::prelude::*;

use crate::data::haplotype::HapIdx;
use crate::data::matrix::HaplotypeMatrix;
use crate::error::{PhaseError, Result};
use crate::model::genotype::{Genotype, VariantKind};
use crate::model::pbwt::{nearest, PbwtDivUpdater};

/// Guessed haplotypes of every genotype in `genotypes`, in the same order
///
/// `matrix` supplies the reference haplotypes and the alleles of samples that are
/// not being guessed; the listed samples start from [`Genotype::haplotypes`].
pub fn initial_guess<M: HaplotypeMatrix + ?Sized>(
    matrix: &M,
    genotypes: &[&Genotype],
    k: usize,
) -> Result<Vec<[Vec<u8>; 2]>> {
    let _span = tracing::info_span!("initial_guess", n_samples = genotypes.len()).entered();

    let n_sites = matrix.site_count();
    let n_haps = matrix.haplotype_count();
    let mut owner: Vec<Option<(usize, usize)>> = vec![None; n_haps];
    for (i, g) in genotypes.iter().enumerate() {
        let sample = g.sample_idx();
        if sample.hap2().as_usize() >= n_haps || g.n_sites() != n_sites {
            return Err(PhaseError::invalid_data(format!(
                "sample {} with {} sites does not fit a panel of {} haplotypes and {} sites",
                sample,
                g.n_sites(),
                n_haps,
                n_sites
            )));
        }
        for copy in 0..2 {
            owner[sample.hap(copy).as_usize()] = Some((i, copy));
        }
    }

    let mut haps: Vec<[Vec<u8>; 2]> = genotypes.iter().map(|g| g.haplotypes()).collect();
    let mut ppa: Vec<u32> = (0..n_haps as u32).collect();
    let mut starts = vec![0u32; n_haps];
    let mut lengths = vec![0u32; n_haps];
    let mut positions = vec![0usize; n_haps];
    let mut column = vec![0u8; n_haps];
    let mut certain: BitVec<u64, Lsb0> = bitvec![u64, Lsb0; 0; n_haps];
    let mut updater = PbwtDivUpdater::new(n_haps);
    let mut near = Vec::with_capacity(k);
    let mut n_guessed = 0usize;

    for site in 0..n_sites {
        for h in 0..n_haps {
            let (allele, known) = match owner[h] {
                Some((i, copy)) => (
                    haps[i][copy][site],
                    genotypes[i].variants()[site].kind() == VariantKind::Hom,
                ),
                None => (matrix.allele(site, HapIdx::new(h as u32)), true),
            };
            column[h] = allele;
            certain.set(h, known);
        }
        for (i, (&hap, &start)) in ppa.iter().zip(&starts).enumerate() {
            lengths[i] = if i == 0 { 0 } else { site as u32 - start.min(site as u32) };
            positions[hap as usize] = i;
        }

        for (i, g) in genotypes.iter().enumerate() {
            let kind = g.variants()[site].kind();
            if !matches!(kind, VariantKind::Het | VariantKind::Missing) {
                continue;
            }
            let sample = g.sample_idx();
            let mut alt_freq: [Option<f64>; 2] = [None; 2];
            for (copy, freq) in alt_freq.iter_mut().enumerate() {
                let pos = positions[sample.hap(copy).as_usize()];
                nearest(&ppa, &lengths, pos, k, |h| certain[h as usize], &mut near);
                if !near.is_empty() {
                    let alt = near.iter().filter(|h| column[h.as_usize()] == 1).count();
                    *freq = Some(alt as f64 / near.len() as f64);
                }
            }

            let current = [haps[i][0][site], haps[i][1][site]];
            let alleles = if kind == VariantKind::Het {
                let lean = alt_freq[0].unwrap_or(0.5) - alt_freq[1].unwrap_or(0.5);
                if lean > 0.0 {
                    [1, 0]
                } else if lean < 0.0 {
                    [0, 1]
                } else {
                    current
                }
            } else {
                alt_freq.map(|f| u8::from(f.is_some_and(|f| f > 0.5)))
            };
            for copy in 0..2 {
                haps[i][copy][site] = alleles[copy];
                column[sample.hap(copy).as_usize()] = alleles[copy];
            }
            n_guessed += 1;
        }

        updater.fwd_update(site, &mut ppa, &mut starts, |hap| column[hap as usize]);
    }

    tracing::debug!(n_guessed, "initial guess");
    Ok(haps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::calls::{Call, PhaseConstraint};
    use crate::data::haplotype::SampleIdx;
    use crate::data::matrix::BitMatrix;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn truth_genotypes(truth: &BitMatrix, n_samples: u32) -> Vec<Genotype> {
        (0..n_samples)
            .map(|s| {
                let sample = SampleIdx::new(s);
                let h0 = truth.haplotype(sample.hap1());
                let h1 = truth.haplotype(sample.hap2());
                let calls = h0.iter().zip(&h1).map(|(&a, &b)| Call::from_alleles(a, b)).collect();
                Genotype::new(sample, calls, Vec::new()).unwrap()
            })
            .collect()
    }

    /// Switch errors of `haps` against the truth over consecutive het pairs
    fn switch_errors(truth: &BitMatrix, sample: SampleIdx, haps: &[Vec<u8>; 2]) -> usize {
        let t0 = truth.haplotype(sample.hap1());
        let t1 = truth.haplotype(sample.hap2());
        let mut prev: Option<bool> = None;
        let mut errors = 0;
        for site in 0..t0.len() {
            if t0[site] == t1[site] {
                continue;
            }
            let flip = haps[0][site] != t0[site];
            if let Some(p) = prev {
                errors += usize::from(p != flip);
            }
            prev = Some(flip);
        }
        errors
    }

    #[test]
    fn test_guess_beats_unphased_default() {
        let mut rng = SmallRng::seed_from_u64(31);
        let truth = BitMatrix::random_mosaic(300, 40, 80, 6, 0.01, &mut rng);
        let genotypes = truth_genotypes(&truth, 20);
        let mut matrix = truth.clone();
        for g in &genotypes {
            let [h0, h1] = g.haplotypes();
            matrix.set_sample(g.sample_idx(), [&h0, &h1]).unwrap();
        }

        let refs: Vec<&Genotype> = genotypes.iter().collect();
        let guessed = initial_guess(&matrix, &refs, 8).unwrap();

        let (mut guess_errors, mut default_errors) = (0, 0);
        for (g, haps) in genotypes.iter().zip(&guessed) {
            for (site, call) in g.calls().iter().enumerate() {
                assert!(call.accepts(haps[0][site], haps[1][site]));
            }
            guess_errors += switch_errors(&truth, g.sample_idx(), haps);
            default_errors += switch_errors(&truth, g.sample_idx(), &g.haplotypes());
        }
        assert!(
            guess_errors < default_errors,
            "guess {guess_errors} vs default {default_errors}"
        );
    }

    #[test]
    fn test_missing_calls_follow_neighbours() {
        // Reference haplotypes all carry the alternate allele at site 2
        let mut haps = vec![vec![0, 1, 0, 1], vec![0, 1, 0, 1]];
        haps.extend(std::iter::repeat(vec![0, 1, 1, 1]).take(4));
        let matrix = BitMatrix::from_haplotypes(&haps, 2).unwrap();
        let calls = vec![Call::HomRef, Call::HomAlt, Call::Missing, Call::HomAlt];
        let g = Genotype::new(SampleIdx::new(0), calls, Vec::new()).unwrap();

        let guessed = initial_guess(&matrix, &[&g], 4).unwrap();
        assert_eq!(guessed[0], [vec![0, 1, 1, 1], vec![0, 1, 1, 1]]);
    }

    #[test]
    fn test_scaffold_and_hom_sites_untouched() {
        let mut rng = SmallRng::seed_from_u64(2);
        let truth = BitMatrix::random_mosaic(30, 4, 10, 3, 0.05, &mut rng);
        let sample = SampleIdx::new(1);
        let calls = vec![Call::Het; 30];
        let constraints = vec![PhaseConstraint::new(1, 4, 1, 0)];
        let g = Genotype::new(sample, calls, constraints).unwrap();
        let guessed = initial_guess(&truth, &[&g], 8).unwrap();
        assert_eq!((guessed[0][0][4], guessed[0][1][4]), (1, 0));
        assert!(guessed[0][0].iter().zip(&guessed[0][1]).all(|(a, b)| a != b));
    }

    #[test]
    fn test_rejects_sample_outside_panel() {
        let matrix = BitMatrix::new(5, 2, 2);
        let g = Genotype::new(SampleIdx::new(3), vec![Call::Het; 5], Vec::new()).unwrap();
        assert!(initial_guess(&matrix, &[&g], 4).is_err());
    }
}
