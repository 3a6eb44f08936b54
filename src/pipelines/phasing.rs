//! # Phasing Pipeline
//!
//! Orchestrates the phasing workflow over a panel held in a [`BitMatrix`]:
//! 1. Validate every sample's calls and constraints; write an initial PBWT guess
//!    of every sample's haplotypes into the matrix
//! 2. Build the prefix index from the current matrix
//! 3. For every sample in parallel: select conditioning haplotypes, segment (per
//!    site when merging is enabled), run forward-backward, orient phase blocks,
//!    merge and prune when enabled, then sample (burn-in), sample and store (main)
//!    or solve (last iteration)
//! 4. Write the new haplotypes back into the matrix (new version) and iterate
//! 5. Mask low-confidence sites and report the phased samples
//!
//! A sample whose calls are structurally inconsistent keeps its unphased default; a
//! stale index aborts the run.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{info_span, instrument};

use crate::data::calls::SampleCalls;
use crate::data::genetic_map::RecombinationModel;
use crate::data::haplotype::SampleIdx;
use crate::data::matrix::{BitMatrix, HaplotypeMatrix};
use crate::error::{PhaseError, Result};
use crate::model::conditioning::Conditioning;
use crate::model::genotype::Genotype;
use crate::model::guess::initial_guess;
use crate::model::hmm::ForwardBackward;
use crate::model::parameters::ModelParams;
use crate::model::pbwt::PrefixIndex;
use crate::utils::telemetry::{Progress, Stage};

/// Final result for one sample
#[derive(Clone, Debug, PartialEq)]
pub struct PhasedSample {
    pub sample: SampleIdx,
    /// Alleles of chromosome copy 0 and copy 1
    pub haplotypes: [Vec<u8>; 2],
    /// Ambiguous sites whose stored confidence stayed below the mask threshold
    pub unresolved_sites: Vec<usize>,
    /// Sites no pair of conditioning haplotypes reproduced in the last iteration
    pub unexplained_sites: usize,
    /// The sample kept its unphased default after a structural inconsistency
    pub fallback: bool,
}

/// Per-sample working state across iterations
struct SampleWork {
    sample: SampleIdx,
    genotype: Option<Genotype>,
    default: [Vec<u8>; 2],
}

/// Phasing pipeline
pub struct PhasingPipeline<R: RecombinationModel> {
    params: ModelParams,
    recomb: R,
    progress: Arc<Progress>,
}

impl<R: RecombinationModel> PhasingPipeline<R> {
    pub fn new(params: ModelParams, recomb: R) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            recomb,
            progress: Arc::new(Progress::new(0, 0)),
        })
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Counters of the most recent run
    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    /// Phase `samples` (sample `s` owns haplotypes `2s`, `2s + 1` of `matrix`)
    ///
    /// On return the matrix holds the final haplotypes of every sample.
    #[instrument(skip_all, fields(n_samples, n_sites))]
    pub fn run(&mut self, matrix: &mut BitMatrix, samples: &[SampleCalls]) -> Result<Vec<PhasedSample>> {
        let n_sites = matrix.site_count();
        tracing::Span::current().record("n_samples", samples.len());
        tracing::Span::current().record("n_sites", n_sites);

        if samples.len() > matrix.n_samples() {
            return Err(PhaseError::invalid_data(format!(
                "{} samples but the matrix holds main haplotypes for {}",
                samples.len(),
                matrix.n_samples()
            )));
        }
        if let Some((s, bad)) = samples
            .iter()
            .enumerate()
            .find(|(_, c)| c.calls.len() != n_sites)
        {
            return Err(PhaseError::invalid_data(format!(
                "sample {} has {} calls but the matrix has {} sites",
                s,
                bad.calls.len(),
                n_sites
            )));
        }

        let n_iterations = self.params.n_iterations().max(1);
        let progress = Arc::new(Progress::new(samples.len(), n_iterations));
        self.progress = Arc::clone(&progress);

        let mut work = info_span!("init_genotypes").in_scope(|| self.init_samples(matrix, samples))?;

        for iteration in 0..n_iterations {
            let burnin = iteration < self.params.burnin;
            let last = iteration + 1 == n_iterations;
            progress.start_iteration(iteration + 1);

            progress.set_stage(Stage::Indexing);
            let index = Arc::new(info_span!("pbwt_index").in_scope(|| PrefixIndex::build(&*matrix)));

            progress.set_stage(if burnin {
                Stage::PhasingBurnin
            } else {
                Stage::PhasingMain
            });
            let shared: &BitMatrix = matrix;
            let results: Vec<Result<()>> = info_span!("phase_samples", iteration).in_scope(|| {
                work.par_iter_mut()
                    .map(|w| match w.genotype.as_mut() {
                        Some(g) => {
                            let out = self.phase_sample(g, &index, shared, iteration, burnin, last);
                            if out.is_ok() {
                                progress.sample_done(g.segments().len());
                            }
                            out
                        }
                        None => Ok(()),
                    })
                    .collect()
            });

            for (w, result) in work.iter_mut().zip(results) {
                if let Err(e) = result {
                    if !e.is_sample_local() {
                        return Err(e);
                    }
                    tracing::warn!(sample = w.sample.0, error = %e, "keeping unphased genotypes");
                    w.genotype = None;
                    progress.fallback();
                }
            }

            info_span!("write_back").in_scope(|| -> Result<()> {
                for w in &work {
                    match &w.genotype {
                        Some(g) => {
                            let [h0, h1] = g.haplotypes();
                            matrix.set_sample(w.sample, [&h0, &h1])?;
                        }
                        None => matrix.set_sample(w.sample, [&w.default[0], &w.default[1]])?,
                    }
                }
                Ok(())
            })?;
            progress.report();
        }

        progress.set_stage(Stage::Finalizing);
        let threshold = self.params.mask_threshold;
        let phased = work
            .into_iter()
            .map(|w| match w.genotype {
                Some(mut g) => {
                    g.mask(threshold);
                    let unresolved_sites = g
                        .ambiguous()
                        .iter()
                        .copied()
                        .filter(|&site| !g.is_resolved(site))
                        .collect();
                    PhasedSample {
                        sample: w.sample,
                        haplotypes: g.haplotypes(),
                        unresolved_sites,
                        unexplained_sites: g.unexplained_sites(),
                        fallback: false,
                    }
                }
                None => PhasedSample {
                    sample: w.sample,
                    haplotypes: w.default,
                    unresolved_sites: Vec::new(),
                    unexplained_sites: 0,
                    fallback: true,
                },
            })
            .collect();
        progress.set_stage(Stage::Complete);
        Ok(phased)
    }

    fn init_samples(&self, matrix: &mut BitMatrix, samples: &[SampleCalls]) -> Result<Vec<SampleWork>> {
        let mut work = Vec::with_capacity(samples.len());
        for (s, calls) in samples.iter().enumerate() {
            let sample = SampleIdx::from(s);
            let default = calls.default_haplotypes();
            matrix.set_sample(sample, [&default[0], &default[1]])?;
            let genotype = match Genotype::new(sample, calls.calls.clone(), calls.constraints.clone()) {
                Ok(g) => Some(g),
                Err(e) if e.is_sample_local() => {
                    tracing::warn!(sample = s, error = %e, "keeping unphased genotypes");
                    self.progress.fallback();
                    None
                }
                Err(e) => return Err(e),
            };
            work.push(SampleWork {
                sample,
                genotype,
                default,
            });
        }

        let genotypes: Vec<&Genotype> = work.iter().filter_map(|w| w.genotype.as_ref()).collect();
        let guessed = initial_guess(&*matrix, &genotypes, self.params.k)?;
        for (g, [h0, h1]) in genotypes.iter().zip(&guessed) {
            matrix.set_sample(g.sample_idx(), [h0, h1])?;
        }
        Ok(work)
    }

    /// One iteration for one sample
    fn phase_sample(
        &self,
        g: &mut Genotype,
        index: &PrefixIndex,
        matrix: &BitMatrix,
        iteration: usize,
        burnin: bool,
        last: bool,
    ) -> Result<()> {
        let cond = Conditioning::select(index, matrix, g.sample_idx(), self.params.k)?;
        if self.params.merge_threshold > 0.0 {
            g.build_sites(&cond)?;
        } else {
            g.build(&cond)?;
        }
        let fb = self.refine(g, &cond)?;

        let mut rng = SmallRng::seed_from_u64(sample_seed(self.params.seed, g.sample_idx(), iteration));
        let pass = if last {
            g.solve(&fb)?
        } else if iteration == 0 {
            g.sample(&fb, &mut rng)?
        } else if iteration % 2 == 1 {
            g.sample_forward(&fb, &mut rng)?
        } else {
            g.sample_backward(&fb, &mut rng)?
        };
        if !burnin {
            g.store(&pass.posteriors)?;
        }

        tracing::debug!(
            sample = g.sample_idx().0,
            iteration,
            segments = g.segments().len(),
            transitions = g.transition_count(),
            "sample pass"
        );
        Ok(())
    }

    /// Forward-backward, then block orientation and one merge/prune round when
    /// they apply
    fn refine(&self, g: &mut Genotype, cond: &Conditioning) -> Result<ForwardBackward> {
        let mut fb = g.forward_backward(&self.recomb, &self.params)?;
        if !g.phase_blocks().is_empty() {
            let flipped = g.orient_blocks(cond, fb.posteriors())?;
            tracing::trace!(sample = g.sample_idx().0, flipped, "oriented phase blocks");
            fb = g.forward_backward(&self.recomb, &self.params)?;
        }
        if self.params.merge_threshold <= 0.0 && self.params.prune_floor <= 0.0 {
            return Ok(fb);
        }

        let mut posteriors = fb.posteriors().clone();
        let mut changed = false;
        if self.params.merge_threshold > 0.0 {
            let flags = g.map_merges(&posteriors, self.params.merge_threshold);
            if flags.any() {
                changed |= g.perform_merges(&mut posteriors, &flags)? > 0;
            }
        }
        if self.params.prune_floor > 0.0 {
            changed |= g.prune(&posteriors, self.params.prune_floor)? > 0;
        }
        if changed {
            g.forward_backward(&self.recomb, &self.params)
        } else {
            Ok(fb)
        }
    }
}

/// RNG seed of one sample in one iteration
fn sample_seed(seed: u64, sample: SampleIdx, iteration: usize) -> u64 {
    seed.wrapping_add(sample.0 as u64)
        .wrapping_add((iteration as u64) << 32)
        .wrapping_add(0xA5A5_5A5A_D00Du64)
}
