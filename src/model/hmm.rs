//! # Segment Hidden Markov Model
//!
//! Forward-backward recursion over the segments of one [`Genotype`], followed by the
//! path choices that resolve phase and missing alleles.
//!
//! ## Key Concepts
//! - `States`: diplotypes `(hap0, hap1)`, at most 64 per segment, only those in the
//!   segment's mask have non-zero emission
//! - `Transitions`: each chromosome copy keeps its slot with probability `1 - r` or
//!   jumps to a uniformly chosen slot with probability `r`; the two copies switch
//!   independently so the 64 x 64 transition factorises
//! - `Emissions`: 1 inside the mask, 0 outside
//!
//! ## Fast transition
//! With `p` the previous row, `Row(h0) = sum_h1 p(h0, h1)`, `Col(h1) = sum_h0 p(h0, h1)`:
//!
//! ```text
//! q(h0, h1) = (1-r)^2 p(h0, h1) + (1-r)(r/n1) Row(h0) + (1-r)(r/n0) Col(h1)
//!           + r^2 / (n0 n1) * sum(p)
//! ```
//!
//! The transition is symmetric, so the same update runs the backward pass.

use rand::Rng;

use crate::data::genetic_map::RecombinationModel;
use crate::error::{PhaseError, Result};
use crate::model::genotype::Genotype;
use crate::model::parameters::ModelParams;
use crate::model::states::{Diplotype, StateSet, N_SLOTS, N_STATES};

/// Posterior state probabilities, one 64-entry row per segment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Posteriors {
    rows: Vec<[f64; N_STATES]>,
}

impl Posteriors {
    pub fn from_rows(rows: Vec<[f64; N_STATES]>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    pub fn row(&self, segment: usize) -> &[f64; N_STATES] {
        &self.rows[segment]
    }

    pub fn rows(&self) -> &[[f64; N_STATES]] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut Vec<[f64; N_STATES]> {
        &mut self.rows
    }
}

/// Factorised transition between two consecutive segments
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    stay: f64,
    jump: [f64; 2],
    n_slots: [usize; 2],
}

impl Transition {
    pub fn new(switch_prob: f64, n_slots: [usize; 2]) -> Self {
        let n0 = n_slots[0].clamp(1, N_SLOTS);
        let n1 = n_slots[1].clamp(1, N_SLOTS);
        Self {
            stay: 1.0 - switch_prob,
            jump: [switch_prob / n0 as f64, switch_prob / n1 as f64],
            n_slots: [n0, n1],
        }
    }

    /// Per-copy probability of moving from slot `from` to slot `to`
    #[inline]
    pub fn copy_prob(&self, copy: usize, from: usize, to: usize) -> f64 {
        let stay = if from == to { self.stay } else { 0.0 };
        stay + self.jump[copy]
    }

    #[inline]
    pub fn prob(&self, from: Diplotype, to: Diplotype) -> f64 {
        self.copy_prob(0, from.hap0(), to.hap0()) * self.copy_prob(1, from.hap1(), to.hap1())
    }

    /// `out(b) = sum_a p(a) T(a -> b)` over the valid states
    pub fn apply(&self, p: &[f64; N_STATES], out: &mut [f64; N_STATES]) {
        let [n0, n1] = self.n_slots;
        let mut row = [0.0f64; N_SLOTS];
        let mut col = [0.0f64; N_SLOTS];
        let mut total = 0.0;
        for h0 in 0..n0 {
            for h1 in 0..n1 {
                let v = p[h0 * N_SLOTS + h1];
                row[h0] += v;
                col[h1] += v;
                total += v;
            }
        }

        let s = self.stay;
        let [j0, j1] = self.jump;
        let both = j0 * j1 * total;
        out.fill(0.0);
        for h0 in 0..n0 {
            for h1 in 0..n1 {
                let i = h0 * N_SLOTS + h1;
                out[i] = s * s * p[i] + s * j1 * row[h0] + s * j0 * col[h1] + both;
            }
        }
    }
}

/// Result of one forward-backward recursion
#[derive(Clone, Debug)]
pub struct ForwardBackward {
    masks: Vec<StateSet>,
    /// `transitions[i]` leads from segment `i - 1` into segment `i`
    transitions: Vec<Transition>,
    alpha: Vec<[f64; N_STATES]>,
    beta: Vec<[f64; N_STATES]>,
    posteriors: Posteriors,
}

impl ForwardBackward {
    pub fn n_segments(&self) -> usize {
        self.masks.len()
    }

    pub fn alpha(&self, segment: usize) -> &[f64; N_STATES] {
        &self.alpha[segment]
    }

    pub fn beta(&self, segment: usize) -> &[f64; N_STATES] {
        &self.beta[segment]
    }

    pub fn transition(&self, segment: usize) -> &Transition {
        &self.transitions[segment]
    }

    pub fn posteriors(&self) -> &Posteriors {
        &self.posteriors
    }

    pub fn into_posteriors(self) -> Posteriors {
        self.posteriors
    }
}

/// A chosen path, one diplotype per segment, with the posteriors it came from
#[derive(Clone, Debug)]
pub struct Pass {
    pub path: Vec<Diplotype>,
    pub posteriors: Posteriors,
}

/// Normalise `row` to sum 1; returns the sum before normalisation
fn normalize(row: &mut [f64; N_STATES]) -> f64 {
    let sum: f64 = row.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        let inv = 1.0 / sum;
        row.iter_mut().for_each(|v| *v *= inv);
    }
    sum
}

/// Restrict `src` to `mask` into `dst`
#[inline]
fn restrict(src: &[f64; N_STATES], mask: StateSet, dst: &mut [f64; N_STATES]) {
    dst.fill(0.0);
    for dip in mask.iter() {
        dst[dip.index()] = src[dip.index()];
    }
}

/// Draw a state of `mask` proportionally to `weights`
pub fn sample_from_weights<R: Rng + ?Sized>(
    weights: &[f64; N_STATES],
    mask: StateSet,
    rng: &mut R,
) -> Diplotype {
    let total: f64 = mask.iter().map(|d| weights[d.index()]).sum();
    if !(total > 0.0 && total.is_finite()) {
        let pick = rng.random_range(0..mask.popcount().max(1));
        return mask.iter().nth(pick).unwrap_or_default();
    }

    let mut threshold = rng.random::<f64>() * total;
    let mut last = Diplotype::default();
    for dip in mask.iter() {
        let w = weights[dip.index()];
        if threshold < w {
            return dip;
        }
        threshold -= w;
        if w > 0.0 {
            last = dip;
        }
    }
    last
}

impl Genotype {
    /// Alpha, beta and posterior rows over the current segments
    pub fn forward_backward<R: RecombinationModel + ?Sized>(
        &self,
        recomb: &R,
        params: &ModelParams,
    ) -> Result<ForwardBackward> {
        let segments = self.segments();
        let n = segments.len();
        let n_slots = self.slot_counts();
        let masks: Vec<StateSet> = segments.iter().map(|s| s.mask).collect();

        let transitions: Vec<Transition> = (0..n)
            .map(|i| {
                if i == 0 {
                    return Transition::new(0.0, n_slots);
                }
                let prev = &segments[i - 1];
                let r = recomb.recombination_prob(prev.start, prev.length);
                let r = if r.is_nan() {
                    params.min_recomb
                } else {
                    r.clamp(params.min_recomb, 1.0)
                };
                Transition::new(r, n_slots)
            })
            .collect();

        let mut alpha = vec![[0.0f64; N_STATES]; n];
        let mut beta = vec![[0.0f64; N_STATES]; n];
        let mut post = vec![[0.0f64; N_STATES]; n];
        let mut tmp = [0.0f64; N_STATES];

        for i in 0..n {
            if i == 0 {
                for dip in masks[0].iter() {
                    alpha[0][dip.index()] = 1.0;
                }
            } else {
                transitions[i].apply(&alpha[i - 1], &mut tmp);
                restrict(&tmp, masks[i], &mut alpha[i]);
            }
            let sum = normalize(&mut alpha[i]);
            if !(sum > 0.0 && sum.is_finite()) {
                return Err(self.zero_row("forward", segments[i].start));
            }
        }

        for i in (0..n).rev() {
            if i + 1 == n {
                for dip in masks[i].iter() {
                    beta[i][dip.index()] = 1.0;
                }
            } else {
                transitions[i + 1].apply(&beta[i + 1], &mut tmp);
                restrict(&tmp, masks[i], &mut beta[i]);
            }
            let sum = normalize(&mut beta[i]);
            if !(sum > 0.0 && sum.is_finite()) {
                return Err(self.zero_row("backward", segments[i].start));
            }
        }

        for i in 0..n {
            for dip in masks[i].iter() {
                let d = dip.index();
                post[i][d] = alpha[i][d] * beta[i][d];
            }
            let sum = normalize(&mut post[i]);
            if !(sum > 0.0 && sum.is_finite()) {
                return Err(self.zero_row("posterior", segments[i].start));
            }
        }

        Ok(ForwardBackward {
            masks,
            transitions,
            alpha,
            beta,
            posteriors: Posteriors::from_rows(post),
        })
    }

    fn zero_row(&self, pass: &str, site: usize) -> PhaseError {
        PhaseError::structural(
            self.sample_idx().0,
            format!("all-zero {pass} row at segment starting at site {site}"),
        )
    }

    fn check_segments(&self, fb: &ForwardBackward) -> Result<()> {
        let same = fb.masks.len() == self.segments().len()
            && fb
                .masks
                .iter()
                .zip(self.segments())
                .all(|(m, s)| *m == s.mask);
        if !same {
            return Err(PhaseError::invalid_data(format!(
                "recursion for sample {} ran over a different segmentation",
                self.sample_idx()
            )));
        }
        Ok(())
    }

    fn finish(&mut self, path: Vec<Diplotype>, fb: &ForwardBackward) -> Pass {
        self.apply_path(&path, &fb.posteriors);
        Pass {
            path,
            posteriors: fb.posteriors.clone(),
        }
    }

    /// Maximum-posterior state per segment (ties go to the lowest state)
    pub fn solve(&mut self, fb: &ForwardBackward) -> Result<Pass> {
        self.check_segments(fb)?;
        let path = fb
            .masks
            .iter()
            .enumerate()
            .map(|(i, mask)| {
                let row = fb.posteriors.row(i);
                let mut best = mask.first().unwrap_or_default();
                for dip in mask.iter() {
                    if row[dip.index()] > row[best.index()] {
                        best = dip;
                    }
                }
                best
            })
            .collect();
        Ok(self.finish(path, fb))
    }

    /// Independent draw from each segment's posterior
    pub fn sample<R: Rng + ?Sized>(&mut self, fb: &ForwardBackward, rng: &mut R) -> Result<Pass> {
        self.check_segments(fb)?;
        let path = fb
            .masks
            .iter()
            .enumerate()
            .map(|(i, &mask)| sample_from_weights(fb.posteriors.row(i), mask, rng))
            .collect();
        Ok(self.finish(path, fb))
    }

    /// Draw segment 0 from its posterior, then each next state given the previous one
    pub fn sample_forward<R: Rng + ?Sized>(
        &mut self,
        fb: &ForwardBackward,
        rng: &mut R,
    ) -> Result<Pass> {
        self.check_segments(fb)?;
        let n = fb.n_segments();
        let mut path = Vec::with_capacity(n);
        let mut weights = [0.0f64; N_STATES];
        for i in 0..n {
            let dip = if i == 0 {
                sample_from_weights(fb.posteriors.row(0), fb.masks[0], rng)
            } else {
                let prev = path[i - 1];
                let t = &fb.transitions[i];
                weights.fill(0.0);
                for dip in fb.masks[i].iter() {
                    weights[dip.index()] = t.prob(prev, dip) * fb.beta[i][dip.index()];
                }
                sample_from_weights(&weights, fb.masks[i], rng)
            };
            path.push(dip);
        }
        Ok(self.finish(path, fb))
    }

    /// Draw the last segment from alpha, then each earlier state given the later one
    pub fn sample_backward<R: Rng + ?Sized>(
        &mut self,
        fb: &ForwardBackward,
        rng: &mut R,
    ) -> Result<Pass> {
        self.check_segments(fb)?;
        let n = fb.n_segments();
        let mut path = vec![Diplotype::default(); n];
        let mut weights = [0.0f64; N_STATES];
        for i in (0..n).rev() {
            path[i] = if i + 1 == n {
                sample_from_weights(&fb.alpha[i], fb.masks[i], rng)
            } else {
                let next = path[i + 1];
                let t = &fb.transitions[i + 1];
                weights.fill(0.0);
                for dip in fb.masks[i].iter() {
                    weights[dip.index()] = fb.alpha[i][dip.index()] * t.prob(dip, next);
                }
                sample_from_weights(&weights, fb.masks[i], rng)
            };
        }
        Ok(self.finish(path, fb))
    }
}
