//! # Segment Merging and Pruning
//!
//! Between two recursion rounds the state space can be tightened:
//! - `map_merges` / `perform_merges` fuse runs of adjacent segments whose posteriors
//!   agree and whose masks still intersect
//! - `prune` drops states with negligible posterior mass
//!
//! Greedy segments from [`Genotype::build`] have pairwise disjoint neighbours and never
//! merge. Merging works on the per-site segmentation of [`Genotype::build_sites`]:
//! a threshold of zero keeps every site boundary, and a threshold above every
//! distance fuses runs down to the greedy segmentation.

use bitvec::prelude::*;

use crate::error::{PhaseError, Result};
use crate::model::genotype::{Genotype, Segment};
use crate::model::hmm::Posteriors;
use crate::model::states::{StateSet, N_STATES};

/// Total-variation distance between two posterior rows
pub fn total_variation(a: &[f64; N_STATES], b: &[f64; N_STATES]) -> f64 {
    0.5 * a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f64>()
}

/// Average of `rows` restricted to `mask`, renormalised (uniform if it has no mass)
fn merged_row<'a, I>(rows: I, mask: StateSet) -> [f64; N_STATES]
where
    I: IntoIterator<Item = &'a [f64; N_STATES]>,
{
    let mut out = [0.0f64; N_STATES];
    for row in rows {
        for dip in mask.iter() {
            out[dip.index()] += row[dip.index()];
        }
    }
    let sum: f64 = out.iter().sum();
    if sum > 0.0 {
        out.iter_mut().for_each(|v| *v /= sum);
    } else {
        let p = 1.0 / mask.popcount().max(1) as f64;
        for dip in mask.iter() {
            out[dip.index()] = p;
        }
    }
    out
}

/// Fuse consecutive segments with identical masks (rows averaged when given)
fn coalesce(segments: &mut Vec<Segment>, mut rows: Option<&mut Vec<[f64; N_STATES]>>) {
    let mut w = 0;
    for r in 0..segments.len() {
        if w > 0 && segments[w - 1].mask == segments[r].mask {
            segments[w - 1].length += segments[r].length;
            if let Some(rows) = rows.as_deref_mut() {
                let mask = segments[w - 1].mask;
                rows[w - 1] = merged_row([&rows[w - 1], &rows[r]], mask);
            }
        } else {
            segments[w] = segments[r];
            if let Some(rows) = rows.as_deref_mut() {
                rows[w] = rows[r];
            }
            w += 1;
        }
    }
    segments.truncate(w);
    if let Some(rows) = rows {
        rows.truncate(w);
    }
}

impl Genotype {
    /// Flag boundary `i` (segment `i` with `i + 1`) for merging
    ///
    /// A boundary is flagged when the posterior rows differ by less than `threshold`
    /// in total variation, the masks of the run being merged still intersect, and the
    /// intersection keeps every realisable scaffold assignment of the run.
    pub fn map_merges(&self, posteriors: &Posteriors, threshold: f64) -> BitVec<u64, Lsb0> {
        let segments = self.segments();
        let n = segments.len();
        let mut flags = bitvec![u64, Lsb0; 0; n.saturating_sub(1)];
        if n < 2 || posteriors.len() != n {
            return flags;
        }

        let mut running = segments[0].mask;
        let mut guard = self.scaffold_states(&segments[0]);
        for i in 0..n - 1 {
            let next = &segments[i + 1];
            let next_guard = self.scaffold_states(next);
            let tv = total_variation(posteriors.row(i), posteriors.row(i + 1));
            let merged = running & next.mask;
            let merged_guard = guard & next_guard;
            if tv < threshold && !merged.is_empty() && merged.is_subset(merged_guard) {
                flags.set(i, true);
                running = merged;
                guard = merged_guard;
            } else {
                running = next.mask;
                guard = next_guard;
            }
        }
        flags
    }

    /// Merge flagged runs; returns how many segments were removed
    ///
    /// Each run becomes one segment with the intersected mask and summed length; its
    /// posterior row is the renormalised average of the run's rows restricted to the
    /// merged mask. Rows of unflagged segments are left as they are.
    pub fn perform_merges(
        &mut self,
        posteriors: &mut Posteriors,
        flags: &BitSlice<u64, Lsb0>,
    ) -> Result<usize> {
        let n = self.segments().len();
        if posteriors.len() != n || flags.len() != n.saturating_sub(1) {
            return Err(PhaseError::invalid_data(format!(
                "{} segments, {} posterior rows and {} merge flags",
                n,
                posteriors.len(),
                flags.len()
            )));
        }

        let sample = self.sample_idx();
        let old_segments = self.segments().to_vec();
        let old_rows = posteriors.rows().to_vec();
        let mut segments = Vec::with_capacity(n);
        let mut rows = Vec::with_capacity(n);

        let mut i = 0;
        while i < n {
            let mut j = i;
            while j < flags.len() && flags[j] {
                j += 1;
            }
            if j == i {
                segments.push(old_segments[i]);
                rows.push(old_rows[i]);
            } else {
                let mask = old_segments[i..=j]
                    .iter()
                    .fold(StateSet::FULL, |m, s| m & s.mask);
                if mask.is_empty() {
                    return Err(PhaseError::structural(
                        sample.0,
                        format!(
                            "merging segments at sites {}..{} leaves no state",
                            old_segments[i].start,
                            old_segments[j].end()
                        ),
                    ));
                }
                let length = old_segments[i..=j].iter().map(|s| s.length).sum();
                segments.push(Segment::new(old_segments[i].start, length, mask));
                rows.push(merged_row(&old_rows[i..=j], mask));
            }
            i = j + 1;
        }

        coalesce(&mut segments, Some(&mut rows));
        let removed = n - segments.len();
        *self.segments_mut() = segments;
        *posteriors.rows_mut() = rows;
        Ok(removed)
    }

    /// Drop states whose posterior is below `floor` times the segment maximum;
    /// returns how many states were removed. Masks never become empty.
    pub fn prune(&mut self, posteriors: &Posteriors, floor: f64) -> Result<usize> {
        let n = self.segments().len();
        if posteriors.len() != n {
            return Err(PhaseError::invalid_data(format!(
                "{} posterior rows for {} segments",
                posteriors.len(),
                n
            )));
        }
        let mut removed = 0;
        let segments = self.segments_mut();
        for (seg, row) in segments.iter_mut().zip(posteriors.rows()) {
            let max = seg
                .mask
                .iter()
                .map(|d| row[d.index()])
                .fold(0.0f64, f64::max);
            let cutoff = floor * max;
            let kept: StateSet = seg.mask.iter().filter(|d| row[d.index()] >= cutoff).collect();
            if !kept.is_empty() {
                removed += seg.mask.popcount() - kept.popcount();
                seg.mask = kept;
            }
        }
        coalesce(segments, None);
        Ok(removed)
    }
}
