//! # Genotype State Model
//!
//! ## Role
//! Per-sample compressed state space. Every site gets a packed [`VariantCode`]; the
//! ambiguous sites (het, missing, phase-constrained) are listed separately with the
//! alleles of their conditioning slots. Sites are grouped greedily into [`Segment`]s
//! that share one set of compatible diplotypes, so the recursion in
//! [`hmm`](crate::model::hmm) runs over segments instead of sites.
//!
//! ## Lifecycle
//! 1. `Genotype::new` validates calls and phase-set constraints (once per run).
//!    Phase sets that share a site are linked into one phase block.
//! 2. `Genotype::build` (greedy) or `Genotype::build_sites` (one segment per run of
//!    identical site sets) segments the sites against fresh conditioning, every
//!    iteration. Constrained sites admit either orientation of their block.
//! 3. `orient_blocks` picks each block's orientation from the posteriors and
//!    segments again with the blocks held fixed.
//! 4. A path from the recursion is written into the variant records; marginals are
//!    folded into the running-mean storage by `store`.
//! 5. `mask` flags sites whose stored confidence stays below a threshold.

use std::ops::Range;

use bitvec::prelude::*;

use crate::data::calls::{Call, PhaseConstraint};
use crate::data::haplotype::SampleIdx;
use crate::error::{PhaseError, Result};
use crate::model::conditioning::{Conditioning, SiteAlleles};
use crate::model::hmm::Posteriors;
use crate::model::states::{Diplotype, StateSet, N_STATES};

/// Site category stored in the low two bits of a [`VariantCode`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VariantKind {
    Hom = 0,
    Missing = 1,
    Het = 2,
    Scaffold = 3,
}

/// Packed per-site record
///
/// Layout: bits 0-1 kind, bit 2 allele of copy 0, bit 3 allele of copy 1,
/// bits 4-6 slot of copy 0, bits 7-9 slot of copy 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VariantCode(u16);

impl VariantCode {
    const KIND_MASK: u16 = 0b11;
    const ALLELE_SHIFT: u16 = 2;
    const SLOT_SHIFT: [u16; 2] = [4, 7];
    const SLOT_MASK: u16 = 0b111;

    pub fn new(kind: VariantKind, alleles: [u8; 2]) -> Self {
        let mut code = Self(kind as u16);
        code.set_alleles(alleles);
        code
    }

    #[inline]
    pub fn kind(self) -> VariantKind {
        match self.0 & Self::KIND_MASK {
            0 => VariantKind::Hom,
            1 => VariantKind::Missing,
            2 => VariantKind::Het,
            _ => VariantKind::Scaffold,
        }
    }

    /// Het, missing and scaffold sites need resolving
    #[inline]
    pub fn is_ambiguous(self) -> bool {
        self.kind() != VariantKind::Hom
    }

    #[inline]
    pub fn allele(self, copy: usize) -> u8 {
        ((self.0 >> (Self::ALLELE_SHIFT + copy as u16)) & 1) as u8
    }

    #[inline]
    pub fn alleles(self) -> [u8; 2] {
        [self.allele(0), self.allele(1)]
    }

    #[inline]
    pub fn set_alleles(&mut self, alleles: [u8; 2]) {
        self.0 &= !(0b11 << Self::ALLELE_SHIFT);
        self.0 |= ((alleles[0] & 1) as u16) << Self::ALLELE_SHIFT;
        self.0 |= ((alleles[1] & 1) as u16) << (Self::ALLELE_SHIFT + 1);
    }

    /// Conditioning slot backing `copy`
    #[inline]
    pub fn slot(self, copy: usize) -> usize {
        ((self.0 >> Self::SLOT_SHIFT[copy]) & Self::SLOT_MASK) as usize
    }

    #[inline]
    pub fn set_slots(&mut self, dip: Diplotype) {
        for copy in 0..2 {
            let shift = Self::SLOT_SHIFT[copy];
            self.0 &= !(Self::SLOT_MASK << shift);
            self.0 |= ((dip.hap(copy) as u16) & Self::SLOT_MASK) << shift;
        }
    }
}

impl std::fmt::Debug for VariantCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}[{}|{} @ {},{}]",
            self.kind(),
            self.allele(0),
            self.allele(1),
            self.slot(0),
            self.slot(1)
        )
    }
}

/// Run of consecutive sites sharing one compatible state set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    pub length: usize,
    pub mask: StateSet,
}

impl Segment {
    pub fn new(start: usize, length: usize, mask: StateSet) -> Self {
        Self {
            start,
            length,
            mask,
        }
    }

    /// One past the last site
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// Compressed genotype of one sample
#[derive(Clone, Debug)]
pub struct Genotype {
    sample: SampleIdx,
    calls: Vec<Call>,
    variants: Vec<VariantCode>,
    /// Site indices of het, missing and scaffold sites, increasing
    ambiguous: Vec<usize>,
    /// Conditioning alleles of each ambiguous site (parallel to `ambiguous`)
    amb_alleles: Vec<SiteAlleles>,
    /// Sorted by site, one per site
    constraints: Vec<PhaseConstraint>,
    /// Constrained sites of each phase block; a block flips as a unit
    blocks: Vec<Vec<usize>>,
    segments: Vec<Segment>,
    /// Last segmentation was per site rather than greedy
    site_resolution: bool,
    n_slots: [usize; 2],
    unexplained: usize,

    /// Index of each ambiguous site into `prob_stored` or (pairs of) `prob_missing`
    prob_offset: Vec<u32>,
    prob_mask: BitVec<u64, Lsb0>,
    prob_stored: Vec<f32>,
    prob_missing: Vec<f32>,
    storage_events: u32,
    unresolved: BitVec<u64, Lsb0>,
}

impl Genotype {
    /// Validate calls and phase-set constraints and lay out the variant records
    pub fn new(sample: SampleIdx, calls: Vec<Call>, constraints: Vec<PhaseConstraint>) -> Result<Self> {
        let n_sites = calls.len();
        let mut constraints = constraints;
        constraints.sort_by_key(|c| (c.site, c.phase_set));

        if let Some(c) = constraints.iter().find(|c| c.site >= n_sites) {
            return Err(PhaseError::invalid_data(format!(
                "phase constraint at site {} but sample {} has {} sites",
                c.site, sample, n_sites
            )));
        }
        for c in &constraints {
            let [a0, a1] = c.alleles;
            if !calls[c.site].accepts(a0, a1) {
                return Err(PhaseError::structural(
                    sample.0,
                    format!(
                        "phase set {} fixes {}|{} at site {} but the call is {:?}",
                        c.phase_set, a0, a1, c.site, calls[c.site]
                    ),
                ));
            }
        }

        let mut links = PhaseLinks::new(&constraints);
        let mut start = 0;
        while start < constraints.len() {
            let site = constraints[start].site;
            let end = start + constraints[start..].iter().take_while(|c| c.site == site).count();
            let group = &constraints[start..end];
            start = end;
            let first = &group[0];
            for c in &group[1..] {
                let flip = if c.alleles == first.alleles {
                    false
                } else if c.alleles == swapped(first.alleles) {
                    true
                } else {
                    return Err(PhaseError::structural(
                        sample.0,
                        format!(
                            "site {} is constrained to {}|{} (phase set {}) and {}|{} (phase set {})",
                            c.site,
                            first.alleles[0],
                            first.alleles[1],
                            first.phase_set,
                            c.alleles[0],
                            c.alleles[1],
                            c.phase_set
                        ),
                    ));
                };
                if first.alleles[0] != first.alleles[1]
                    && !links.link(first.phase_set, c.phase_set, flip)
                {
                    return Err(PhaseError::structural(
                        sample.0,
                        format!(
                            "phase sets {} and {} disagree on the relative phase at site {}",
                            first.phase_set, c.phase_set, c.site
                        ),
                    ));
                }
            }
        }
        constraints.dedup_by_key(|c| c.site);

        // Constrained sites in the orientation of their block's root phase set
        let mut roots: Vec<u32> = Vec::new();
        let mut blocks: Vec<Vec<usize>> = Vec::new();
        let mut oriented = Vec::with_capacity(constraints.len());
        for c in &constraints {
            let (root, flipped) = links.find(c.phase_set);
            let block = match roots.iter().position(|&r| r == root) {
                Some(b) => b,
                None => {
                    roots.push(root);
                    blocks.push(Vec::new());
                    roots.len() - 1
                }
            };
            blocks[block].push(c.site);
            oriented.push(if flipped { swapped(c.alleles) } else { c.alleles });
        }

        let mut variants = Vec::with_capacity(n_sites);
        let mut ambiguous = Vec::new();
        let mut prob_offset = Vec::new();
        let (mut n_stored, mut n_missing) = (0u32, 0u32);
        let mut next_constraint = constraints.iter().zip(&oriented).peekable();

        for (site, &call) in calls.iter().enumerate() {
            let fixed = next_constraint.next_if(|(c, _)| c.site == site);
            let code = match (fixed, call) {
                (Some((_, &alleles)), _) => VariantCode::new(VariantKind::Scaffold, alleles),
                (None, Call::Het) => VariantCode::new(VariantKind::Het, call.default_alleles()),
                (None, Call::Missing) => VariantCode::new(VariantKind::Missing, call.default_alleles()),
                (None, _) => VariantCode::new(VariantKind::Hom, call.default_alleles()),
            };
            match code.kind() {
                VariantKind::Hom => {}
                VariantKind::Missing => {
                    ambiguous.push(site);
                    prob_offset.push(n_missing);
                    n_missing += 1;
                }
                VariantKind::Het | VariantKind::Scaffold => {
                    ambiguous.push(site);
                    prob_offset.push(n_stored);
                    n_stored += 1;
                }
            }
            variants.push(code);
        }

        Ok(Self {
            sample,
            calls,
            variants,
            ambiguous,
            amb_alleles: Vec::new(),
            constraints,
            blocks,
            segments: Vec::new(),
            site_resolution: false,
            n_slots: [0, 0],
            unexplained: 0,
            prob_offset,
            prob_mask: bitvec![u64, Lsb0; 0; n_sites],
            prob_stored: vec![0.0; n_stored as usize],
            prob_missing: vec![0.0; 2 * n_missing as usize],
            storage_events: 0,
            unresolved: bitvec![u64, Lsb0; 0; n_sites],
        })
    }

    /// Greedy segmentation against `cond`; probability storage is kept
    pub fn build(&mut self, cond: &Conditioning) -> Result<()> {
        self.site_resolution = false;
        self.segment(cond, false)
    }

    /// Per-site segmentation against `cond`: a segment is a run of sites with
    /// identical compatible sets. Merging coarsens it afterwards.
    pub fn build_sites(&mut self, cond: &Conditioning) -> Result<()> {
        self.site_resolution = true;
        self.segment(cond, false)
    }

    /// Segment the sites; with `locked` false a constrained site admits either
    /// orientation of its phase block.
    fn segment(&mut self, cond: &Conditioning, locked: bool) -> Result<()> {
        let n_sites = self.n_sites();
        if cond.n_sites() != n_sites {
            return Err(PhaseError::invalid_data(format!(
                "conditioning covers {} sites but sample {} has {}",
                cond.n_sites(),
                self.sample,
                n_sites
            )));
        }
        let n_slots = cond.slot_counts();
        if n_slots[0] == 0 || n_slots[1] == 0 {
            return Err(PhaseError::structural(
                self.sample.0,
                "no conditioning haplotypes available",
            ));
        }
        self.n_slots = n_slots;
        self.segments.clear();
        self.unexplained = 0;

        let valid = StateSet::valid(n_slots[0], n_slots[1]);
        let mut current: Option<Segment> = None;
        for site in 0..n_sites {
            let states = self.site_states(site, cond.site(site), valid, locked);
            current = Some(match current {
                None => Segment::new(site, 1, states),
                Some(mut seg) => {
                    let merged = if self.site_resolution {
                        if seg.mask == states {
                            states
                        } else {
                            StateSet::EMPTY
                        }
                    } else {
                        seg.mask & states
                    };
                    if merged.is_empty() {
                        self.segments.push(seg);
                        Segment::new(site, 1, states)
                    } else {
                        seg.mask = merged;
                        seg.length += 1;
                        seg
                    }
                }
            });
        }
        self.segments.extend(current);

        self.amb_alleles.clear();
        self.amb_alleles
            .extend(self.ambiguous.iter().map(|&site| cond.site(site)));

        tracing::trace!(
            sample = self.sample.0,
            segments = self.segments.len(),
            unexplained = self.unexplained,
            locked,
            "built segments"
        );
        Ok(())
    }

    /// Compatible states of one site; relaxes to `valid` when nothing reproduces the call
    fn site_states(
        &mut self,
        site: usize,
        alleles: SiteAlleles,
        valid: StateSet,
        locked: bool,
    ) -> StateSet {
        let call = self.calls[site];
        let call_states = alleles.call_states(call, self.n_slots);
        let code = self.variants[site];
        let states = match code.kind() {
            VariantKind::Scaffold => {
                let mut fixed = alleles.fixed_states(code.alleles(), self.n_slots);
                if !locked {
                    fixed = fixed | alleles.fixed_states(swapped(code.alleles()), self.n_slots);
                }
                if fixed.is_empty() {
                    call_states
                } else {
                    fixed
                }
            }
            _ => call_states,
        };
        if states.is_empty() {
            self.unexplained += 1;
            valid
        } else {
            states
        }
    }

    /// Choose the orientation of every phase block from `posteriors`, then segment
    /// again against `cond` with the blocks held fixed. Returns how many blocks
    /// flipped. The recursion must be rerun afterwards.
    pub fn orient_blocks(&mut self, cond: &Conditioning, posteriors: &Posteriors) -> Result<usize> {
        if posteriors.len() != self.segments.len() {
            return Err(PhaseError::invalid_data(format!(
                "{} posterior rows for {} segments",
                posteriors.len(),
                self.segments.len()
            )));
        }
        let mut flipped = 0;
        for b in 0..self.blocks.len() {
            let (mut keep, mut flip) = (0.0, 0.0);
            for &site in &self.blocks[b] {
                let Some(a) = self.amb_index(site) else {
                    continue;
                };
                let Some(i) = self.segment_of(site) else {
                    continue;
                };
                let (row, mask) = (posteriors.row(i), self.segments[i].mask);
                let alleles = self.variants[site].alleles();
                let site_alleles = self.amb_alleles[a];
                keep += mass(row, mask & site_alleles.fixed_states(alleles, self.n_slots));
                flip += mass(row, mask & site_alleles.fixed_states(swapped(alleles), self.n_slots));
            }
            if flip > keep {
                for i in 0..self.blocks[b].len() {
                    let site = self.blocks[b][i];
                    let alleles = self.variants[site].alleles();
                    self.variants[site].set_alleles(swapped(alleles));
                }
                flipped += 1;
            }
        }
        self.segment(cond, true)?;
        Ok(flipped)
    }

    /// Replace the segmentation (after `build`); segments must partition the sites
    /// with non-empty masks inside the valid state space.
    pub fn set_segments(&mut self, segments: Vec<Segment>) -> Result<()> {
        if self.amb_alleles.len() != self.ambiguous.len() {
            return Err(PhaseError::invalid_data(format!(
                "sample {} has not been built against conditioning haplotypes",
                self.sample
            )));
        }
        let valid = StateSet::valid(self.n_slots[0], self.n_slots[1]);
        let mut expected = 0;
        for seg in &segments {
            if seg.start != expected || seg.length == 0 {
                return Err(PhaseError::invalid_data(format!(
                    "segment at site {} does not continue the partition at site {}",
                    seg.start, expected
                )));
            }
            if seg.mask.is_empty() || !seg.mask.is_subset(valid) {
                return Err(PhaseError::structural(
                    self.sample.0,
                    format!("segment at site {} has no valid states", seg.start),
                ));
            }
            expected = seg.end();
        }
        if expected != self.n_sites() {
            return Err(PhaseError::invalid_data(format!(
                "segments cover {} of {} sites",
                expected,
                self.n_sites()
            )));
        }
        self.segments = segments;
        Ok(())
    }

    pub fn sample_idx(&self) -> SampleIdx {
        self.sample
    }

    pub fn n_sites(&self) -> usize {
        self.calls.len()
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn variants(&self) -> &[VariantCode] {
        &self.variants
    }

    /// Het, missing and scaffold sites in increasing order
    pub fn ambiguous(&self) -> &[usize] {
        &self.ambiguous
    }

    pub fn constraints(&self) -> &[PhaseConstraint] {
        &self.constraints
    }

    /// Constrained sites grouped by phase block
    pub fn phase_blocks(&self) -> &[Vec<usize>] {
        &self.blocks
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub(crate) fn segments_mut(&mut self) -> &mut Vec<Segment> {
        &mut self.segments
    }

    /// Valid conditioning slots per copy from the last build
    pub fn slot_counts(&self) -> [usize; 2] {
        self.n_slots
    }

    /// Sites no pair of conditioning haplotypes could reproduce in the last build
    pub fn unexplained_sites(&self) -> usize {
        self.unexplained
    }

    /// Number of state-to-state transitions the recursion evaluates
    pub fn transition_count(&self) -> usize {
        let mut prev = 1;
        let mut count = 0;
        for seg in &self.segments {
            let curr = seg.mask.popcount();
            count += prev * curr;
            prev = curr;
        }
        count
    }

    /// Index of the segment covering `site`
    fn segment_of(&self, site: usize) -> Option<usize> {
        let i = self.segments.partition_point(|seg| seg.end() <= site);
        (i < self.segments.len()).then_some(i)
    }

    /// Range into `ambiguous` of the sites covered by `seg`
    pub(crate) fn ambiguous_in(&self, seg: &Segment) -> Range<usize> {
        let lo = self.ambiguous.partition_point(|&s| s < seg.start);
        let hi = self.ambiguous.partition_point(|&s| s < seg.end());
        lo..hi
    }

    /// Fixed-assignment states of every realisable scaffold site inside `seg`
    pub(crate) fn scaffold_states(&self, seg: &Segment) -> StateSet {
        let mut states = StateSet::FULL;
        for a in self.ambiguous_in(seg) {
            let code = self.variants[self.ambiguous[a]];
            if code.kind() == VariantKind::Scaffold {
                let fixed = self.amb_alleles[a].fixed_states(code.alleles(), self.n_slots);
                if !fixed.is_empty() {
                    states &= fixed;
                }
            }
        }
        states
    }

    /// Posterior probability that a het is phased 1|0 within one segment row
    fn het_phase(row: &[f64; N_STATES], mask: StateSet, alleles: SiteAlleles) -> f64 {
        let (mut alt_ref, mut ref_alt) = (0.0, 0.0);
        for dip in mask.iter() {
            match (alleles.allele(0, dip.hap0()), alleles.allele(1, dip.hap1())) {
                (1, 0) => alt_ref += row[dip.index()],
                (0, 1) => ref_alt += row[dip.index()],
                _ => {}
            }
        }
        let total = alt_ref + ref_alt;
        if total > 0.0 {
            alt_ref / total
        } else {
            0.5
        }
    }

    /// Posterior probability that each copy carries the alternate allele
    fn alt_dosage(row: &[f64; N_STATES], mask: StateSet, alleles: SiteAlleles) -> [f64; 2] {
        let mut p = [0.0; 2];
        let mut total = 0.0;
        for dip in mask.iter() {
            let w = row[dip.index()];
            total += w;
            for (copy, pc) in p.iter_mut().enumerate() {
                if alleles.allele(copy, dip.hap(copy)) == 1 {
                    *pc += w;
                }
            }
        }
        if total > 0.0 {
            p.map(|x| x / total)
        } else {
            p
        }
    }

    /// Write a path (one diplotype per segment) into the variant records
    pub(crate) fn apply_path(&mut self, path: &[Diplotype], posteriors: &Posteriors) {
        for (i, &dip) in path.iter().enumerate().take(self.segments.len()) {
            let seg = self.segments[i];
            let row = posteriors.row(i);
            for a in self.ambiguous_in(&seg) {
                let site = self.ambiguous[a];
                let alleles = self.amb_alleles[a];
                let carried = [alleles.allele(0, dip.hap0()), alleles.allele(1, dip.hap1())];
                let code = &mut self.variants[site];
                code.set_slots(dip);
                match code.kind() {
                    VariantKind::Het => {
                        if carried[0] != carried[1] {
                            code.set_alleles(carried);
                        } else if Self::het_phase(row, seg.mask, alleles) > 0.5 {
                            code.set_alleles([1, 0]);
                        } else {
                            code.set_alleles([0, 1]);
                        }
                    }
                    VariantKind::Missing => code.set_alleles(carried),
                    VariantKind::Scaffold | VariantKind::Hom => {}
                }
            }
        }
    }

    /// Fold the marginals of `posteriors` into the running mean of every ambiguous site
    pub fn store(&mut self, posteriors: &Posteriors) -> Result<()> {
        if posteriors.len() != self.segments.len() {
            return Err(PhaseError::invalid_data(format!(
                "{} posterior rows for {} segments",
                posteriors.len(),
                self.segments.len()
            )));
        }
        let n = self.storage_events as f32;
        let fold = |old: f32, new: f64| (old * n + new as f32) / (n + 1.0);

        for (i, seg) in self.segments.iter().enumerate() {
            let row = posteriors.row(i);
            for a in self.ambiguous_in(seg) {
                let site = self.ambiguous[a];
                let alleles = self.amb_alleles[a];
                let off = self.prob_offset[a] as usize;
                let code = self.variants[site];
                match code.kind() {
                    VariantKind::Het => {
                        let p = Self::het_phase(row, seg.mask, alleles);
                        self.prob_stored[off] = fold(self.prob_stored[off], p);
                    }
                    VariantKind::Scaffold => {
                        let p = code.allele(0) as f64;
                        self.prob_stored[off] = fold(self.prob_stored[off], p);
                    }
                    VariantKind::Missing => {
                        let p = Self::alt_dosage(row, seg.mask, alleles);
                        for copy in 0..2 {
                            let slot = 2 * off + copy;
                            self.prob_missing[slot] = fold(self.prob_missing[slot], p[copy]);
                        }
                    }
                    VariantKind::Hom => {}
                }
                self.prob_mask.set(site, true);
            }
        }
        self.storage_events += 1;
        Ok(())
    }

    pub fn storage_events(&self) -> u32 {
        self.storage_events
    }

    fn amb_index(&self, site: usize) -> Option<usize> {
        self.ambiguous.binary_search(&site).ok()
    }

    /// Stored probability that copy 0 carries the alternate allele (het and scaffold sites)
    pub fn phase_probability(&self, site: usize) -> Option<f32> {
        let a = self.amb_index(site)?;
        if !self.prob_mask[site] {
            return None;
        }
        match self.variants[site].kind() {
            VariantKind::Het | VariantKind::Scaffold => Some(self.prob_stored[self.prob_offset[a] as usize]),
            _ => None,
        }
    }

    /// Stored per-copy alternate-allele probabilities (missing sites)
    pub fn missing_probabilities(&self, site: usize) -> Option<[f32; 2]> {
        let a = self.amb_index(site)?;
        if !self.prob_mask[site] || self.variants[site].kind() != VariantKind::Missing {
            return None;
        }
        let off = 2 * self.prob_offset[a] as usize;
        Some([self.prob_missing[off], self.prob_missing[off + 1]])
    }

    /// Flag ambiguous sites whose stored confidence is below `threshold`, or that were
    /// never stored; returns how many were flagged. Scaffold sites are always resolved.
    pub fn mask(&mut self, threshold: f64) -> usize {
        self.unresolved.fill(false);
        let mut count = 0;
        for &site in &self.ambiguous {
            let confidence = match self.variants[site].kind() {
                VariantKind::Scaffold => continue,
                _ if !self.prob_mask[site] => None,
                VariantKind::Het => self
                    .phase_probability(site)
                    .map(|p| p.max(1.0 - p) as f64),
                VariantKind::Missing => self
                    .missing_probabilities(site)
                    .map(|p| p.iter().map(|&x| x.max(1.0 - x) as f64).fold(1.0, f64::min)),
                VariantKind::Hom => continue,
            };
            if confidence.map_or(true, |c| c < threshold) {
                self.unresolved.set(site, true);
                count += 1;
            }
        }
        count
    }

    /// Whether `site` passed the last `mask`
    pub fn is_resolved(&self, site: usize) -> bool {
        !self.unresolved[site]
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.count_ones()
    }

    /// Current alleles of both chromosome copies
    pub fn haplotypes(&self) -> [Vec<u8>; 2] {
        let mut haps = [
            Vec::with_capacity(self.n_sites()),
            Vec::with_capacity(self.n_sites()),
        ];
        for code in &self.variants {
            haps[0].push(code.allele(0));
            haps[1].push(code.allele(1));
        }
        haps
    }
}

fn swapped(alleles: [u8; 2]) -> [u8; 2] {
    [alleles[1], alleles[0]]
}

/// Posterior mass of `states` in one segment row
fn mass(row: &[f64; N_STATES], states: StateSet) -> f64 {
    states.iter().map(|d| row[d.index()]).sum()
}

/// Union-find over phase-set ids; each set carries its orientation relative to its
/// parent, so two sets sharing a site can be tied in or out of phase.
struct PhaseLinks {
    ids: Vec<u32>,
    parent: Vec<usize>,
    flip: Vec<bool>,
}

impl PhaseLinks {
    fn new(constraints: &[PhaseConstraint]) -> Self {
        let mut ids: Vec<u32> = constraints.iter().map(|c| c.phase_set).collect();
        ids.sort_unstable();
        ids.dedup();
        let n = ids.len();
        Self {
            ids,
            parent: (0..n).collect(),
            flip: vec![false; n],
        }
    }

    fn node(&self, id: u32) -> usize {
        match self.ids.binary_search(&id) {
            Ok(i) | Err(i) => i,
        }
    }

    fn root(&mut self, x: usize) -> (usize, bool) {
        let p = self.parent[x];
        if p == x {
            return (x, false);
        }
        let (root, parity) = self.root(p);
        self.parent[x] = root;
        self.flip[x] ^= parity;
        (root, self.flip[x])
    }

    /// Root phase-set id of `id` and whether `id` is flipped against it
    fn find(&mut self, id: u32) -> (u32, bool) {
        let (root, flipped) = self.root(self.node(id));
        (self.ids[root], flipped)
    }

    /// Tie `a` and `b` together, `flip` meaning opposite orientation; false if
    /// they are already tied the other way.
    fn link(&mut self, a: u32, b: u32, flip: bool) -> bool {
        let (ra, pa) = self.root(self.node(a));
        let (rb, pb) = self.root(self.node(b));
        if ra == rb {
            return pa ^ pb == flip;
        }
        self.parent[rb] = ra;
        self.flip[rb] = pa ^ pb ^ flip;
        true
    }
}
