//! # Genetic Map and Recombination Models
//!
//! The recursion only needs the probability that a chromosome copy switches
//! conditioning haplotype across a run of sites; [`RecombinationModel`] is that seam.
//! This module provides:
//! - `UniformRecombination`: constant per-site switch rate
//! - `GeneticMap`: physical-to-genetic (cM) interpolation
//! - `MarkerMap`: genetic positions of the sites, with the Li-Stephens switch
//!   probability derived from Ne and panel size

use crate::error::{PhaseError, Result};

/// Default scale factor: 1 cM per Mb (1e-6 cM per bp)
pub const DEFAULT_SCALE_FACTOR: f64 = 1e-6;

/// Minimum genetic distance between consecutive sites (cM)
const MIN_GEN_DIST: f64 = 1e-8;

/// Probability of a switch between conditioning haplotypes
pub trait RecombinationModel: Sync {
    /// Probability in `[0, 1]` of at least one switch while traversing `length`
    /// sites starting at `start_site`.
    fn recombination_prob(&self, start_site: usize, length: usize) -> f64;
}

/// Constant per-site switch rate: `1 - exp(-rate * length)`
#[derive(Clone, Copy, Debug)]
pub struct UniformRecombination {
    pub rate: f64,
}

impl UniformRecombination {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }
}

impl RecombinationModel for UniformRecombination {
    fn recombination_prob(&self, _start_site: usize, length: usize) -> f64 {
        (1.0 - (-self.rate * length as f64).exp()).clamp(0.0, 1.0)
    }
}

/// A genetic map for interpolating physical positions to genetic distances (cM)
#[derive(Clone, Debug, Default)]
pub struct GeneticMap {
    /// Physical positions (bp), strictly increasing
    positions: Vec<u32>,

    /// Genetic positions (cM) corresponding to physical positions
    gen_positions: Vec<f64>,
}

impl GeneticMap {
    /// Build from (bp, cM) points supplied by the map reader
    pub fn from_points(positions: Vec<u32>, gen_positions: Vec<f64>) -> Result<Self> {
        if positions.len() != gen_positions.len() {
            return Err(PhaseError::invalid_data(format!(
                "genetic map has {} positions but {} genetic positions",
                positions.len(),
                gen_positions.len()
            )));
        }
        if let Some(bad) = gen_positions.iter().find(|g| !g.is_finite()) {
            return Err(PhaseError::invalid_data(format!(
                "genetic position is not finite: {bad}"
            )));
        }
        for i in 1..positions.len() {
            if positions[i] <= positions[i - 1] {
                return Err(PhaseError::invalid_data(format!(
                    "Genetic map positions not in ascending order at position {}",
                    positions[i]
                )));
            }
        }
        Ok(Self {
            positions,
            gen_positions,
        })
    }

    /// Interpolate genetic position (cM) from physical position (bp)
    pub fn gen_pos(&self, phys_pos: u32) -> f64 {
        if self.positions.is_empty() {
            return phys_pos as f64 * DEFAULT_SCALE_FACTOR;
        }

        match self.positions.binary_search(&phys_pos) {
            Ok(idx) => self.gen_positions[idx],
            Err(0) => {
                let rate = self.edge_rate(0);
                self.gen_positions[0] - rate * (self.positions[0] - phys_pos) as f64
            }
            Err(idx) if idx == self.positions.len() => {
                let last = self.positions.len() - 1;
                let rate = self.edge_rate(last.saturating_sub(1));
                self.gen_positions[last] + rate * (phys_pos - self.positions[last]) as f64
            }
            Err(idx) => {
                let p0 = self.positions[idx - 1] as f64;
                let p1 = self.positions[idx] as f64;
                let g0 = self.gen_positions[idx - 1];
                let g1 = self.gen_positions[idx];
                let t = (phys_pos as f64 - p0) / (p1 - p0);
                g0 + t * (g1 - g0)
            }
        }
    }

    /// Rate (cM per bp) of the map interval starting at `idx`, used to extrapolate
    fn edge_rate(&self, idx: usize) -> f64 {
        if self.positions.len() < 2 {
            return DEFAULT_SCALE_FACTOR;
        }
        (self.gen_positions[idx + 1] - self.gen_positions[idx])
            / (self.positions[idx + 1] - self.positions[idx]) as f64
    }

    /// Genetic distance between two physical positions (cM)
    pub fn gen_dist(&self, pos1: u32, pos2: u32) -> f64 {
        (self.gen_pos(pos2) - self.gen_pos(pos1)).abs()
    }
}

/// Pre-computed genetic positions for the sites of a panel
#[derive(Clone, Debug)]
pub struct MarkerMap {
    /// Genetic positions (cM), one per site, strictly increasing
    gen_pos: Vec<f64>,
    /// Effective population size
    ne: f64,
    /// Number of conditioning haplotypes in the panel
    n_haps: usize,
}

impl MarkerMap {
    /// Genetic positions of sites at `site_positions` (bp), with a minimum
    /// distance between consecutive sites.
    pub fn create(site_positions: &[u32], gen_map: &GeneticMap, ne: f64, n_haps: usize) -> Self {
        let mut gen_pos = Vec::with_capacity(site_positions.len());
        let mut last_map_pos: Option<f64> = None;
        for &pos in site_positions {
            let map_pos = gen_map.gen_pos(pos);
            match last_map_pos {
                None => gen_pos.push(map_pos),
                Some(last) => {
                    let prev = gen_pos[gen_pos.len() - 1];
                    gen_pos.push(prev + (map_pos - last).max(MIN_GEN_DIST));
                }
            }
            last_map_pos = Some(map_pos);
        }
        Self {
            gen_pos,
            ne,
            n_haps: n_haps.max(1),
        }
    }

    /// Default position-based map (1 cM per Mb)
    pub fn from_positions(site_positions: &[u32], ne: f64, n_haps: usize) -> Self {
        Self::create(site_positions, &GeneticMap::default(), ne, n_haps)
    }

    /// Genetic positions of all sites
    pub fn gen_positions(&self) -> &[f64] {
        &self.gen_pos
    }
}

impl RecombinationModel for MarkerMap {
    /// Li-Stephens switch probability over the genetic distance from `start_site`
    /// to the first site after the run.
    fn recombination_prob(&self, start_site: usize, length: usize) -> f64 {
        if self.gen_pos.len() < 2 {
            return 0.0;
        }
        let last = self.gen_pos.len() - 1;
        let from = start_site.min(last);
        let to = (start_site + length).min(last);
        let dist = (self.gen_pos[to] - self.gen_pos[from]).max(0.0);
        let rho = 0.04 * self.ne * dist / self.n_haps as f64;
        (1.0 - (-rho).exp()).clamp(0.0, 1.0)
    }
}
