//! End-to-end phasing through the public API

use rand::rngs::SmallRng;
use rand::SeedableRng;

use rephase::data::{
    BitMatrix, Call, HapIdx, HaplotypeMatrix, MarkerMap, PhaseConstraint, SampleCalls, SampleIdx,
    UniformRecombination,
};
use rephase::model::{Conditioning, Genotype, ModelParams, PrefixIndex, N_STATES};
use rephase::utils::threading::build_thread_pool;
use rephase::{PhaseError, PhasedSample, PhasingPipeline};

fn truth_panel(seed: u64, n_sites: usize, n_samples: usize, n_ref: usize) -> BitMatrix {
    let mut rng = SmallRng::seed_from_u64(seed);
    BitMatrix::random_mosaic(n_sites, 2 * n_samples, n_ref, 5, 0.02, &mut rng)
}

fn calls_of(truth: &BitMatrix, sample: SampleIdx) -> SampleCalls {
    let h0 = truth.haplotype(sample.hap1());
    let h1 = truth.haplotype(sample.hap2());
    SampleCalls::new(h0.iter().zip(&h1).map(|(&a, &b)| Call::from_alleles(a, b)).collect())
}

fn run_with_threads(
    n_threads: usize,
    truth: &BitMatrix,
    samples: &[SampleCalls],
    params: &ModelParams,
) -> Vec<PhasedSample> {
    let pool = build_thread_pool(Some(n_threads)).unwrap();
    let mut matrix = truth.clone();
    let mut pipeline = PhasingPipeline::new(params.clone(), UniformRecombination::new(0.02)).unwrap();
    pool.install(|| pipeline.run(&mut matrix, samples)).unwrap()
}

#[test]
fn results_independent_of_thread_count() {
    let truth = truth_panel(21, 60, 10, 16);
    let samples: Vec<SampleCalls> = (0..10u32)
        .map(|s| {
            let mut calls = calls_of(&truth, SampleIdx::new(s));
            calls.calls[(7 * s as usize) % 60] = Call::Missing;
            calls
        })
        .collect();
    let params = ModelParams {
        seed: 42,
        merge_threshold: 0.05,
        prune_floor: 0.01,
        ..ModelParams::default()
    };

    let single = run_with_threads(1, &truth, &samples, &params);
    let multi = run_with_threads(4, &truth, &samples, &params);
    for (a, b) in single.iter().zip(&multi) {
        assert_eq!(a.sample, b.sample);
        assert_eq!(a.haplotypes, b.haplotypes);
        assert_eq!(a.unresolved_sites, b.unresolved_sites);
    }
}

#[test]
fn phased_haplotypes_reproduce_calls_and_constraints() {
    let truth = truth_panel(5, 50, 8, 24);
    let mut samples: Vec<SampleCalls> = (0..8u32).map(|s| calls_of(&truth, SampleIdx::new(s))).collect();

    let sample = SampleIdx::new(3);
    let (h0, h1) = (truth.haplotype(sample.hap1()), truth.haplotype(sample.hap2()));
    let hets: Vec<usize> = (0..50).filter(|&i| h0[i] != h1[i]).take(3).collect();
    // Relative phase as in the truth, orientation turned around
    let constraints = hets
        .iter()
        .map(|&site| PhaseConstraint::new(7, site, h1[site], h0[site]))
        .collect();
    samples[3].constraints = constraints;

    let phased = run_with_threads(2, &truth, &samples, &ModelParams::default());
    for (p, calls) in phased.iter().zip(&samples) {
        assert!(!p.fallback);
        for (site, call) in calls.calls.iter().enumerate() {
            assert!(call.accepts(p.haplotypes[0][site], p.haplotypes[1][site]));
        }
    }
    let [p0, p1] = &phased[3].haplotypes;
    let flipped: Vec<bool> = hets.iter().map(|&site| p0[site] != h0[site]).collect();
    assert!(flipped.iter().all(|&f| f == flipped[0]));
    for &site in &hets {
        assert_ne!(p0[site], p1[site]);
    }
}

#[test]
fn conflicting_phase_set_falls_back_to_default() {
    let truth = truth_panel(8, 30, 4, 12);
    let mut samples: Vec<SampleCalls> = (0..4u32).map(|s| calls_of(&truth, SampleIdx::new(s))).collect();
    let site = samples[1].calls.iter().position(|c| c.is_het()).unwrap_or(0);
    samples[1].calls[site] = Call::Het;
    samples[1].constraints = vec![PhaseConstraint::new(2, site, 0, 1), PhaseConstraint::new(2, site, 1, 0)];

    let phased = run_with_threads(2, &truth, &samples, &ModelParams::default());
    assert!(phased[1].fallback);
    assert_eq!(phased[1].haplotypes, samples[1].default_haplotypes());
    assert!(phased.iter().enumerate().all(|(s, p)| s == 1 || !p.fallback));
}

#[test]
fn conflicting_phase_set_is_structural() {
    let calls = vec![Call::Het, Call::HomRef, Call::Het];
    let constraints = vec![PhaseConstraint::new(1, 2, 0, 1), PhaseConstraint::new(1, 2, 1, 0)];
    let err = Genotype::new(SampleIdx::new(0), calls, constraints).unwrap_err();
    assert!(matches!(err, PhaseError::StructuralInconsistency { sample: 0, .. }));
    assert!(err.is_sample_local());
}

#[test]
fn phase_sets_disagreeing_across_two_sites_are_structural() {
    let calls = vec![Call::Het, Call::HomRef, Call::Het];
    let constraints = vec![
        PhaseConstraint::new(1, 0, 0, 1),
        PhaseConstraint::new(1, 2, 0, 1),
        PhaseConstraint::new(2, 0, 1, 0),
        PhaseConstraint::new(2, 2, 0, 1),
    ];
    let err = Genotype::new(SampleIdx::new(0), calls.clone(), constraints).unwrap_err();
    assert!(matches!(err, PhaseError::StructuralInconsistency { sample: 0, .. }));

    // The same two sets agreeing at both sites form one block
    let constraints = vec![
        PhaseConstraint::new(1, 0, 0, 1),
        PhaseConstraint::new(1, 2, 0, 1),
        PhaseConstraint::new(2, 0, 1, 0),
        PhaseConstraint::new(2, 2, 1, 0),
    ];
    let g = Genotype::new(SampleIdx::new(0), calls, constraints).unwrap();
    assert_eq!(g.phase_blocks().len(), 1);
}

#[test]
fn merge_threshold_coarsens_segments() {
    let truth = truth_panel(37, 60, 8, 20);
    let samples: Vec<SampleCalls> = (0..8u32).map(|s| calls_of(&truth, SampleIdx::new(s))).collect();
    let segments_with = |merge_threshold: f64| {
        let params = ModelParams {
            merge_threshold,
            ..ModelParams::default()
        };
        let mut matrix = truth.clone();
        let mut pipeline = PhasingPipeline::new(params, UniformRecombination::new(0.02)).unwrap();
        let phased = pipeline.run(&mut matrix, &samples).unwrap();
        for (p, calls) in phased.iter().zip(&samples) {
            assert!(!p.fallback);
            for (site, call) in calls.calls.iter().enumerate() {
                assert!(call.accepts(p.haplotypes[0][site], p.haplotypes[1][site]));
            }
        }
        pipeline.progress().snapshot().segments
    };

    let site_resolution = segments_with(1e-9);
    let merged = segments_with(1.0);
    let greedy = segments_with(0.0);
    assert!(merged < site_resolution, "{merged} vs {site_resolution}");
    assert!(greedy < site_resolution, "{greedy} vs {site_resolution}");
}

#[test]
fn stale_index_is_fatal() {
    let mut matrix = truth_panel(2, 20, 3, 6);
    let index = PrefixIndex::build(&matrix);
    matrix.set_haplotype(HapIdx::new(7), &vec![1u8; 20]).unwrap();

    let err = Conditioning::select(&index, &matrix, SampleIdx::new(0), 4).unwrap_err();
    assert!(matches!(err, PhaseError::StaleIndex { .. }));
    assert!(!err.is_sample_local());
}

#[test]
fn small_panel_shrinks_state_space() {
    // Two samples and one reference haplotype: each copy sees at most 3 neighbours
    let truth = truth_panel(13, 25, 2, 1);
    let index = PrefixIndex::build(&truth);
    let neighbors = index.neighbors(SampleIdx::new(0), 10, 8).unwrap();
    assert_eq!(neighbors.copy(0).len(), 3);
    assert_eq!(neighbors.copy(1).len(), 3);

    let cond = Conditioning::select(&index, &truth, SampleIdx::new(0), 8).unwrap();
    assert_eq!(cond.slot_counts(), [3, 3]);

    let mut g = Genotype::new(SampleIdx::new(0), calls_of(&truth, SampleIdx::new(0)).calls, Vec::new()).unwrap();
    g.build(&cond).unwrap();
    for seg in g.segments() {
        assert!(!seg.mask.is_empty());
        assert!(seg.mask.iter().all(|d| d.hap0() < 3 && d.hap1() < 3));
    }
}

#[test]
fn recursion_over_selected_conditioning() {
    let truth = truth_panel(17, 40, 5, 20);
    let index = PrefixIndex::build(&truth);
    let sample = SampleIdx::new(2);
    let mut calls = calls_of(&truth, sample).calls;
    calls[12] = Call::Missing;

    let cond = Conditioning::select(&index, &truth, sample, 8).unwrap();
    let mut g = Genotype::new(sample, calls, Vec::new()).unwrap();
    g.build(&cond).unwrap();

    let params = ModelParams::default();
    let recomb = UniformRecombination::new(0.02);
    let fb = g.forward_backward(&recomb, &params).unwrap();
    for row in fb.posteriors().rows() {
        assert_eq!(row.len(), N_STATES);
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    let first = g.solve(&fb).unwrap();
    let haps = g.haplotypes();
    let second = g.solve(&fb).unwrap();
    assert_eq!(first.path, second.path);
    assert_eq!(haps, g.haplotypes());

    g.store(&second.posteriors).unwrap();
    assert_eq!(g.storage_events(), 1);
    g.mask(0.9);
    let confident = g
        .missing_probabilities(12)
        .map(|p| p.iter().all(|&x| x.max(1.0 - x) as f64 >= 0.9))
        .unwrap_or(false);
    assert_eq!(g.is_resolved(12), confident);
}

#[test]
fn pipeline_runs_with_marker_map() {
    let truth = truth_panel(29, 40, 6, 10);
    let samples: Vec<SampleCalls> = (0..6u32).map(|s| calls_of(&truth, SampleIdx::new(s))).collect();
    let positions: Vec<u32> = (0..40).map(|i| 1_000_000 + i * 20_000).collect();
    let map = MarkerMap::from_positions(&positions, 10_000.0, truth.haplotype_count());

    let mut matrix = truth.clone();
    let mut pipeline = PhasingPipeline::new(ModelParams::default(), map).unwrap();
    let phased = pipeline.run(&mut matrix, &samples).unwrap();
    for (p, calls) in phased.iter().zip(&samples) {
        assert!(!p.fallback);
        for (site, call) in calls.calls.iter().enumerate() {
            assert!(call.accepts(p.haplotypes[0][site], p.haplotypes[1][site]));
        }
    }
}
