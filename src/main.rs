//! # Rephase: PBWT-conditioned haplotype phasing
//!
//! Phases a synthetic panel end to end and reports how close the result is to the
//! truth it was drawn from.
//!
//! ## Usage
//! ```bash
//! rephase --samples 100 --sites 2000
//!
//! # Smaller state spaces, with span timings
//! rephase --samples 100 --sites 2000 --merge-threshold 0.05 --prune-floor 0.01 --profile
//! ```

use std::time::Instant;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use rephase::config::Config;
use rephase::data::{BitMatrix, Call, PhaseConstraint, SampleCalls, SampleIdx, UniformRecombination};
use rephase::pipelines::{PhasedSample, PhasingPipeline};
use rephase::utils::threading::build_thread_pool;
use rephase::Result;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing subscriber for hierarchical profiling output
fn init_profiling() {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(false)
                .with_timer(fmt::time::uptime()),
        )
        .init();
}

fn run() -> Result<()> {
    let start = Instant::now();

    let config = Config::parse_and_validate()?;

    if config.profile {
        init_profiling();
        eprintln!("=== Profiling enabled ===\n");
    }

    let pool = build_thread_pool(config.nthreads)?;

    eprintln!("Rephase v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Threads: {}", pool.current_num_threads());
    eprintln!(
        "Panel: {} samples, {} reference haplotypes, {} sites",
        config.samples, config.reference_haps, config.sites
    );

    let mut rng = SmallRng::seed_from_u64(config.seed);
    let truth = BitMatrix::random_mosaic(
        config.sites,
        2 * config.samples,
        config.reference_haps,
        config.founders,
        config.rate,
        &mut rng,
    );
    let samples: Vec<SampleCalls> = (0..config.samples)
        .map(|s| observe(&truth, SampleIdx::from(s), config.missing_rate, &mut rng))
        .collect();

    let mut matrix = truth.clone();
    let mut pipeline = PhasingPipeline::new(config.to_params(), UniformRecombination::new(config.rate))?;
    let phased = pool.install(|| pipeline.run(&mut matrix, &samples))?;

    let summary = Summary::collect(&truth, &samples, &phased);
    tracing::info!(
        switch_errors = summary.switch_errors,
        het_pairs = summary.het_pairs,
        imputed_correct = summary.imputed_correct,
        imputed = summary.imputed,
        "phasing summary"
    );

    eprintln!("\nSwitch error rate: {:.4} ({} / {})", summary.switch_rate(), summary.switch_errors, summary.het_pairs);
    eprintln!(
        "Imputed allele accuracy: {:.4} ({} / {})",
        summary.imputed_accuracy(),
        summary.imputed_correct,
        summary.imputed
    );
    eprintln!("Unresolved sites: {}", summary.unresolved);
    eprintln!("Fallback samples: {}", summary.fallbacks);
    eprintln!("\nCompleted in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

/// Unphased calls of one truth sample: some calls masked as missing, and the first
/// two heterozygous sites of every fourth sample carried as a phased block.
fn observe<R: Rng>(truth: &BitMatrix, sample: SampleIdx, missing_rate: f64, rng: &mut R) -> SampleCalls {
    let h0 = truth.haplotype(sample.hap1());
    let h1 = truth.haplotype(sample.hap2());
    let calls: Vec<Call> = h0
        .iter()
        .zip(&h1)
        .map(|(&a, &b)| {
            if rng.random::<f64>() < missing_rate {
                Call::Missing
            } else {
                Call::from_alleles(a, b)
            }
        })
        .collect();

    let constraints = if sample.0 % 4 == 0 {
        calls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_het())
            .take(2)
            .map(|(site, _)| PhaseConstraint::new(sample.0, site, h0[site], h1[site]))
            .collect()
    } else {
        Vec::new()
    };
    SampleCalls::new(calls).with_constraints(constraints)
}

/// Accuracy of a run against the truth panel
#[derive(Debug, Default)]
struct Summary {
    switch_errors: usize,
    het_pairs: usize,
    imputed_correct: usize,
    imputed: usize,
    unresolved: usize,
    fallbacks: usize,
}

impl Summary {
    fn collect(truth: &BitMatrix, samples: &[SampleCalls], phased: &[PhasedSample]) -> Self {
        let mut summary = Self::default();
        for (p, calls) in phased.iter().zip(samples) {
            let t0 = truth.haplotype(p.sample.hap1());
            let t1 = truth.haplotype(p.sample.hap2());
            summary.unresolved += p.unresolved_sites.len();
            summary.fallbacks += usize::from(p.fallback);

            let mut prev_flip: Option<bool> = None;
            for (site, call) in calls.calls.iter().enumerate() {
                let (a0, a1) = (p.haplotypes[0][site], p.haplotypes[1][site]);
                match call {
                    Call::Het => {
                        let flip = a0 != t0[site];
                        if let Some(prev) = prev_flip {
                            summary.het_pairs += 1;
                            summary.switch_errors += usize::from(prev != flip);
                        }
                        prev_flip = Some(flip);
                    }
                    Call::Missing => {
                        summary.imputed += 2;
                        let direct = usize::from(a0 == t0[site]) + usize::from(a1 == t1[site]);
                        let swapped = usize::from(a0 == t1[site]) + usize::from(a1 == t0[site]);
                        summary.imputed_correct += direct.max(swapped);
                    }
                    Call::HomRef | Call::HomAlt => {}
                }
            }
        }
        summary
    }

    fn switch_rate(&self) -> f64 {
        ratio(self.switch_errors, self.het_pairs)
    }

    fn imputed_accuracy(&self) -> f64 {
        ratio(self.imputed_correct, self.imputed)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
