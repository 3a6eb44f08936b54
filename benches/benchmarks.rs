use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rephase::data::{BitMatrix, Call, SampleIdx, UniformRecombination};
use rephase::model::{Conditioning, Genotype, ModelParams, PrefixIndex};
use std::hint::black_box;

fn panel(n_sites: usize, n_haps: usize) -> BitMatrix {
    let mut rng = SmallRng::seed_from_u64(7);
    BitMatrix::random_mosaic(n_sites, n_haps, 0, 20, 0.01, &mut rng)
}

/// Benchmark prefix index construction over growing panels
fn bench_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("pbwt_build");

    for n_haps in [100, 400, 1600] {
        let matrix = panel(1_000, n_haps);
        group.throughput(Throughput::Elements((1_000 * n_haps) as u64));

        group.bench_with_input(BenchmarkId::new("haps", n_haps), &matrix, |b, matrix| {
            b.iter(|| black_box(PrefixIndex::build(black_box(matrix))))
        });
    }

    group.finish();
}

/// Benchmark neighbour selection plus segmentation for one sample
fn bench_build_genotype(c: &mut Criterion) {
    let matrix = panel(2_000, 400);
    let index = PrefixIndex::build(&matrix);
    let sample = SampleIdx::new(0);
    let h0 = matrix.haplotype(sample.hap1());
    let h1 = matrix.haplotype(sample.hap2());
    let calls: Vec<Call> = h0.iter().zip(&h1).map(|(&a, &b)| Call::from_alleles(a, b)).collect();

    c.bench_function("select_and_build", |b| {
        b.iter(|| {
            let cond = Conditioning::select(&index, &matrix, sample, 8).unwrap();
            let mut g = Genotype::new(sample, calls.clone(), Vec::new()).unwrap();
            g.build(&cond).unwrap();
            black_box(g.segments().len())
        })
    });
}

/// Benchmark forward-backward over one sample's segments
fn bench_forward_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_backward");
    let params = ModelParams::default();
    let recomb = UniformRecombination::new(0.01);

    for n_sites in [500, 2_000, 8_000] {
        let matrix = panel(n_sites, 200);
        let index = PrefixIndex::build(&matrix);
        let sample = SampleIdx::new(0);
        let h0 = matrix.haplotype(sample.hap1());
        let h1 = matrix.haplotype(sample.hap2());
        let calls: Vec<Call> = h0.iter().zip(&h1).map(|(&a, &b)| Call::from_alleles(a, b)).collect();
        let cond = Conditioning::select(&index, &matrix, sample, 8).unwrap();
        let mut g = Genotype::new(sample, calls, Vec::new()).unwrap();
        g.build(&cond).unwrap();

        group.throughput(Throughput::Elements(g.segments().len() as u64));
        group.bench_with_input(BenchmarkId::new("sites", n_sites), &g, |b, g| {
            b.iter(|| black_box(g.forward_backward(&recomb, &params).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_index_build, bench_build_genotype, bench_forward_backward);
criterion_main!(benches);
