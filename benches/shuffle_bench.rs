//! Shuffle and smoothing throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use peakshap::genomics::{dinuc_shuffle, seeded_rng, GaussianSmoother};
use rand::Rng;

fn random_sequence(len: usize) -> Vec<u8> {
    let mut rng = seeded_rng(42);
    (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
}

fn benchmark_dinuc_shuffle(c: &mut Criterion) {
    let mut group = c.benchmark_group("dinuc_shuffle");
    for len in [1_000usize, 2_114, 10_000] {
        let sequence = random_sequence(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &sequence, |b, seq| {
            let mut rng = seeded_rng(20210304);
            b.iter(|| black_box(dinuc_shuffle(black_box(seq), 20, &mut rng)));
        });
    }
    group.finish();
}

fn benchmark_smoothing(c: &mut Criterion) {
    let smoother = GaussianSmoother::new(7.0, 81).expect("valid kernel");
    let signal: Vec<f32> = (0..1_000).map(|i| (i % 17) as f32).collect();
    c.bench_function("gaussian_smooth_1000", |b| {
        b.iter(|| black_box(smoother.smooth(black_box(&signal))));
    });
}

criterion_group!(benches, benchmark_dinuc_shuffle, benchmark_smoothing);
criterion_main!(benches);
