use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ec_core::{DmlConfig, LearnerConfig};
use ec_inference::dml::partially_linear;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

fn synthetic(n: usize, p: usize, seed: u64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x: Vec<f64> = (0..n * p).map(|_| rng.gen_range(0.0..1.0)).collect();
    let d: Vec<f64> = x.chunks(p).map(|r| if r[0] + rng.gen_range(-0.3..0.3) > 0.5 { 1.0 } else { 0.0 }).collect();
    let y: Vec<f64> = x.chunks(p).zip(&d).map(|(r, di)| 0.4 * di + r[0] - r[1] + rng.gen_range(-1.0..1.0)).collect();
    (x, y, d)
}

fn bench_crossfit(c: &mut Criterion) {
    let mut group = c.benchmark_group("crossfit");
    group.sample_size(10);

    let linear = DmlConfig {
        outcome_learner: LearnerConfig::Linear { ridge: 1.0 },
        treatment_learner: LearnerConfig::Linear { ridge: 1.0 },
        ..Default::default()
    };
    let forest = DmlConfig {
        outcome_learner: LearnerConfig::Forest { n_trees: 50, max_depth: 6, min_samples_leaf: 5, max_features: 0.5 },
        treatment_learner: LearnerConfig::Forest { n_trees: 50, max_depth: 6, min_samples_leaf: 5, max_features: 0.5 },
        ..Default::default()
    };

    for &n in &[1_000usize, 10_000] {
        let (x, y, d) = synthetic(n, 8, 42);
        group.bench_with_input(BenchmarkId::new("linear", n), &n, |b, _| {
            b.iter(|| black_box(partially_linear(&x, 8, &y, &d, &linear, 7)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("forest", n), &n, |b, _| {
            b.iter(|| black_box(partially_linear(&x, 8, &y, &d, &forest, 7)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_crossfit);
criterion_main!(benches);
