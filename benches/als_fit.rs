use alspca::pca::{
    AlsConfig, AlsPca, DensePartitionedMatrix, GramAccumulator, Parallelism, PhaseRunner,
    TransformKind,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_store(nrows: usize, ncols: usize) -> DensePartitionedMatrix {
    let mut rng = StdRng::seed_from_u64(0x5EED_A15 + nrows as u64);
    let data = Array2::from_shape_fn((nrows, ncols), |_| rng.sample::<f64, _>(Standard));
    DensePartitionedMatrix::from_array(data.view(), 1024, TransformKind::Standardize)
        .expect("benchmark store")
}

fn benchmark_gram(c: &mut Criterion) {
    let stores: Vec<_> = [2_000_usize, 20_000]
        .iter()
        .map(|&rows| (rows, random_store(rows, 32)))
        .collect();
    let runner = PhaseRunner::new(Parallelism::Rayon, None).expect("thread pool");

    let mut group = c.benchmark_group("store_gram");
    for (rows, store) in stores.iter() {
        group.throughput(Throughput::Elements((*rows * 32) as u64));
        group.bench_with_input(BenchmarkId::new("rayon", rows), store, |b, input| {
            b.iter(|| {
                let gram = GramAccumulator::new(&runner).store_gram(black_box(input));
                black_box(gram);
            });
        });
    }
    group.finish();
}

fn benchmark_fit(c: &mut Criterion) {
    let store = random_store(5_000, 24);
    let mut group = c.benchmark_group("als_fit");
    group.sample_size(10);
    for parallelism in [Parallelism::Sequential, Parallelism::Rayon] {
        let label = format!("{parallelism:?}");
        group.bench_with_input(BenchmarkId::new("k4", label), &store, |b, input| {
            b.iter(|| {
                let outcome = AlsPca::new(AlsConfig {
                    seed: Some(1),
                    max_iterations: 25,
                    parallelism,
                    ..AlsConfig::with_k(4)
                })
                .fit(black_box(input))
                .expect("fit");
                black_box(outcome);
            });
        });
    }
    group.finish();
}

criterion_group!(als, benchmark_gram, benchmark_fit);
criterion_main!(als);
