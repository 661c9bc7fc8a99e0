use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kolibri::Pool;

fn bench_pool_tick(c: &mut Criterion) {
    c.bench_function("pool_tick_one_generation", |b| {
        b.iter_batched(
            || {
                let mut pool = Pool::init(2025);
                pool.add_example(0, 1).unwrap();
                pool.add_example(1, 3).unwrap();
                pool.add_example(2, 5).unwrap();
                pool
            },
            |mut pool| {
                pool.tick(black_box(1));
                pool
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_pool_tick);
criterion_main!(benches);
