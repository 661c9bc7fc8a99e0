use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kolibri::log::GenomeLog;
use tempfile::tempdir;

fn bench_log_append(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.genome");
    let mut log = GenomeLog::open(&path, b"bench-key").unwrap();

    c.bench_function("log_append_one_block", |b| {
        let mut ts = 0u64;
        b.iter(|| {
            ts += 1;
            log.append(black_box("TEST"), black_box("0"), ts).unwrap()
        })
    });
}

criterion_group!(benches, bench_log_append);
criterion_main!(benches);
