use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kolibri::codec::{decode, encode_unbounded};

fn bench_codec(c: &mut Criterion) {
    let bytes: Vec<u8> = (0..=255u8).cycle().take(256).collect();

    c.bench_function("codec_encode_256_bytes", |b| {
        b.iter(|| encode_unbounded(black_box(&bytes)))
    });

    let digits = encode_unbounded(&bytes);
    c.bench_function("codec_decode_256_bytes", |b| {
        b.iter(|| decode(black_box(&digits)).unwrap())
    });
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
