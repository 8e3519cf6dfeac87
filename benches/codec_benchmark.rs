//! Envelope codec throughput at the production KDF setting.
//!
//! Run with: `cargo bench --bench codec_benchmark`
//!
//! PBKDF2 dominates: every encrypt and decrypt derives a fresh data key, so
//! payload size barely moves the numbers until it reaches tens of kilobytes.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use phivault::audit::AuditLog;
use phivault::{generate_secret, EnvelopeCodec, KeyRegistry};

fn benchmark_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");
    group.sample_size(20); // Each operation runs 100k PBKDF2 iterations.

    let registry = Arc::new(KeyRegistry::in_memory());
    registry.bootstrap(generate_secret().unwrap()).unwrap();
    let codec = EnvelopeCodec::new(registry, AuditLog::shared());

    let sizes = [("100B", 100), ("1KB", 1024), ("10KB", 10 * 1024)];

    for (name, size) in sizes {
        let plaintext = "x".repeat(size);
        let blob = codec.encrypt(&plaintext).unwrap().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            criterion::BenchmarkId::new("encrypt", name),
            &plaintext,
            |b, plaintext| b.iter(|| codec.encrypt(black_box(plaintext)).unwrap()),
        );
        group.bench_with_input(
            criterion::BenchmarkId::new("decrypt", name),
            &blob,
            |b, blob| b.iter(|| codec.decrypt(black_box(blob)).unwrap()),
        );
    }
    group.finish();
}

criterion_group!(benches, benchmark_codec);
criterion_main!(benches);
