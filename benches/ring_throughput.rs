//! Write/read throughput for typical event sizes

use capture_ring::{checksum::checksum, RingBuffer, RingConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_read");
    let ring = RingBuffer::with_config(&RingConfig::new(4 * 1024 * 1024)).unwrap();
    let mut consumer = ring.consumer().unwrap();

    for size in [64usize, 512, 4096, 65536] {
        let payload = vec![0x5Au8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                ring.write(black_box(payload)).unwrap();
                let msg = consumer.read().unwrap();
                black_box(msg.len());
            })
        });
    }
    group.finish();
}

fn bench_batch_drain(c: &mut Criterion) {
    let ring = RingBuffer::with_config(&RingConfig::new(4 * 1024 * 1024)).unwrap();
    let mut consumer = ring.consumer().unwrap();
    let payload = vec![0xC3u8; 256];

    c.bench_function("write_1000_then_drain", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                ring.write(&payload).unwrap();
            }
            let drained = consumer.drain(|msg| {
                black_box(msg.payload());
            });
            assert_eq!(drained.unwrap(), 1000);
        })
    });
}

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");
    for size in [64usize, 4096, 1 << 20] {
        let data = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| checksum(black_box(data)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_write_read, bench_batch_drain, bench_checksum);
criterion_main!(benches);
