//! Microbenchmarks: sequential/random fill, point reads, scans.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tempfile::TempDir;

use stratadb::{Options, ReadOptions, WriteOptions, DB};

const VALUE_SIZE: usize = 100;
const FILL_KEYS: u32 = 10_000;

fn bench_options() -> Options {
    let mut options = Options::default();
    options.create_if_missing = true;
    options
}

fn key(i: u32) -> Vec<u8> {
    format!("{:016}", i).into_bytes()
}

fn fill_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill");
    group.throughput(Throughput::Elements(FILL_KEYS as u64));
    group.sample_size(10);
    group.bench_function("sequential", |b| {
        b.iter_batched(
            || TempDir::new().unwrap(),
            |dir| {
                let db = DB::open(bench_options(), dir.path()).unwrap();
                let write = WriteOptions::default();
                let value = vec![b'x'; VALUE_SIZE];
                for i in 0..FILL_KEYS {
                    db.put(&write, &key(i), &value).unwrap();
                }
            },
            BatchSize::PerIteration,
        )
    });
    group.finish();
}

fn read_random(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let db = DB::open(bench_options(), dir.path()).unwrap();
    let write = WriteOptions::default();
    let value = vec![b'x'; VALUE_SIZE];
    for i in 0..FILL_KEYS {
        db.put(&write, &key(i), &value).unwrap();
    }
    db.compact_range(None, None).unwrap();

    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Elements(1));
    let read = ReadOptions::default();
    let mut x = 1u32;
    group.bench_function("point-hit", |b| {
        b.iter(|| {
            x = x.wrapping_mul(2654435761).wrapping_add(1013904223);
            db.get(&read, &key(x % FILL_KEYS)).unwrap().unwrap()
        })
    });
    group.bench_function("point-miss", |b| {
        b.iter(|| db.get(&read, b"absent-key").unwrap())
    });
    group.finish();
}

fn scan_all(c: &mut Criterion) {
    use stratadb::Iter;
    let dir = TempDir::new().unwrap();
    let db = DB::open(bench_options(), dir.path()).unwrap();
    let write = WriteOptions::default();
    let value = vec![b'x'; VALUE_SIZE];
    for i in 0..FILL_KEYS {
        db.put(&write, &key(i), &value).unwrap();
    }
    db.compact_range(None, None).unwrap();

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(FILL_KEYS as u64));
    group.sample_size(20);
    group.bench_function("full", |b| {
        b.iter(|| {
            let mut it = db.iter(&ReadOptions::default());
            it.seek_to_first();
            let mut n = 0u32;
            while it.valid() {
                n += 1;
                it.next();
            }
            assert_eq!(n, FILL_KEYS);
        })
    });
    group.finish();
}

criterion_group!(benches, fill_sequential, read_random, scan_all);
criterion_main!(benches);
