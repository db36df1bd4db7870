// Read performance benchmarks for emberkv

use emberkv::{Options, DB};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tempfile::TempDir;

fn populate(db: &DB, count: usize) {
    for i in 0..count {
        let key = format!("key{:08}", i);
        let value = format!("value{:08}", i);
        db.put(key.as_bytes(), value.as_bytes()).unwrap();
    }
}

fn benchmark_random_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_read");

    for size in [100, 1000, 10000].iter() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), Options::default()).unwrap();
        populate(&db, *size);
        db.flush().unwrap();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                use rand::Rng;
                let mut rng = rand::rng();

                for _ in 0..size {
                    let key_num: usize = rng.random_range(0..size);
                    let key = format!("key{:08}", key_num);
                    black_box(db.get(key.as_bytes()).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn benchmark_memtable_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable_read");

    let temp_dir = TempDir::new().unwrap();
    let db = DB::open(temp_dir.path(), Options::default()).unwrap();
    populate(&db, 1000);

    group.throughput(Throughput::Elements(1000));
    group.bench_function("memtable_hits", |b| {
        b.iter(|| {
            for i in 0..1000 {
                let key = format!("key{:08}", i);
                black_box(db.get(key.as_bytes()).unwrap());
            }
        });
    });

    group.finish();
}

fn benchmark_read_missing_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_missing");

    let temp_dir = TempDir::new().unwrap();
    let db = DB::open(temp_dir.path(), Options::default()).unwrap();
    populate(&db, 1000);
    db.flush().unwrap();

    group.throughput(Throughput::Elements(1000));
    group.bench_function("missing_keys", |b| {
        b.iter(|| {
            // Keys 1000-1999 were never written
            for i in 1000..2000 {
                let key = format!("key{:08}", i);
                black_box(db.get(key.as_bytes()).unwrap());
            }
        });
    });

    group.finish();
}

fn benchmark_lookup_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_fan_out");

    // Same 8 runs probed one after another and on one thread per run
    for (name, threshold) in [("sequential", usize::MAX), ("parallel", 1)] {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), Options::default().parallel_lookup_threshold(threshold)).unwrap();
        for run in 0..8 {
            for i in 0..1000 {
                let key = format!("key{:08}", i);
                let value = format!("run{}-value{:08}", run, i);
                db.put(key.as_bytes(), value.as_bytes()).unwrap();
            }
            db.flush().unwrap();
        }

        group.throughput(Throughput::Elements(100));
        group.bench_function(name, |b| {
            b.iter(|| {
                for i in (0..1000).step_by(10) {
                    let key = format!("key{:08}", i);
                    black_box(db.get(key.as_bytes()).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn benchmark_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    let temp_dir = TempDir::new().unwrap();
    let db = DB::open(temp_dir.path(), Options::default()).unwrap();
    for run in 0..4 {
        for i in (run..10000).step_by(4) {
            let key = format!("key{:08}", i);
            db.put(key.as_bytes(), b"value").unwrap();
        }
        db.flush().unwrap();
    }

    group.throughput(Throughput::Elements(10000));
    group.bench_function("full_scan_4_runs", |b| {
        b.iter(|| {
            let count = db.iter().unwrap().map(|item| item.unwrap()).count();
            black_box(count);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_random_read,
    benchmark_memtable_read,
    benchmark_read_missing_keys,
    benchmark_lookup_fan_out,
    benchmark_scan
);
criterion_main!(benches);
