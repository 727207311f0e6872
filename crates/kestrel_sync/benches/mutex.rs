//! Lock hot-path microbenchmarks.
//!
//! Captures uncontended lock/unlock overhead and contended throughput for the one-byte
//! mutex.

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use kestrel_sync::Mutex;

fn uncontended(c: &mut Criterion) {
    let mutex = Mutex::new(0u64);
    c.bench_function("lock_unlock_uncontended", |b| {
        b.iter(|| {
            *black_box(&mutex).lock() += 1;
        })
    });
}

fn contended(c: &mut Criterion) {
    const THREADS: usize = 4;
    const OPS: usize = 10_000;

    let mut group = c.benchmark_group("contended");
    group.throughput(Throughput::Elements((THREADS * OPS) as u64));
    group.bench_function("4_threads_shared_counter", |b| {
        b.iter(|| {
            let mutex = Arc::new(Mutex::new(0u64));
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let mutex = Arc::clone(&mutex);
                    thread::spawn(move || {
                        for _ in 0..OPS {
                            *mutex.lock() += 1;
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(*mutex.lock(), (THREADS * OPS) as u64);
        })
    });
    group.finish();
}

criterion_group!(benches, uncontended, contended);
criterion_main!(benches);
