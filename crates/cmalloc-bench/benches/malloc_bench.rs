//! Allocator benchmarks: cmalloc against the system allocator.

use std::hint::black_box;
use std::ptr::NonNull;

use cmalloc_core::MallocState;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768, 65536];
    let state = MallocState::new();
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("cmalloc", size), &size, |b, &sz| {
            b.iter(|| {
                let p = state.allocate(black_box(sz));
                // SAFETY: p came from `state` and is released once.
                unsafe { state.release(black_box(p)) };
            });
        });
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| {
                // SAFETY: plain malloc/free pair.
                unsafe {
                    let p = libc::malloc(black_box(sz));
                    libc::free(black_box(p));
                }
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let state = MallocState::new();
    let mut group = c.benchmark_group("alloc_burst");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("cmalloc/1000x64B", |b| {
        let mut blocks: Vec<Option<NonNull<u8>>> = Vec::with_capacity(1000);
        b.iter(|| {
            blocks.extend((0..1000).map(|_| state.allocate(64)));
            for p in blocks.drain(..) {
                // SAFETY: each block is live and released once.
                unsafe { state.release(p) };
            }
        });
    });
    group.bench_function("system/1000x64B", |b| {
        let mut blocks: Vec<*mut libc::c_void> = Vec::with_capacity(1000);
        b.iter(|| {
            // SAFETY: plain malloc/free pairs.
            unsafe {
                blocks.extend((0..1000).map(|_| libc::malloc(64)));
                for p in blocks.drain(..) {
                    libc::free(p);
                }
            }
        });
    });

    group.finish();
}

fn bench_realloc_chain(c: &mut Criterion) {
    let state = MallocState::new();
    let mut group = c.benchmark_group("realloc_chain");

    group.bench_function("cmalloc/16B_to_1MiB", |b| {
        b.iter(|| {
            let mut p = state.allocate(16);
            let mut size = 16;
            while size < (1 << 20) {
                size *= 2;
                // SAFETY: p is live and replaced by the result.
                p = unsafe { state.resize(p, size) };
            }
            // SAFETY: p is live.
            unsafe { state.release(p) };
        });
    });
    group.bench_function("system/16B_to_1MiB", |b| {
        b.iter(|| {
            // SAFETY: plain malloc/realloc/free chain.
            unsafe {
                let mut p = libc::malloc(16);
                let mut size = 16;
                while size < (1 << 20) {
                    size *= 2;
                    p = libc::realloc(p, size);
                }
                libc::free(p);
            }
        });
    });

    group.finish();
}

fn bench_zeroed(c: &mut Criterion) {
    let state = MallocState::new();
    let mut group = c.benchmark_group("calloc");

    for &count in &[64usize, 4096, 65536] {
        group.bench_with_input(BenchmarkId::new("cmalloc", count), &count, |b, &n| {
            b.iter(|| {
                let p = state.zero_allocate(black_box(n), 8);
                // SAFETY: p is live.
                unsafe { state.release(p) };
            });
        });
        group.bench_with_input(BenchmarkId::new("system", count), &count, |b, &n| {
            b.iter(|| {
                // SAFETY: plain calloc/free pair.
                unsafe { libc::free(libc::calloc(black_box(n), 8)) };
            });
        });
    }
    group.finish();
}

fn bench_threads(c: &mut Criterion) {
    let state = MallocState::new();
    let mut group = c.benchmark_group("threads");
    group.sample_size(20);

    for &threads in &[1usize, 4] {
        group.bench_with_input(
            BenchmarkId::new("cmalloc", threads),
            &threads,
            |b, &workers| {
                b.iter(|| {
                    std::thread::scope(|s| {
                        for _ in 0..workers {
                            s.spawn(|| {
                                for i in 0..2000usize {
                                    let p = state.allocate(16 + i % 512);
                                    // SAFETY: p is live and released once.
                                    unsafe { state.release(p) };
                                }
                            });
                        }
                    });
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_alloc_burst,
    bench_realloc_chain,
    bench_zeroed,
    bench_threads
);
criterion_main!(benches);
