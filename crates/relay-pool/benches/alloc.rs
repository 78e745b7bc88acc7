//! Pool churn benchmarks: the alloc/free cycle is the router's hottest
//! non-I/O path.

use criterion::{criterion_group, criterion_main, Criterion};
use relay_pool::{alloc, pool_type, AllocConfig};
use std::hint::black_box;

struct Small {
    _v: [u64; 4],
}
pool_type!(Small, "bench_small");

struct Big {
    _v: [u64; 64],
}
pool_type!(Big, "bench_big");

struct Batched {
    _v: u64,
}
pool_type!(
    Batched,
    "bench_batched",
    config = AllocConfig::new(64, 128, 0)
);

fn bench_alloc_free(c: &mut Criterion) {
    c.bench_function("alloc_free_small", |b| {
        b.iter(|| black_box(alloc(Small { _v: [0; 4] })));
    });

    c.bench_function("alloc_free_big", |b| {
        b.iter(|| black_box(alloc(Big { _v: [0; 64] })));
    });

    // Holding a window of live items exercises the rebalance paths, not
    // just the local fast path.
    c.bench_function("alloc_free_windowed", |b| {
        let mut window = Vec::with_capacity(256);
        b.iter(|| {
            window.push(alloc(Batched { _v: 0 }));
            if window.len() == 256 {
                window.clear();
            }
        });
    });
}

criterion_group!(benches, bench_alloc_free);
criterion_main!(benches);
