use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use distprime::kernel::{count_primes, is_prime};
use distprime::{ComputePool, InlinePool, WorkItem};

fn primality_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_prime");
    for n in [104_729_i64, 2_147_483_647, 1_000_000_007].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, &n| {
            b.iter(|| is_prime(black_box(n)))
        });
    }
    group.finish();
}

fn count_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("count_primes");
    for end in [1_000_i64, 10_000, 100_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(end), end, |b, &end| {
            b.iter(|| count_primes(1, black_box(end)))
        });
    }
    group.finish();
}

fn inline_pool_bench(c: &mut Criterion) {
    let pool = InlinePool;
    c.bench_function("inline_pool_range_10k", |b| {
        b.iter(|| pool.submit(black_box(WorkItem::Range { start: 1, end: 10_000 })))
    });
}

criterion_group!(benches, primality_bench, count_bench, inline_pool_bench);
criterion_main!(benches);
