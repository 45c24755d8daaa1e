//! Allocator micro-benchmarks: churn throughput per search variant and
//! pool slot turnover.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use keel_alloc::{AllocConfig, BsearchAlgo, CoalescingAllocator, PoolAllocator, PoolConfig};
use keel_bench::{churn_trace, TraceOp};

fn bench_churn(c: &mut Criterion) {
    let trace = churn_trace(42, 4096, 2048);
    let mut group = c.benchmark_group("coalescing_churn");
    group.throughput(Throughput::Elements(trace.len() as u64));

    for algo in [BsearchAlgo::Halving, BsearchAlgo::Stepped, BsearchAlgo::Unrolled] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{algo:?}")),
            &trace,
            |b, trace| {
                b.iter(|| {
                    let mut allocator = CoalescingAllocator::new(AllocConfig {
                        granularity: 8,
                        default_arena_size: 64 * 1024,
                        bsearch_algo: algo,
                        ..AllocConfig::default()
                    })
                    .unwrap();
                    let mut live = Vec::new();
                    for op in trace {
                        match *op {
                            TraceOp::Alloc { size, align } => {
                                live.push(allocator.allocate(size, align).unwrap());
                            }
                            TraceOp::Free { index } => {
                                allocator.deallocate(live.swap_remove(index));
                            }
                        }
                    }
                    black_box(allocator.total_free_bytes())
                });
            },
        );
    }
    group.finish();
}

fn bench_pool_turnover(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_turnover");
    group.throughput(Throughput::Elements(1024));
    group.bench_function("single_atom", |b| {
        b.iter(|| {
            let mut pool = PoolAllocator::new(PoolConfig::default()).unwrap();
            let mut ptrs = Vec::with_capacity(1024);
            for _ in 0..1024 {
                ptrs.push(pool.allocate(48, 8).unwrap());
            }
            for ptr in ptrs.drain(..) {
                pool.deallocate(ptr, 48, 8);
            }
            black_box(pool.page_count())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_churn, bench_pool_turnover);
criterion_main!(benches);
