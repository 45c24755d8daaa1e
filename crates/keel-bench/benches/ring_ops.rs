//! Scheduler micro-benchmarks: raw ring throughput and end-to-end
//! submit/execute cycles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use keel_core::{GroupId, WorkerId};
use keel_sched::{ExecutionContext, MpmcRing, Scheduler, SchedulerConfig, WorkItem, WorkgroupDesc};

fn bench_ring_spsc(c: &mut Criterion) {
    const ITEMS: u64 = 10_000;
    let mut group = c.benchmark_group("ring_spsc");
    group.throughput(Throughput::Elements(ITEMS));
    group.bench_function("push_pop", |b| {
        b.iter(|| {
            let ring = Arc::new(MpmcRing::new(1024));
            let producer_ring = Arc::clone(&ring);
            let producer = thread::spawn(move || {
                for i in 0..ITEMS {
                    while producer_ring.push(i).is_err() {
                        std::hint::spin_loop();
                    }
                }
            });
            let mut sum = 0u64;
            let mut seen = 0u64;
            while seen < ITEMS {
                if let Some(v) = ring.pop() {
                    sum += v;
                    seen += 1;
                }
            }
            producer.join().unwrap();
            black_box(sum)
        });
    });
    group.finish();
}

fn bench_submit_execute(c: &mut Criterion) {
    const ITEMS: u64 = 4096;

    fn bump(arg: u64, _ctx: &ExecutionContext<'_>) {
        let counter = arg as usize as *const AtomicU64;
        #[allow(unsafe_code)]
        let counter = unsafe { &*counter };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    let mut group = c.benchmark_group("scheduler_submit");
    group.throughput(Throughput::Elements(ITEMS));
    group.bench_function("four_workers", |b| {
        b.iter(|| {
            let counter = AtomicU64::new(0);
            let mut scheduler = Scheduler::new(
                SchedulerConfig {
                    ring_capacity: 2048,
                    ..SchedulerConfig::default()
                },
                &[WorkgroupDesc::new(4, 0)],
            )
            .unwrap();
            scheduler.begin().unwrap();
            let arg = &counter as *const _ as u64;
            for i in 0..ITEMS {
                while scheduler
                    .submit(GroupId(0), WorkerId((i % 4) as u32), WorkItem::new(bump, arg))
                    .is_err()
                {
                    std::hint::spin_loop();
                }
            }
            while counter.load(Ordering::Relaxed) < ITEMS {
                std::hint::spin_loop();
            }
            scheduler.end();
            black_box(counter.load(Ordering::Relaxed))
        });
    });
    group.finish();
}

criterion_group!(benches, bench_ring_spsc, bench_submit_execute);
criterion_main!(benches);
