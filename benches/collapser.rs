//! Benchmarks for request collapsing overhead
//!
//! This benchmark measures:
//! - Single-request round trip through a window that fills immediately
//! - Window fan-out for concurrent submitters
//! - Isolated executor admission and timeout overhead

use collapser_rs::batch::{CollapsedRequest, CollapserConfig, RequestCollapser};
use collapser_rs::isolation::{ExecutionContext, IsolatedExecutor};
use collapser_rs::Error;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::future::join_all;
use std::time::Duration;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn collapser(max_batch_size: usize) -> RequestCollapser<u64, u64, u64> {
    RequestCollapser::new(
        CollapserConfig::new()
            .with_max_batch_size(max_batch_size)
            .with_max_window_duration(Duration::from_millis(1))
            .with_context(ExecutionContext::new().with_max_concurrent_executions(256)),
        |batch: Vec<CollapsedRequest<u64, u64>>| async move {
            Ok::<_, Error>(batch.iter().map(|r| r.argument * 2).collect::<Vec<_>>())
        },
    )
    .unwrap()
}

fn bench_single_request(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("single_request");

    let collapser = rt.block_on(async { collapser(1) });
    let shared = &collapser;
    group.bench_function("window_of_one", |b| {
        b.to_async(&rt)
            .iter(|| async move { black_box(shared.submit(1, 21).await.unwrap()) })
    });

    group.finish();
}

fn bench_full_windows(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("full_windows");

    for size in [8usize, 64, 256] {
        let collapser = rt.block_on(async { collapser(size) });
        let shared = &collapser;
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let results = join_all((0..size as u64).map(|i| shared.submit(i, i))).await;
                black_box(results.len())
            })
        });
    }

    group.finish();
}

fn bench_isolated_execute(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("isolated_executor");

    let executor = IsolatedExecutor::new(ExecutionContext::default()).unwrap();
    let ex = &executor;
    group.bench_function("execute_ready_future", |b| {
        b.to_async(&rt).iter(|| async move {
            black_box(
                ex
                    .execute(async { Ok::<_, Error>(42u64) }, None)
                    .await
                    .unwrap(),
            )
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_request,
    bench_full_windows,
    bench_isolated_execute
);
criterion_main!(benches);
