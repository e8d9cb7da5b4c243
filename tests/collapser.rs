//! Request collapser behaviour: windowing, positional fan-out and window-wide failures.

mod common;

use collapser_rs::batch::{CollapsedRequest, CollapserConfig, RequestCollapser};
use collapser_rs::isolation::{ExecutionContext, Fallback};
use collapser_rs::Error;
use futures::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

fn echo(
    batch: Vec<CollapsedRequest<u32, u32>>,
) -> impl Future<Output = Result<Vec<String>, Error>> {
    async move { Ok(batch.iter().map(|r| format!("v{}", r.argument)).collect()) }
}

fn config(max_batch_size: usize, window_ms: u64) -> CollapserConfig {
    CollapserConfig::new()
        .with_max_batch_size(max_batch_size)
        .with_max_window_duration(Duration::from_millis(window_ms))
}

#[tokio::test(start_paused = true)]
async fn test_example_window_of_three() {
    common::init_tracing();
    let collapser = RequestCollapser::new(config(10, 50), echo).unwrap();

    let results = join_all([1, 2, 3].map(|i| collapser.submit(i, i))).await;
    let values: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(values, vec!["v1", "v2", "v3"]);
    assert_eq!(collapser.stats().windows_dispatched, 1);
}

#[tokio::test(start_paused = true)]
async fn test_positional_correctness_for_every_window_size() {
    let max = 10;
    for n in 1..=max {
        let collapser = RequestCollapser::new(config(max, 20), echo).unwrap();
        // arguments deliberately out of numeric order
        let args: Vec<u32> = (0..n as u32).map(|i| (i * 7 + 3) % 13).collect();
        let results = join_all(args.iter().map(|a| collapser.submit(*a, *a))).await;

        for (arg, result) in args.iter().zip(results) {
            assert_eq!(result.unwrap(), format!("v{}", arg), "window size {}", n);
        }
        assert_eq!(collapser.stats().windows_dispatched, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_window_closes_by_time_when_not_full() {
    let collapser = RequestCollapser::new(config(100, 50), echo).unwrap();
    let start = Instant::now();

    let results = join_all((0..5).map(|i| collapser.submit(i, i))).await;
    let waited = start.elapsed();

    assert!(results.iter().all(|r| r.is_ok()));
    assert!(waited >= Duration::from_millis(50), "closed early: {:?}", waited);
    assert!(waited < Duration::from_millis(60), "closed late: {:?}", waited);
}

#[tokio::test(start_paused = true)]
async fn test_late_timer_task_still_closes_window_on_time() {
    let collapser = RequestCollapser::new(config(100, 50), echo).unwrap();
    let start = Instant::now();

    let pending = collapser.enqueue(7, 7).unwrap();
    // the clock moves on before the timer task is first polled
    tokio::time::advance(Duration::from_millis(30)).await;
    assert_eq!(pending.await.unwrap(), "v7");

    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(50), "closed early: {:?}", waited);
    assert!(waited < Duration::from_millis(60), "closed late: {:?}", waited);
}

#[tokio::test(start_paused = true)]
async fn test_window_closes_immediately_when_full() {
    let collapser = RequestCollapser::new(config(4, 10_000), echo).unwrap();
    let start = Instant::now();

    let results = join_all((0..4).map(|i| collapser.submit(i, i))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(collapser.stats().pending, 0);
}

#[tokio::test(start_paused = true)]
async fn test_single_request_filling_window_skips_timer() {
    let collapser = RequestCollapser::new(config(1, 10_000), echo).unwrap();
    let start = Instant::now();
    assert_eq!(collapser.submit(9, 9).await.unwrap(), "v9");
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_submission_after_close_lands_in_next_window() {
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&sizes);
    let collapser = RequestCollapser::new(config(2, 30), move |batch: Vec<CollapsedRequest<u32, u32>>| {
        recorded.lock().unwrap().push(batch.len());
        echo(batch)
    })
    .unwrap();

    let results = join_all((0..5).map(|i| collapser.submit(i, i))).await;
    for (i, r) in results.into_iter().enumerate() {
        assert_eq!(r.unwrap(), format!("v{}", i));
    }

    let sizes = sizes.lock().unwrap().clone();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(collapser.stats().requests_dispatched, 5);
}

#[tokio::test(start_paused = true)]
async fn test_idle_collapser_never_executes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let collapser = RequestCollapser::new(config(10, 10), move |batch: Vec<CollapsedRequest<u32, u32>>| {
        counter.fetch_add(1, Ordering::SeqCst);
        echo(batch)
    })
    .unwrap();

    assert_eq!(collapser.submit(1, 1).await.unwrap(), "v1");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(collapser.flush().unwrap(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_length_fails_every_request_with_mapping_error() {
    let collapser = RequestCollapser::builder()
        .with_config(config(10, 10))
        .with_fallback(Fallback::value("masked".to_string()))
        .build(|batch: Vec<CollapsedRequest<u32, u32>>| async move {
            Ok::<_, Error>(batch.iter().skip(1).map(|r| r.argument.to_string()).collect::<Vec<_>>())
        })
        .unwrap();

    let results = join_all((0..3).map(|i| collapser.submit(i, i))).await;
    for r in results {
        assert!(matches!(
            r,
            Err(Error::Mapping {
                expected: 3,
                actual: 2
            })
        ));
    }
    assert_eq!(collapser.executor().snapshot().fallbacks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_failure_is_shared_and_not_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let collapser = RequestCollapser::new(config(10, 10), move |_batch: Vec<CollapsedRequest<u32, u32>>| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Err::<Vec<String>, _>("backend unavailable") }
    })
    .unwrap();

    let results = join_all((0..4).map(|i| collapser.submit(i, i))).await;
    for r in results {
        match r {
            Err(Error::Execution { message, .. }) => assert_eq!(message, "backend unavailable"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_function_resolves_each_request() {
    let collapser = RequestCollapser::builder()
        .with_config(config(10, 10))
        .with_fallback(Fallback::function(|e: &Error| Ok(format!("fallback:{}", e.code()))))
        .build(|_batch: Vec<CollapsedRequest<u32, u32>>| async move {
            Err::<Vec<String>, _>("nope")
        })
        .unwrap();

    let results = join_all((0..3).map(|i| collapser.submit(i, i))).await;
    for r in results {
        assert_eq!(r.unwrap(), "fallback:E3001");
    }
    assert_eq!(collapser.executor().snapshot().fallbacks, 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_whole_window() {
    let collapser = RequestCollapser::new(
        config(10, 10).with_context(
            ExecutionContext::new().with_execution_timeout(Duration::from_millis(100)),
        ),
        |batch: Vec<CollapsedRequest<u32, u32>>| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            echo(batch).await
        },
    )
    .unwrap();

    let start = Instant::now();
    let results = join_all((0..2).map(|i| collapser.submit(i, i))).await;
    for r in results {
        assert!(matches!(r, Err(Error::Timeout { after }) if after == Duration::from_millis(100)));
    }
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(collapser.executor().snapshot().timed_out, 1);
}

#[tokio::test]
async fn test_saturated_pool_rejects_window() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let (s, r, counter) = (Arc::clone(&started), Arc::clone(&release), Arc::clone(&calls));

    let collapser = RequestCollapser::new(
        config(1, 10).with_context(
            ExecutionContext::new()
                .with_max_concurrent_executions(1)
                .with_execution_timeout(Duration::from_secs(30)),
        ),
        move |batch: Vec<CollapsedRequest<u32, u32>>| {
            counter.fetch_add(1, Ordering::SeqCst);
            let (s, r) = (Arc::clone(&s), Arc::clone(&r));
            async move {
                s.notify_one();
                r.notified().await;
                echo(batch).await
            }
        },
    )
    .unwrap();

    let first = collapser.enqueue(1, 1).unwrap();
    started.notified().await;

    let second = collapser.submit(2, 2).await;
    assert!(matches!(second, Err(Error::Rejected { .. })));

    release.notify_one();
    assert_eq!(first.await.unwrap(), "v1");
    assert_eq!(collapser.executor().snapshot().rejected, 1);
    // the rejected window never reached the batch function
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_never_cross_contaminate() {
    common::init_tracing();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let collapser = RequestCollapser::new(
        config(16, 2).with_context(ExecutionContext::new().with_max_concurrent_executions(64)),
        move |batch: Vec<CollapsedRequest<u32, u32>>| {
            recorded
                .lock()
                .unwrap()
                .extend(batch.iter().map(|r| r.argument));
            echo(batch)
        },
    )
    .unwrap();

    let mut tasks = Vec::new();
    for t in 0..8u32 {
        let c = collapser.clone();
        tasks.push(tokio::spawn(async move {
            let mut out = Vec::new();
            for j in 0..50u32 {
                let arg = t * 1000 + j;
                out.push((arg, c.submit(arg, arg).await));
            }
            out
        }));
    }

    for task in tasks {
        for (arg, result) in task.await.unwrap() {
            assert_eq!(result.unwrap(), format!("v{}", arg));
        }
    }

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 400);
    let unique: HashSet<u32> = seen.into_iter().collect();
    assert_eq!(unique.len(), 400);
    assert_eq!(collapser.stats().requests_dispatched, 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueue_burst_resolves_every_request_once() {
    let collapser = RequestCollapser::new(
        config(7, 5).with_context(ExecutionContext::new().with_max_concurrent_executions(64)),
        echo,
    )
    .unwrap();

    let handles: Vec<_> = (0..200u32)
        .map(|i| {
            let c = collapser.clone();
            tokio::spawn(async move { (i, c.submit(i % 3, i).await) })
        })
        .collect();

    for h in handles {
        let (i, r) = h.await.unwrap();
        assert_eq!(r.unwrap(), format!("v{}", i));
    }
    let stats = collapser.stats();
    assert_eq!(stats.requests_dispatched, 200);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_dropped_collapser_still_resolves_open_window() {
    let collapser = RequestCollapser::new(config(10, 5), echo).unwrap();
    let pending = collapser.enqueue(4, 4).unwrap();
    drop(collapser);
    assert_eq!(pending.await.unwrap(), "v4");
}
