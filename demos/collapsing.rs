//! Hello-world tour: a collapsed lookup, an isolated command, and an async stream.
//!
//! Run with: `RUST_LOG=collapser_rs=debug cargo run --example collapsing`

use collapser_rs::batch::{CollapsedRequest, CollapserConfig, RequestCollapser};
use collapser_rs::isolation::{ExecutionContext, Fallback, IsolatedExecutor};
use collapser_rs::stream::{AsyncStreamCommand, Subscriber};
use collapser_rs::Error;
use futures::future::join_all;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let executor = Arc::new(IsolatedExecutor::new(
        ExecutionContext::new().with_execution_timeout(Duration::from_millis(5000)),
    )?);

    // 1. Collapsing: four concurrent lookups become one batch call.
    let collapser = RequestCollapser::builder()
        .with_executor(Arc::clone(&executor))
        .with_config(
            CollapserConfig::new()
                .with_max_batch_size(10)
                .with_max_window_duration(Duration::from_millis(10)),
        )
        .build(|batch: Vec<CollapsedRequest<u32, u32>>| async move {
            println!("batch call with {} requests", batch.len());
            Ok::<_, Error>(
                batch
                    .iter()
                    .map(|r| format!("ValueForKey: {}", r.argument))
                    .collect::<Vec<_>>(),
            )
        })?;

    let results = join_all((1..=4).map(|i| collapser.submit(i, i))).await;
    for result in results {
        println!("{}", result?);
    }
    println!("collapser stats: {:?}", collapser.stats());

    // 2. Isolated command with a fallback for a failing dependency.
    let greeting = executor
        .execute(async { Ok::<_, Error>("Hello World!".to_string()) }, None)
        .await?;
    println!("{}", greeting);

    let degraded = executor
        .execute(
            async { Err::<String, _>("dependency unavailable") },
            Some(&Fallback::value("Hello Failure World!".to_string())),
        )
        .await?;
    println!("{}", degraded);

    // 3. Async stream whose producer completes twice and keeps emitting.
    let name = "World".to_string();
    let command = AsyncStreamCommand::new(Arc::clone(&executor), move |sub: Subscriber<String>| {
        let name = name.clone();
        async move {
            if !sub.is_cancelled() {
                sub.on_next("Hello1".to_string());
                sub.on_next("Hello2".to_string());
                sub.on_next(name);
                sub.on_completed();
                // dropped: the stream is already complete
                sub.on_completed();
                sub.on_next("abc".to_string());
            }
            Ok::<_, Error>(())
        }
    });

    let (mut stream, session) = command.observe()?;
    while let Some(item) = stream.next().await {
        println!("stream item: {}", item?);
    }
    println!("stream {} ended as {}", session.id(), session.state());

    println!("executor snapshot: {:?}", executor.snapshot());
    Ok(())
}
