//! # collapser-rs
//!
//! 请求合并与隔离执行：把并发到达的单个请求合并为一次批量调用，并在有界、限时的隔离环境中执行。
//!
//! Request collapsing with isolated, timeout-bounded batch execution.
//!
//! ## Overview
//!
//! Many callers submit individual requests concurrently. The library groups them
//! into a window bounded by size and time, runs the window as one batch on an
//! isolated executor with a hard timeout and an optional fallback, and hands each
//! caller back its own slice of the batch result exactly once.
//!
//! A second execution shape, [`stream::AsyncStreamCommand`], emits a cancellable
//! sequence of values per subscription instead of collapsing.
//!
//! ## Key Features
//!
//! - **Collapsing**: [`batch::RequestCollapser`] closes a window by size or by time,
//!   whichever comes first
//! - **Isolation**: [`isolation::IsolatedExecutor`] bounds concurrency (rejecting on
//!   saturation), enforces a timeout and applies fallbacks
//! - **Circuit Breaking**: opt-in breaker that short-circuits after consecutive failures
//! - **Streams**: guarded terminal-state machine that drops post-terminal emissions
//! - **Signals**: facts-only snapshots of pool usage and outcome counters
//!
//! ## Quick Start
//!
//! ```rust
//! use collapser_rs::batch::{CollapsedRequest, CollapserConfig, RequestCollapser};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> collapser_rs::Result<()> {
//!     let collapser = RequestCollapser::new(
//!         CollapserConfig::new()
//!             .with_max_batch_size(10)
//!             .with_max_window_duration(Duration::from_millis(50)),
//!         |batch: Vec<CollapsedRequest<u32, u32>>| async move {
//!             // one backend call for the whole window
//!             Ok::<_, collapser_rs::Error>(
//!                 batch.iter().map(|r| format!("v{}", r.argument)).collect::<Vec<_>>(),
//!             )
//!         },
//!     )?;
//!
//!     let results = futures::future::join_all((1..=3).map(|i| collapser.submit(i, i))).await;
//!     for (i, r) in results.into_iter().enumerate() {
//!         assert_eq!(r?, format!("v{}", i + 1));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Request collapser, windows and the batch execution unit |
//! | [`isolation`] | Execution context, isolated executor, fallback, circuit breaker |
//! | [`stream`] | Async stream command with guarded observer delivery |
//! | [`error`] | Unified error type and context |
//! | [`error_code`] | Stable error codes with fallback/retry metadata |

pub mod batch;
pub mod error;
pub mod error_code;
pub mod isolation;
pub mod stream;

mod utils;

pub use batch::{CollapsedRequest, CollapserConfig, RequestCollapser};
pub use isolation::{ExecutionContext, Fallback, IsolatedExecutor};
pub use stream::{AsyncStreamCommand, StreamSession};

use futures::Stream;
use std::pin::Pin;

pub use error::{Error, ErrorContext};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;
