//! Isolation primitives: bounded concurrency, hard timeouts and fallbacks.
//!
//! # Isolation Module
//!
//! Every batch execution and stream producer runs through an [`IsolatedExecutor`] so
//! that a slow or failing dependency cannot exhaust shared resources.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ExecutionContext`] | Timeout, concurrency bound and optional breaker (config only) |
//! | [`IsolatedExecutor`] | Admits, spawns and time-bounds one unit of work |
//! | [`Fallback`] | Substitute value or function for recoverable failures |
//! | [`CircuitBreaker`] | Fails fast after consecutive failures |
//! | [`ExecutionSnapshot`] | Facts-only view of pool usage and outcome counters |
//!
//! ## Failure Modes
//!
//! - **Rejected**: the concurrency bound is reached; no waiting queue
//! - **ShortCircuited**: the circuit breaker is open
//! - **Timeout**: the deadline elapsed; the task is sent an abort but may keep running
//!   until its next await point
//! - **Execution**: the unit of work returned an error or panicked
//!
//! All four are recoverable through a [`Fallback`]. Anything else propagates.
//!
//! ```rust
//! use collapser_rs::isolation::{ExecutionContext, Fallback, IsolatedExecutor};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let executor = IsolatedExecutor::new(
//!     ExecutionContext::new()
//!         .with_execution_timeout(Duration::from_millis(200))
//!         .with_max_concurrent_executions(4),
//! )?;
//!
//! let fallback = Fallback::value("cached".to_string());
//! let value = executor
//!     .execute(async { Err::<String, _>("upstream unavailable") }, Some(&fallback))
//!     .await?;
//! assert_eq!(value, "cached");
//! # Ok::<(), collapser_rs::Error>(())
//! # }).unwrap();
//! ```

pub mod circuit_breaker;
mod context;
mod executor;
mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
pub use context::ExecutionContext;
pub use executor::{Fallback, IsolatedExecutor};
pub use metrics::ExecutionSnapshot;
