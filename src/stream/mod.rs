//! Incremental execution: one subscription, many values, exactly one terminal event.
//!
//! # Async Stream Module
//!
//! [`AsyncStreamCommand`] is the alternative to collapsing: instead of one value per
//! request, a producer emits a lazy sequence through a [`Subscriber`] and ends it
//! with `on_completed` or `on_error`.
//!
//! ## State Machine
//!
//! ```text
//! Active --on_next--> Active
//! Active --on_completed--> Completed
//! Active --on_error--> Errored
//! Active --cancel--> Cancelled
//! ```
//!
//! All three right-hand states are absorbing. The subscriber drops anything a
//! producer emits after a terminal event, including a second `on_completed`.
//! Cancellation is cooperative: producers check [`Subscriber::is_cancelled`] between
//! emissions, or return early through [`Subscriber::check_cancelled`] and `?`.
//! An emission already past that check when `cancel()` runs may still be delivered.
//!
//! ```rust
//! use collapser_rs::isolation::{ExecutionContext, IsolatedExecutor};
//! use collapser_rs::stream::{AsyncStreamCommand, Subscriber};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let executor = Arc::new(IsolatedExecutor::new(ExecutionContext::default())?);
//! let command = AsyncStreamCommand::new(executor, |sub: Subscriber<String>| async move {
//!     for greeting in ["Hello1", "Hello2", "World"] {
//!         sub.check_cancelled()?;
//!         sub.on_next(greeting.to_string());
//!     }
//!     sub.on_completed();
//!     Ok::<_, collapser_rs::Error>(())
//! });
//!
//! let (stream, _session) = command.observe()?;
//! let values: Vec<String> = stream.map(|v| v.unwrap()).collect().await;
//! assert_eq!(values, ["Hello1", "Hello2", "World"]);
//! # Ok::<(), collapser_rs::Error>(())
//! # }).unwrap();
//! ```

mod command;
mod session;

pub use command::AsyncStreamCommand;
pub use session::{Observer, StreamSession, StreamState, Subscriber};
