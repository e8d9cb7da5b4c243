//! Request collapsing: many logical requests, one physical batch execution.
//!
//! # Request Collapsing Module
//!
//! Callers submit individual `(key, argument)` requests concurrently. The collapser
//! buffers them into a window, executes the whole window as one batch on the shared
//! [`crate::isolation::IsolatedExecutor`], and hands the i-th batch value back to the
//! i-th request.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RequestCollapser`] | Accepts submissions and manages the open window |
//! | [`CollapserConfig`] | Window size/time bounds plus the execution context |
//! | [`BatchExecutionUnit`] | Runs the injected batch function and checks result length |
//! | [`CollapsedRequest`] | One buffered request as seen by the batch function |
//! | [`PendingResponse`] | Future resolving to one request's result |
//!
//! ## Window Lifecycle
//!
//! - **Open**: created by the first submission after the previous window closed
//! - **Close by size**: the submission that fills the window closes it on the spot
//! - **Close by time**: `max_window_duration` after the window opened
//! - **Dispatch**: the closed window runs as one batch; it is never reused
//!
//! ## Failure Semantics
//!
//! A window succeeds or fails as a whole. On failure every request in it receives
//! the same error, or the configured fallback when the error is fallbackable. A
//! result of the wrong length fails every request with `Error::Mapping`, which no
//! fallback masks. Nothing is retried; resubmit to retry.

mod collapser;
mod unit;
mod window;

pub use collapser::{CollapserBuilder, CollapserConfig, CollapserStats, PendingResponse, RequestCollapser};
pub use unit::BatchExecutionUnit;
pub use window::CollapsedRequest;
