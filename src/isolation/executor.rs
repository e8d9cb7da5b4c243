//! Isolated executor: admission control, hard timeout and fallback for one unit of work.

use super::circuit_breaker::CircuitBreaker;
use super::context::ExecutionContext;
use super::metrics::{ExecutionMetrics, ExecutionSnapshot, Outcome};
use crate::error::IntoExecutionError;
use crate::{Error, ErrorContext, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Substitute result used when execution fails with a fallbackable error.
pub enum Fallback<T> {
    /// A fixed value, cloned for every use.
    Value(T),
    /// Computed from the error that triggered the fallback. May itself fail.
    Function(Arc<dyn Fn(&Error) -> Result<T> + Send + Sync>),
}

impl<T> Fallback<T> {
    pub fn value(value: T) -> Self {
        Fallback::Value(value)
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Error) -> Result<T> + Send + Sync + 'static,
    {
        Fallback::Function(Arc::new(f))
    }
}

impl<T: Clone> Fallback<T> {
    pub fn resolve(&self, err: &Error) -> Result<T> {
        match self {
            Fallback::Value(v) => Ok(v.clone()),
            Fallback::Function(f) => f(err),
        }
    }
}

impl<T: Clone> Clone for Fallback<T> {
    fn clone(&self) -> Self {
        match self {
            Fallback::Value(v) => Fallback::Value(v.clone()),
            Fallback::Function(f) => Fallback::Function(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Fallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Fallback::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Runs units of work on spawned tasks under a bounded permit pool.
///
/// Each admitted unit holds one permit until the spawned task actually finishes, so
/// work abandoned after a timeout keeps counting against the bound until it stops.
/// Apart from pool accounting and outcome counters no state survives a call.
pub struct IsolatedExecutor {
    context: ExecutionContext,
    permits: Arc<Semaphore>,
    breaker: Option<CircuitBreaker>,
    metrics: ExecutionMetrics,
}

impl IsolatedExecutor {
    pub fn new(context: ExecutionContext) -> Result<Self> {
        context.validate()?;
        let permits = Arc::new(Semaphore::new(context.max_concurrent_executions));
        let breaker = context.circuit_breaker.clone().map(CircuitBreaker::new);
        Ok(Self {
            context,
            permits,
            breaker,
            metrics: ExecutionMetrics::default(),
        })
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Run `work` with the context's execution timeout and an optional fallback.
    pub async fn execute<T, E, Fut>(&self, work: Fut, fallback: Option<&Fallback<T>>) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Clone + Send + 'static,
        E: IntoExecutionError + Send + 'static,
    {
        self.run(work, self.context.execution_timeout, fallback).await
    }

    /// Run `work` with an explicit timeout.
    ///
    /// `Rejected`, `ShortCircuited`, `Timeout` and `Execution` failures are replaced by
    /// the fallback when one is given; every other error propagates unchanged.
    pub async fn run<T, E, Fut>(
        &self,
        work: Fut,
        timeout: Duration,
        fallback: Option<&Fallback<T>>,
    ) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Clone + Send + 'static,
        E: IntoExecutionError + Send + 'static,
    {
        match self.isolate(work, timeout).await {
            Ok(v) => Ok(v),
            Err(err) => match fallback {
                Some(fb) if err.is_fallbackable() => self.apply_fallback(&err, fb),
                _ => Err(err),
            },
        }
    }

    /// Admit, spawn and time-bound `work` without any fallback.
    pub async fn isolate<T, E, Fut>(&self, work: Fut, timeout: Duration) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: IntoExecutionError + Send + 'static,
    {
        let permit = self.admit()?;
        let deadline = Instant::now() + timeout;
        let mut handle = tokio::spawn(async move {
            let _permit = permit;
            work.await.map_err(IntoExecutionError::into_execution_error)
        });

        let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
            // Work that blocked its thread past the deadline finishes late, still a Timeout.
            Ok(_) if Instant::now() >= deadline => Err(Error::Timeout { after: timeout }),
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                let msg = if join_err.is_panic() {
                    "unit of work panicked"
                } else {
                    "unit of work aborted"
                };
                Err(Error::execution_with_context(
                    msg,
                    ErrorContext::new().with_source("isolated_executor"),
                ))
            }
            Err(_) => {
                // Best effort: the task stops at its next await point, if it reaches one.
                handle.abort();
                Err(Error::Timeout { after: timeout })
            }
        };

        self.record(&outcome);
        outcome
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        self.metrics.snapshot(
            self.context.max_concurrent_executions,
            self.permits.available_permits(),
            self.breaker.as_ref().map(CircuitBreaker::snapshot),
        )
    }

    pub(crate) fn apply_fallback<T: Clone>(&self, err: &Error, fallback: &Fallback<T>) -> Result<T> {
        self.metrics.record(Outcome::Fallback);
        debug!(code = %err.code(), "applying fallback");
        fallback.resolve(err)
    }

    fn admit(&self) -> Result<OwnedSemaphorePermit> {
        if let Some(breaker) = &self.breaker {
            if let Err(e) = breaker.allow() {
                if matches!(e, Error::ShortCircuited) {
                    self.metrics.record(Outcome::ShortCircuited);
                }
                return Err(e);
            }
        }

        Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            self.metrics.record(Outcome::Rejected);
            warn!(
                max_concurrent_executions = self.context.max_concurrent_executions,
                "execution rejected: concurrency bound reached"
            );
            Error::rejected(
                "concurrency bound reached",
                ErrorContext::new()
                    .with_source("isolated_executor")
                    .with_details(format!(
                        "max_concurrent_executions={}",
                        self.context.max_concurrent_executions
                    )),
            )
        })
    }

    fn record<T>(&self, outcome: &Result<T>) {
        match outcome {
            Ok(_) => {
                self.metrics.record(Outcome::Succeeded);
                if let Some(b) = &self.breaker {
                    b.on_success();
                }
            }
            Err(Error::Cancelled) => {
                // not a dependency failure
                debug!("unit of work ended by cancellation");
                self.metrics.record(Outcome::Cancelled);
            }
            Err(err) => {
                if let Error::Timeout { after } = err {
                    warn!(timeout_ms = after.as_millis() as u64, "unit of work timed out");
                    self.metrics.record(Outcome::TimedOut);
                } else {
                    debug!(error = %err, "unit of work failed");
                    self.metrics.record(Outcome::Failed);
                }
                if let Some(b) = &self.breaker {
                    b.on_failure();
                }
            }
        }
    }
}
