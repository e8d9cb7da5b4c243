use super::circuit_breaker::CircuitBreakerSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A facts-only snapshot of an executor's pool and outcome counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub max_concurrent: usize,
    pub available: usize,
    pub in_flight: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub rejected: u64,
    pub short_circuited: u64,
    pub cancelled: u64,
    pub fallbacks: u64,
    pub breaker: Option<CircuitBreakerSnapshot>,
}

#[derive(Debug, Default)]
pub(crate) struct ExecutionMetrics {
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    rejected: AtomicU64,
    short_circuited: AtomicU64,
    cancelled: AtomicU64,
    fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Succeeded,
    Failed,
    TimedOut,
    Rejected,
    ShortCircuited,
    Cancelled,
    Fallback,
}

impl ExecutionMetrics {
    pub(crate) fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Succeeded => &self.succeeded,
            Outcome::Failed => &self.failed,
            Outcome::TimedOut => &self.timed_out,
            Outcome::Rejected => &self.rejected,
            Outcome::ShortCircuited => &self.short_circuited,
            Outcome::Cancelled => &self.cancelled,
            Outcome::Fallback => &self.fallbacks,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        max_concurrent: usize,
        available: usize,
        breaker: Option<CircuitBreakerSnapshot>,
    ) -> ExecutionSnapshot {
        ExecutionSnapshot {
            max_concurrent,
            available,
            in_flight: max_concurrent.saturating_sub(available),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            breaker,
        }
    }
}
