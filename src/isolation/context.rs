//! Execution context: the isolation policy shared by every unit of work.

use super::circuit_breaker::CircuitBreakerConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Isolation scope for batch executions and stream producers.
///
/// Pure configuration: the context carries no per-call state and is shared read-only
/// by every execution admitted through the [`super::IsolatedExecutor`] built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionContext {
    /// Hard deadline for a single unit of work.
    #[serde(rename = "execution_timeout_ms", with = "crate::utils::duration_ms")]
    pub execution_timeout: Duration,
    /// Bound on units of work in flight at once; admission beyond it is rejected.
    pub max_concurrent_executions: usize,
    /// Opt-in circuit breaker consulted before the concurrency bound.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_millis(1000),
            max_concurrent_executions: 10,
            circuit_breaker: None,
        }
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_executions(mut self, n: usize) -> Self {
        self.max_concurrent_executions = n;
        self
    }

    pub fn with_circuit_breaker(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(cfg);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.execution_timeout.is_zero() {
            return Err(Error::configuration_with_context(
                "execution timeout must be greater than zero",
                ErrorContext::new().with_field_path("execution_timeout_ms"),
            ));
        }
        if self.max_concurrent_executions == 0 {
            return Err(Error::configuration_with_context(
                "at least one concurrent execution must be allowed",
                ErrorContext::new().with_field_path("max_concurrent_executions"),
            ));
        }
        if let Some(cb) = &self.circuit_breaker {
            cb.validate()?;
        }
        Ok(())
    }
}
