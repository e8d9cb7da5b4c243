//! Admission-time circuit breaker.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Point-in-time view of a breaker, embedded in [`super::ExecutionSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Set while the breaker short-circuits admissions.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed executions that open the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker short-circuits before admitting again.
    #[serde(rename = "cooldown_ms", with = "crate::utils::duration_ms")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(5),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::configuration_with_context(
                "failure threshold must be greater than zero",
                ErrorContext::new().with_field_path("circuit_breaker.failure_threshold"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed { failures: u32 },
    /// Short-circuiting until `until`; the first admission check after it closes the breaker.
    Open { until: Instant, failures: u32 },
}

/// Fails admissions fast once a dependency has failed `failure_threshold` times in a row.
///
/// The executor consults [`CircuitBreaker::allow`] before taking a permit and reports
/// every finished execution back. Only timeouts and execution failures count;
/// rejected, short-circuited and cancelled work never reaches the breaker. Time is
/// read from the tokio clock, so a paused test runtime controls the cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    phase: Mutex<Phase>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            phase: Mutex::new(Phase::Closed { failures: 0 }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Phase>> {
        self.phase.lock().map_err(|_| {
            Error::runtime_with_context(
                "circuit breaker state poisoned",
                ErrorContext::new().with_source("circuit_breaker"),
            )
        })
    }

    /// Admission check: `Err(Error::ShortCircuited)` while open.
    pub fn allow(&self) -> Result<()> {
        let mut phase = self.lock()?;
        if let Phase::Open { until, .. } = *phase {
            if Instant::now() < until {
                return Err(Error::ShortCircuited);
            }
            debug!("circuit breaker cooldown elapsed, admitting again");
            *phase = Phase::Closed { failures: 0 };
        }
        Ok(())
    }

    pub fn on_success(&self) {
        if let Ok(mut phase) = self.lock() {
            *phase = Phase::Closed { failures: 0 };
        }
    }

    pub fn on_failure(&self) {
        let Ok(mut phase) = self.lock() else {
            return;
        };
        match *phase {
            Phase::Closed { failures } => {
                let failures = failures.saturating_add(1);
                *phase = if failures >= self.cfg.failure_threshold {
                    warn!(
                        consecutive_failures = failures,
                        cooldown_ms = self.cfg.cooldown.as_millis() as u64,
                        "circuit breaker opened"
                    );
                    Phase::Open {
                        until: Instant::now() + self.cfg.cooldown,
                        failures,
                    }
                } else {
                    Phase::Closed { failures }
                };
            }
            // work admitted before the breaker opened; the cooldown is not extended
            Phase::Open { until, failures } => {
                *phase = Phase::Open {
                    until,
                    failures: failures.saturating_add(1),
                };
            }
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let (consecutive_failures, open_remaining_ms) = match self.lock().map(|p| *p) {
            Ok(Phase::Closed { failures }) => (failures, None),
            Ok(Phase::Open { until, failures }) => (
                failures,
                (until > now).then(|| (until - now).as_millis() as u64),
            ),
            Err(_) => (0, None),
        };
        CircuitBreakerSnapshot {
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures,
            open_remaining_ms,
        }
    }
}
