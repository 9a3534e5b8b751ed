//! Timeout derivation from baseline timing.

use std::time::Duration;

use thiserror::Error;

use crate::baseline::BaselineResult;
use crate::config::ExecutionConfig;

/// Timeout derivation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeoutError {
    /// A zero baseline would make every mutant time out.
    #[error(
        "baseline recorded no elapsed time; the test runner is not reporting durations or the suite did not execute"
    )]
    NonPositiveBaseline,
}

/// Per-run time limit shared read-only by every mutant execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBound {
    value: Duration,
    derived: Duration,
    overridden: bool,
}

impl TimeoutBound {
    /// Limit applied to each mutant run.
    pub fn value(&self) -> Duration {
        self.value
    }

    /// What the formula produced, even when an override is in force.
    pub fn derived(&self) -> Duration {
        self.derived
    }

    /// True if the configured override supersedes the derived value.
    pub fn is_overridden(&self) -> bool {
        self.overridden
    }

    /// True if `elapsed` went past the limit.
    pub fn is_exceeded_by(&self, elapsed: Duration) -> bool {
        elapsed > self.value
    }
}

/// Computes `baseline × multiplier + overhead`, unless an override is configured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutCalculator {
    multiplier: f64,
    overhead: Duration,
    override_value: Option<Duration>,
}

impl TimeoutCalculator {
    /// Calculator with explicit parameters.
    pub fn new(multiplier: f64, overhead: Duration, override_value: Option<Duration>) -> Self {
        Self {
            multiplier,
            overhead,
            override_value,
        }
    }

    /// Calculator built from the run configuration.
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(
            config.timeout_multiplier,
            Duration::from_millis(config.timeout_overhead_ms),
            config.timeout_override_ms.map(Duration::from_millis),
        )
    }

    /// Bound for a total baseline duration.
    pub fn for_duration(&self, baseline: Duration) -> Result<TimeoutBound, TimeoutError> {
        if baseline.is_zero() {
            return Err(TimeoutError::NonPositiveBaseline);
        }

        let scaled = Duration::try_from_secs_f64(baseline.as_secs_f64() * self.multiplier)
            .unwrap_or(Duration::MAX);
        let derived = scaled.saturating_add(self.overhead);

        Ok(match self.override_value {
            Some(value) => TimeoutBound {
                value,
                derived,
                overridden: true,
            },
            None => TimeoutBound {
                value: derived,
                derived,
                overridden: false,
            },
        })
    }

    /// Bound derived from a baseline result.
    pub fn calculate(&self, baseline: &BaselineResult) -> Result<TimeoutBound, TimeoutError> {
        self.for_duration(baseline.total_duration)
    }
}
