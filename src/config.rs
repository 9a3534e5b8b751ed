//! Run configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors. Always fatal; raised before any project work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value the core cannot work with.
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        /// Offending field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// Configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Configuration file is not valid JSON for [`ExecutionConfig`].
    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
}

/// How much coverage information is gathered before mutants are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMode {
    /// No capture; every mutant runs the whole suite.
    Off,
    /// Capture which mutants are reached at all; covered mutants run the whole suite.
    All,
    /// Capture per test; each mutant runs only the tests that reach it.
    #[default]
    PerTest,
}

/// Mutation score thresholds, as percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Scores at or above this are reported as high.
    pub high: f64,
    /// Scores below this are reported as low.
    pub low: f64,
    /// Scores below this break the run. Zero disables the check.
    pub break_at: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: 80.0,
            low: 60.0,
            break_at: 0.0,
        }
    }
}

/// Configuration for a mutation execution run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Project directory that build and test commands run in.
    pub project_dir: PathBuf,
    /// Optional project name, used in log output.
    pub project_name: Option<String>,
    /// Optional project version, used in log output.
    pub project_version: Option<String>,
    /// Number of concurrent workers, each owning one test runner.
    pub concurrency: usize,
    /// Factor applied to the baseline duration.
    pub timeout_multiplier: f64,
    /// Fixed allowance added on top of the scaled baseline duration.
    pub timeout_overhead_ms: u64,
    /// Explicit timeout; supersedes the derived value.
    pub timeout_override_ms: Option<u64>,
    /// Coverage capture mode.
    pub coverage_mode: CoverageMode,
    /// How many times a mutant is retried on a fresh runner after a runner crash.
    pub max_runner_retries: u32,
    /// Score thresholds.
    pub thresholds: Thresholds,
}

/// Number of execution units on this machine, at least one.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            project_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            project_name: None,
            project_version: None,
            concurrency: default_concurrency(),
            timeout_multiplier: 1.5,
            timeout_overhead_ms: 500,
            timeout_override_ms: None,
            coverage_mode: CoverageMode::default(),
            max_runner_retries: 1,
            thresholds: Thresholds::default(),
        }
    }
}

impl ExecutionConfig {
    /// Load a configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Set project directory.
    pub fn with_project_dir(mut self, project_dir: impl Into<PathBuf>) -> Self {
        self.project_dir = project_dir.into();
        self
    }

    /// Set project name.
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    /// Set worker count.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set timeout multiplier.
    pub fn with_timeout_multiplier(mut self, multiplier: f64) -> Self {
        self.timeout_multiplier = multiplier;
        self
    }

    /// Set fixed timeout overhead in milliseconds.
    pub fn with_timeout_overhead_ms(mut self, overhead_ms: u64) -> Self {
        self.timeout_overhead_ms = overhead_ms;
        self
    }

    /// Set an explicit timeout in milliseconds.
    pub fn with_timeout_override_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_override_ms = Some(timeout_ms);
        self
    }

    /// Set coverage mode.
    pub fn with_coverage_mode(mut self, mode: CoverageMode) -> Self {
        self.coverage_mode = mode;
        self
    }

    /// Set the crash retry budget per mutant.
    pub fn with_max_runner_retries(mut self, retries: u32) -> Self {
        self.max_runner_retries = retries;
        self
    }

    /// Set score thresholds.
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Check the configuration for values the core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be at least 1"));
        }
        if !self.timeout_multiplier.is_finite() || self.timeout_multiplier < 1.0 {
            return Err(invalid(
                "timeout_multiplier",
                format!("must be a finite value >= 1.0, got {}", self.timeout_multiplier),
            ));
        }
        if self.timeout_override_ms == Some(0) {
            return Err(invalid("timeout_override_ms", "must be greater than zero"));
        }

        let t = &self.thresholds;
        for (field, value) in [
            ("thresholds.high", t.high),
            ("thresholds.low", t.low),
            ("thresholds.break_at", t.break_at),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(invalid(field, format!("must be within 0..=100, got {value}")));
            }
        }
        if t.low > t.high {
            return Err(invalid("thresholds.low", "must not exceed thresholds.high"));
        }
        if t.break_at > t.low {
            return Err(invalid("thresholds.break_at", "must not exceed thresholds.low"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
