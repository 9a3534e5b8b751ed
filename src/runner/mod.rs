//! Test runner contract consumed by the execution core.
//!
//! A runner is owned by exactly one caller at a time and receives sequential
//! calls only. The scheduler obtains fresh runners through a [`RunnerFactory`]
//! whenever a worker starts or has to replace a runner it no longer trusts.

pub mod command;

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

use crate::mutant::MutantId;
use crate::project::{TestDurations, TestId, TestSuite};

pub use command::{CommandRunnerConfig, CommandRunnerFactory, CommandTestRunner};

/// Runner infrastructure errors.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The runner could not be started.
    #[error("test runner failed to start: {0}")]
    StartFailed(String),
    /// The runner process or host died mid-run.
    #[error("test runner crashed: {0}")]
    Crashed(String),
    /// The runner produced output it could not interpret.
    #[error("unreadable test runner output: {0}")]
    Protocol(String),
    /// IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which tests a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestSelection {
    /// The whole suite.
    All,
    /// Exactly these tests.
    Only(Vec<TestId>),
}

impl TestSelection {
    /// True if the selection runs the whole suite.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

/// One call to [`TestRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Tests to execute.
    pub tests: TestSelection,
    /// Hard limit after which the runner must stop the run.
    pub timeout: Option<Duration>,
    /// Mutant to switch on for this run.
    pub active_mutant: Option<MutantId>,
}

impl RunRequest {
    /// Full suite, no timeout, no mutant: the baseline request.
    pub fn baseline() -> Self {
        Self {
            tests: TestSelection::All,
            timeout: None,
            active_mutant: None,
        }
    }
}

/// Outcome of a completed (or forcibly stopped) run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestRunResult {
    /// Tests that failed, in the order the runner reported them.
    pub failing_tests: Vec<TestId>,
    /// Per-test durations, where the runner reports them.
    pub test_durations: TestDurations,
    /// Wall time of the run.
    pub elapsed: Duration,
    /// True when the runner stopped the run at the timeout.
    pub timed_out: bool,
}

impl TestRunResult {
    /// Passing result with the given wall time.
    pub fn passed(elapsed: Duration) -> Self {
        Self {
            elapsed,
            ..Self::default()
        }
    }

    /// True if the run completed and every test passed.
    pub fn success(&self) -> bool {
        !self.timed_out && self.failing_tests.is_empty()
    }
}

/// Mutants one test reaches during a coverage capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCoverage {
    /// Test that was executed.
    pub test: TestId,
    /// Mutants reached while the test ran.
    pub mutants: BTreeSet<MutantId>,
}

/// Raw output of a coverage capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageCapture {
    /// Per-test records. Empty when only global coverage was captured.
    pub per_test: Vec<TestCoverage>,
    /// Mutants reached by any test.
    pub covered: BTreeSet<MutantId>,
    /// Mutants reached during one-time initialisation, not attributable to a test.
    pub static_mutants: BTreeSet<MutantId>,
}

/// Executes tests on behalf of the core.
pub trait TestRunner: Send {
    /// List the full suite without executing it.
    fn discover_tests(&mut self) -> Result<TestSuite, RunnerError>;

    /// Run a set of tests, optionally under a timeout and with a mutant active.
    fn run(&mut self, request: &RunRequest) -> Result<TestRunResult, RunnerError>;

    /// Run the suite instrumented to record which mutants each test reaches.
    /// With `per_test == false` only the global covered set is required.
    fn capture_coverage(
        &mut self,
        suite: &TestSuite,
        per_test: bool,
    ) -> Result<CoverageCapture, RunnerError>;

    /// Release underlying resources.
    fn shutdown(&mut self) -> Result<(), RunnerError>;
}

/// Creates runners for the baseline and for scheduler workers.
pub trait RunnerFactory: Sync {
    /// Start a runner. `slot` identifies the requesting worker, for logging.
    fn create(&self, slot: usize) -> Result<Box<dyn TestRunner>, RunnerError>;
}
