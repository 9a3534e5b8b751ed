//! Baseline execution and project initialisation.
//!
//! The baseline is the unmutated suite run once, with no mutant active and no
//! timeout. It must pass before any mutant is scheduled: mutation results
//! against a failing suite carry no information.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::build::{BuildError, BuildProcess};
use crate::config::{ConfigError, ExecutionConfig};
use crate::project::{ProjectResolver, ProjectUnderTest, ResolveError, TestDurations, TestId, TestSuite};
use crate::runner::{RunRequest, RunnerError, RunnerFactory, TestRunner};
use crate::timeout::{TimeoutBound, TimeoutCalculator, TimeoutError};

/// Baseline errors. All of them abort the run.
#[derive(Debug, Error)]
pub enum BaselineError {
    /// Discovery found no tests.
    #[error("no tests were discovered for {project}; mutation testing needs a non-empty suite")]
    NoTests {
        /// Project name.
        project: String,
    },
    /// The unmutated suite does not pass.
    #[error(
        "baseline test run failed for {project}: {} failing test(s), first: {}",
        .failing.len(),
        first_failing(.failing)
    )]
    TestsFailed {
        /// Project name.
        project: String,
        /// Tests that failed on unmutated code.
        failing: Vec<TestId>,
    },
    /// The runner failed during discovery or the baseline run.
    #[error("test runner failed during the baseline of {project}: {source}")]
    Runner {
        /// Project name.
        project: String,
        /// Underlying runner error.
        source: RunnerError,
    },
}

fn first_failing(failing: &[TestId]) -> &str {
    failing.first().map(TestId::as_str).unwrap_or("<timed out>")
}

/// Timing and verdict of the baseline run. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineResult {
    /// Suite discovered before the run.
    pub suite: TestSuite,
    /// Always true for a returned result; failures are raised as errors.
    pub passed: bool,
    /// Duration per test; zero for tests the runner gave no timing for.
    pub test_durations: TestDurations,
    /// Wall time of the full-suite run.
    pub total_duration: Duration,
}

/// Runs discovery and the unmutated full suite.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineExecutor;

impl BaselineExecutor {
    /// Discover the suite, run it once unbounded and verify it passes.
    pub fn run(
        &self,
        project: &ProjectUnderTest,
        runner: &mut dyn TestRunner,
    ) -> Result<BaselineResult, BaselineError> {
        let runner_err = |source: RunnerError| BaselineError::Runner {
            project: project.name.clone(),
            source,
        };

        let suite = runner.discover_tests().map_err(runner_err)?;
        if suite.is_empty() {
            return Err(BaselineError::NoTests {
                project: project.name.clone(),
            });
        }
        info!(project = %project.name, tests = suite.len(), "running baseline");

        let result = runner.run(&RunRequest::baseline()).map_err(runner_err)?;
        if !result.success() {
            let failing = result.failing_tests.clone();
            warn!(project = %project.name, failing = failing.len(), timed_out = result.timed_out, "baseline failed");
            return Err(BaselineError::TestsFailed {
                project: project.name.clone(),
                failing,
            });
        }

        let test_durations = suite
            .ids()
            .map(|id| {
                let elapsed = result.test_durations.get(id).copied().unwrap_or_default();
                (id.clone(), elapsed)
            })
            .collect();

        info!(
            project = %project.name,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "baseline passed"
        );
        Ok(BaselineResult {
            suite,
            passed: true,
            test_durations,
            total_duration: result.elapsed,
        })
    }
}

/// Fatal errors of the initialisation phase.
#[derive(Debug, Error)]
pub enum InitialisationError {
    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Project resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Resolved project is unusable.
    #[error("project {project} cannot be mutated: {reason}")]
    EmptyProject {
        /// Project name.
        project: String,
        /// What is missing.
        reason: &'static str,
    },
    /// Initial build failed.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// The baseline runner could not be created.
    #[error("could not start the baseline test runner: {0}")]
    RunnerStart(RunnerError),
    /// Baseline failed.
    #[error(transparent)]
    Baseline(#[from] BaselineError),
    /// Timeout could not be derived.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

/// Output of a successful initialisation.
pub struct Initialised {
    /// Project under test.
    pub project: ProjectUnderTest,
    /// Baseline verdict and timing.
    pub baseline: BaselineResult,
    /// Timeout bound for every mutant run.
    pub timeout: TimeoutBound,
    /// Runner used for the baseline, kept alive for the coverage pass.
    pub runner: Box<dyn TestRunner>,
}

impl std::fmt::Debug for Initialised {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initialised")
            .field("project", &self.project.name)
            .field("baseline", &self.baseline)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Resolve → build → baseline → timeout.
pub struct InitialisationProcess<'a> {
    resolver: &'a dyn ProjectResolver,
    build: &'a dyn BuildProcess,
    runners: &'a dyn RunnerFactory,
}

impl<'a> InitialisationProcess<'a> {
    /// Wire the collaborators.
    pub fn new(
        resolver: &'a dyn ProjectResolver,
        build: &'a dyn BuildProcess,
        runners: &'a dyn RunnerFactory,
    ) -> Self {
        Self {
            resolver,
            build,
            runners,
        }
    }

    /// Resolve and build the project, then establish baseline and timeout.
    pub fn initialise(&self, config: &ExecutionConfig) -> Result<Initialised, InitialisationError> {
        config.validate()?;

        let resolved = self.resolver.resolve(config)?;
        let project = resolved.project;
        if project.contents.file_count() == 0 {
            return Err(InitialisationError::EmptyProject {
                project: project.name,
                reason: "no source files were resolved",
            });
        }
        if resolved.test_projects.is_empty() {
            return Err(InitialisationError::EmptyProject {
                project: project.name,
                reason: "no test project references it",
            });
        }
        info!(
            project = %project.name,
            version = config.project_version.as_deref().unwrap_or("-"),
            files = project.contents.file_count(),
            test_projects = resolved.test_projects.len(),
            "project resolved"
        );

        self.build.initial_build(&project)?;

        let mut runner = self.runners.create(0).map_err(InitialisationError::RunnerStart)?;
        let baseline = match BaselineExecutor.run(&project, runner.as_mut()) {
            Ok(baseline) => baseline,
            Err(err) => {
                release(runner.as_mut());
                return Err(err.into());
            }
        };

        let timeout = match TimeoutCalculator::from_config(config).calculate(&baseline) {
            Ok(timeout) => timeout,
            Err(err) => {
                release(runner.as_mut());
                return Err(err.into());
            }
        };
        info!(
            timeout_ms = timeout.value().as_millis() as u64,
            overridden = timeout.is_overridden(),
            "timeout bound derived"
        );

        Ok(Initialised {
            project,
            baseline,
            timeout,
            runner,
        })
    }
}

/// Shut a runner down, logging rather than propagating failures.
pub(crate) fn release(runner: &mut dyn TestRunner) {
    if let Err(err) = runner.shutdown() {
        warn!(error = %err, "test runner shutdown failed");
    }
}
