//! End-to-end run: initialise, capture coverage, execute mutants, summarise.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use thiserror::Error;
use tracing::info;

use crate::baseline::{BaselineError, BaselineResult, InitialisationError, InitialisationProcess, release};
use crate::build::BuildProcess;
use crate::config::ExecutionConfig;
use crate::coverage::{CoverageError, CoverageMapper};
use crate::mutant::Mutant;
use crate::project::{ProjectResolver, TestId};
use crate::runner::RunnerFactory;
use crate::scheduler::{
    ExecutionError, ExecutionReport, MutantScheduler, NoProgress, ProgressObserver, SchedulerSettings,
};
use crate::summary::RunSummary;
use crate::timeout::TimeoutBound;

/// Fatal pipeline errors. No mutant results are produced when one is returned.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration, resolution, build, baseline or timeout failure.
    #[error(transparent)]
    Initialisation(#[from] InitialisationError),
    /// Coverage capture failure.
    #[error(transparent)]
    Coverage(#[from] CoverageError),
    /// Mutant phase aborted.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl PipelineError {
    /// Failing tests, if the run stopped because the unmutated suite fails.
    pub fn baseline_failures(&self) -> Option<&[TestId]> {
        match self {
            Self::Initialisation(InitialisationError::Baseline(BaselineError::TestsFailed {
                failing,
                ..
            })) => Some(failing),
            _ => None,
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Project name.
    pub project: String,
    /// Baseline verdict and timing.
    pub baseline: BaselineResult,
    /// Bound every mutant ran under.
    pub timeout: TimeoutBound,
    /// Per-mutant results.
    pub execution: ExecutionReport,
    /// Aggregated counts.
    pub summary: RunSummary,
}

/// Wires the collaborators together for one run.
pub struct Pipeline<'a> {
    config: ExecutionConfig,
    resolver: &'a dyn ProjectResolver,
    build: &'a dyn BuildProcess,
    runners: &'a dyn RunnerFactory,
    cancel: Option<Arc<AtomicBool>>,
    observer: &'a dyn ProgressObserver,
}

impl<'a> Pipeline<'a> {
    /// Pipeline over the given configuration and collaborators.
    pub fn new(
        config: ExecutionConfig,
        resolver: &'a dyn ProjectResolver,
        build: &'a dyn BuildProcess,
        runners: &'a dyn RunnerFactory,
    ) -> Self {
        Self {
            config,
            resolver,
            build,
            runners,
            cancel: None,
            observer: &NoProgress,
        }
    }

    /// Forward a cancellation flag to the scheduler.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Forward a progress observer to the scheduler.
    pub fn with_observer(mut self, observer: &'a dyn ProgressObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Run every phase. The mutant phase only starts after a passing baseline.
    pub fn run(&self, mutants: &mut [Mutant]) -> Result<PipelineReport, PipelineError> {
        let initialised =
            InitialisationProcess::new(self.resolver, self.build, self.runners).initialise(&self.config)?;
        let mut runner = initialised.runner;

        let coverage = CoverageMapper::new(self.config.coverage_mode)
            .map(runner.as_mut(), &initialised.baseline.suite);
        release(runner.as_mut());
        let coverage = coverage?;

        let mut scheduler = MutantScheduler::new(
            &initialised.project,
            self.build,
            self.runners,
            initialised.timeout,
            SchedulerSettings::from_config(&self.config),
        )
        .with_observer(self.observer);
        if let Some(flag) = &self.cancel {
            scheduler = scheduler.with_cancellation(Arc::clone(flag));
        }
        let execution = scheduler.execute(mutants, &coverage)?;

        let summary = RunSummary::from_results(&execution.results);
        info!(
            project = %initialised.project.name,
            total = summary.total,
            killed = summary.killed,
            survived = summary.survived,
            score = ?summary.mutation_score(),
            "mutation run finished"
        );

        Ok(PipelineReport {
            project: initialised.project.name,
            baseline: initialised.baseline,
            timeout: initialised.timeout,
            execution,
            summary,
        })
    }
}
