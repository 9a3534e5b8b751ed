//! # mutant-conductor
//!
//! `mutant-conductor` is the execution core of a mutation testing tool, organized around:
//! - `baseline`: discovery plus the unmutated full-suite run that gates everything else
//! - `timeout`: the per-mutant time limit derived from the baseline
//! - `coverage`: which tests reach which mutants, and what each mutant must run
//! - `scheduler`: a parallel worker pool that compiles, runs and classifies mutants
//! - `runner` / `build`: capability traits plus command-backed implementations
//! - `pipeline`: the end-to-end run and its summary
//!
//! Mutant generation, source rewriting and report formats belong to the caller.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod baseline;
pub mod build;
pub mod config;
pub mod coverage;
pub mod logging;
pub mod mutant;
pub mod pipeline;
pub mod plan;
pub mod project;
pub mod runner;
pub mod scheduler;
pub mod summary;
pub mod timeout;

pub use baseline::{BaselineError, BaselineExecutor, BaselineResult, InitialisationError, InitialisationProcess, Initialised};
pub use build::{BuildError, BuildProcess, CommandBuildProcess};
pub use config::{ConfigError, CoverageMode, ExecutionConfig, Thresholds};
pub use coverage::{CoverageError, CoverageMap, CoverageMapper, CoveringTests};
pub use mutant::{LifecycleError, Mutant, MutantId, MutantLifecycle, MutantRunResult, MutantStatus, SourceLocation};
pub use pipeline::{Pipeline, PipelineError, PipelineReport};
pub use plan::{PlanError, RunPlan};
pub use project::{ProjectResolver, ProjectUnderTest, ResolveError, TestId, TestSuite};
pub use runner::{RunRequest, RunnerError, RunnerFactory, TestRunResult, TestRunner, TestSelection};
pub use scheduler::{ExecutionError, ExecutionReport, MutantScheduler, ProgressObserver, SchedulerSettings};
pub use summary::{RunSummary, ScoreBand};
pub use timeout::{TimeoutBound, TimeoutCalculator, TimeoutError};
