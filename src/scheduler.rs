//! Parallel mutant execution.
//!
//! A fixed pool of workers pulls schedulable mutants from a shared cursor.
//! Each worker owns one test runner at a time and replaces it whenever it can
//! no longer be trusted: after a timeout and after a crash. Results land in a
//! pre-sized arena with one write-once slot per mutant, which is the only
//! state the workers share for writing.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::baseline::release;
use crate::build::BuildProcess;
use crate::config::ExecutionConfig;
use crate::coverage::CoverageMap;
use crate::mutant::{LifecycleError, Mutant, MutantId, MutantLifecycle, MutantRunResult, MutantStatus};
use crate::project::ProjectUnderTest;
use crate::runner::{RunRequest, RunnerError, RunnerFactory, TestRunResult, TestRunner, TestSelection};
use crate::timeout::TimeoutBound;

/// Errors that abort the mutant phase. Individual mutant outcomes never end up here.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// No worker managed to start a runner.
    #[error("no test runner could be started for any of {workers} worker(s): {last_error}")]
    NoRunnersAvailable {
        /// Workers that tried.
        workers: usize,
        /// Last start failure.
        last_error: String,
    },
    /// Every worker lost its runner and could not replace it.
    #[error("all workers lost their test runner with {remaining} mutant(s) unfinished: {last_error}")]
    RunnersExhausted {
        /// Mutants without a result.
        remaining: usize,
        /// Last runner failure.
        last_error: String,
    },
    /// Cancelled from outside.
    #[error("mutant execution interrupted with {remaining} mutant(s) unfinished")]
    Interrupted {
        /// Mutants without a result.
        remaining: usize,
    },
    /// A worker thread panicked.
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
    /// Two mutants share an id.
    #[error("mutant id {0} appears more than once")]
    DuplicateMutant(MutantId),
    /// A status transition broke the lifecycle.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Called as each mutant result becomes available.
pub trait ProgressObserver: Sync {
    /// A mutant reached its terminal status.
    fn on_mutant_tested(&self, _result: &MutantRunResult) {}
}

/// Observer that ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

/// Pool sizing and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Maximum number of workers.
    pub concurrency: usize,
    /// Fresh-runner retries per mutant after a runner crash.
    pub max_runner_retries: u32,
}

impl SchedulerSettings {
    /// Settings taken from the run configuration.
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_runner_retries: config.max_runner_retries,
        }
    }
}

/// Every result of one execution, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// One entry per mutant.
    pub results: Vec<MutantRunResult>,
    /// Wall time of the mutant phase.
    pub elapsed: Duration,
    /// Workers that were spawned.
    pub workers: usize,
}

/// Write-once slot per mutant.
struct ResultArena {
    slots: Vec<OnceLock<MutantRunResult>>,
}

impl ResultArena {
    fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Store a result. Returns false if the slot was already written.
    fn put(&self, index: usize, result: MutantRunResult) -> bool {
        self.slots[index].set(result).is_ok()
    }

    fn missing(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_none()).count()
    }

    fn into_results(self) -> Vec<MutantRunResult> {
        self.slots.into_iter().filter_map(OnceLock::into_inner).collect()
    }
}

struct Job<'m> {
    index: usize,
    mutant: &'m Mutant,
    tests: TestSelection,
}

/// State shared by the workers of one execution.
#[derive(Default)]
struct PoolState {
    cursor: AtomicUsize,
    started: AtomicUsize,
    abort: AtomicBool,
    last_error: Mutex<Option<String>>,
    fatal: Mutex<Option<LifecycleError>>,
}

impl PoolState {
    fn record_error(&self, err: &RunnerError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    }

    fn last_error(&self) -> String {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "unknown runner failure".to_string())
    }
}

/// One pool member and the runner it currently owns.
struct Worker {
    slot: usize,
    runner: Option<Box<dyn TestRunner>>,
}

impl Worker {
    fn new(slot: usize) -> Self {
        Self {
            slot,
            runner: None,
        }
    }

    /// Install a freshly created runner.
    fn rehome(&mut self, factory: &dyn RunnerFactory) -> Result<(), RunnerError> {
        self.discard();
        self.runner = Some(factory.create(self.slot)?);
        debug!(worker = self.slot, "runner started");
        Ok(())
    }

    fn run(&mut self, request: &RunRequest) -> Result<TestRunResult, RunnerError> {
        match self.runner.as_mut() {
            Some(runner) => runner.run(request),
            None => Err(RunnerError::StartFailed(format!(
                "worker {} has no runner",
                self.slot
            ))),
        }
    }

    fn discard(&mut self) {
        if let Some(mut runner) = self.runner.take() {
            release(runner.as_mut());
        }
    }
}

/// Outcome of processing one job.
struct Processed {
    result: MutantRunResult,
    /// Set when the worker could not obtain a replacement runner.
    retire: Option<RunnerError>,
}

/// Drives mutants through compile, run and classification on a worker pool.
pub struct MutantScheduler<'a> {
    project: &'a ProjectUnderTest,
    build: &'a dyn BuildProcess,
    runners: &'a dyn RunnerFactory,
    timeout: TimeoutBound,
    settings: SchedulerSettings,
    cancel: Option<Arc<AtomicBool>>,
    observer: &'a dyn ProgressObserver,
}

impl<'a> MutantScheduler<'a> {
    /// Scheduler over the given collaborators.
    pub fn new(
        project: &'a ProjectUnderTest,
        build: &'a dyn BuildProcess,
        runners: &'a dyn RunnerFactory,
        timeout: TimeoutBound,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            project,
            build,
            runners,
            timeout,
            settings,
            cancel: None,
            observer: &NoProgress,
        }
    }

    /// Stop taking new mutants once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Report each result as it lands.
    pub fn with_observer(mut self, observer: &'a dyn ProgressObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Classify every mutant and write its terminal status.
    ///
    /// Ignored and uncovered mutants are settled without running anything;
    /// the rest are dispatched to the pool. The report holds exactly one
    /// result per mutant, in input order.
    pub fn execute(
        &self,
        mutants: &mut [Mutant],
        coverage: &CoverageMap,
    ) -> Result<ExecutionReport, ExecutionError> {
        let started = Instant::now();
        let mut seen = BTreeSet::new();
        for mutant in mutants.iter() {
            if !seen.insert(mutant.id) {
                return Err(ExecutionError::DuplicateMutant(mutant.id));
            }
            if mutant.status().is_terminal() {
                return Err(LifecycleError::AlreadyTerminal {
                    id: mutant.id,
                    current: mutant.status(),
                    requested: MutantStatus::Pending,
                }
                .into());
            }
        }

        let arena = ResultArena::new(mutants.len());
        let mut jobs = Vec::new();
        for (index, mutant) in mutants.iter().enumerate() {
            if let Some(reason) = &mutant.ignore_reason {
                self.settle_undispatched(&arena, index, mutant.id, MutantStatus::Ignored, Some(reason.clone()))?;
                continue;
            }
            match coverage.covering_tests(mutant.id).selection() {
                Some(tests) => jobs.push(Job { index, mutant, tests }),
                None => self.settle_undispatched(&arena, index, mutant.id, MutantStatus::NoCoverage, None)?,
            }
        }

        let workers = self.settings.concurrency.max(1).min(jobs.len());
        info!(
            mutants = mutants.len(),
            schedulable = jobs.len(),
            workers,
            timeout_ms = self.timeout.value().as_millis() as u64,
            "executing mutants"
        );

        let pool = PoolState::default();
        let mut panicked = None;
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|slot| {
                    let (jobs, arena, pool) = (&jobs, &arena, &pool);
                    scope.spawn(move || self.worker_loop(slot, jobs, arena, pool))
                })
                .collect();
            for (slot, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() {
                    pool.abort.store(true, Ordering::SeqCst);
                    panicked.get_or_insert(slot);
                }
            }
        });
        drop(jobs);

        if let Some(err) = pool.fatal.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Err(err.into());
        }
        if let Some(slot) = panicked {
            return Err(ExecutionError::WorkerPanicked(slot));
        }

        let remaining = arena.missing();
        if remaining > 0 {
            return Err(if self.is_cancelled() {
                ExecutionError::Interrupted { remaining }
            } else if pool.started.load(Ordering::SeqCst) == 0 {
                ExecutionError::NoRunnersAvailable {
                    workers,
                    last_error: pool.last_error(),
                }
            } else {
                ExecutionError::RunnersExhausted {
                    remaining,
                    last_error: pool.last_error(),
                }
            });
        }

        let results = arena.into_results();
        for (mutant, result) in mutants.iter_mut().zip(&results) {
            mutant.set_terminal(result.status)?;
        }

        let elapsed = started.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "mutant execution finished");
        Ok(ExecutionReport {
            results,
            elapsed,
            workers,
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn settle_undispatched(
        &self,
        arena: &ResultArena,
        index: usize,
        id: MutantId,
        status: MutantStatus,
        reason: Option<String>,
    ) -> Result<(), LifecycleError> {
        let status = MutantLifecycle::new(id).finish(status)?;
        self.publish(arena, index, MutantRunResult::undispatched(id, status, reason));
        Ok(())
    }

    fn publish(&self, arena: &ResultArena, index: usize, result: MutantRunResult) {
        info!(
            mutant = %result.mutant_id,
            status = %result.status,
            attempts = result.attempts,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "mutant tested"
        );
        self.observer.on_mutant_tested(&result);
        if !arena.put(index, result) {
            warn!(index, "result slot written twice, keeping the first result");
        }
    }

    fn worker_loop(&self, slot: usize, jobs: &[Job<'_>], arena: &ResultArena, pool: &PoolState) {
        let span = info_span!("worker", worker = slot);
        let _enter = span.enter();

        let mut worker = Worker::new(slot);
        if let Err(err) = worker.rehome(self.runners) {
            warn!(error = %err, "runner failed to start, worker not joining the pool");
            pool.record_error(&err);
            return;
        }
        pool.started.fetch_add(1, Ordering::SeqCst);

        loop {
            if self.is_cancelled() || pool.abort.load(Ordering::SeqCst) {
                break;
            }
            let next = pool.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(job) = jobs.get(next) else {
                break;
            };

            match self.process(&mut worker, job) {
                Ok(processed) => {
                    self.publish(arena, job.index, processed.result);
                    if let Some(err) = processed.retire {
                        warn!(error = %err, "could not replace runner, worker retiring");
                        pool.record_error(&err);
                        break;
                    }
                }
                Err(err) => {
                    pool.abort.store(true, Ordering::SeqCst);
                    *pool.fatal.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
                    break;
                }
            }
        }

        worker.discard();
    }

    /// Compile, run and classify one mutant. First matching rule wins:
    /// compile failure, timeout, failing test, all passing.
    fn process(&self, worker: &mut Worker, job: &Job<'_>) -> Result<Processed, LifecycleError> {
        let started = Instant::now();
        let id = job.mutant.id;
        let mut lifecycle = MutantLifecycle::new(id);
        lifecycle.start()?;
        debug!(mutant = %id, tests = ?job.tests, "dispatching mutant");

        let mut result = MutantRunResult::undispatched(id, MutantStatus::Running, None);
        let mut retire = None;

        if let Err(err) = self.build.compile_mutant(self.project, job.mutant) {
            result.status = lifecycle.finish(MutantStatus::CompileError)?;
            result.status_reason = Some(err.to_string());
            result.attempts = lifecycle.attempts();
            result.elapsed = started.elapsed();
            return Ok(Processed { result, retire });
        }

        let request = RunRequest {
            tests: job.tests.clone(),
            timeout: Some(self.timeout.value()),
            active_mutant: Some(id),
        };

        loop {
            match worker.run(&request) {
                Ok(run) if run.timed_out || self.timeout.is_exceeded_by(run.elapsed) => {
                    result.status = lifecycle.finish(MutantStatus::TimedOut)?;
                    // A runner that overran its limit is not reused.
                    if let Err(err) = worker.rehome(self.runners) {
                        retire = Some(err);
                    }
                    break;
                }
                Ok(run) => {
                    result.status = match run.failing_tests.first() {
                        Some(first) => {
                            result.killed_by = Some(first.clone());
                            lifecycle.finish(MutantStatus::Killed)?
                        }
                        None => lifecycle.finish(MutantStatus::Survived)?,
                    };
                    result.failing_tests = run.failing_tests;
                    break;
                }
                Err(err) => {
                    warn!(mutant = %id, attempt = lifecycle.attempts(), error = %err, "test runner failed");
                    let replaced = worker.rehome(self.runners);
                    if lifecycle.attempts() > self.settings.max_runner_retries || replaced.is_err() {
                        result.status = lifecycle.finish(MutantStatus::Inconclusive)?;
                        result.status_reason = Some(err.to_string());
                        retire = replaced.err();
                        break;
                    }
                    lifecycle.retry()?;
                }
            }
        }

        result.attempts = lifecycle.attempts();
        result.elapsed = started.elapsed();
        Ok(Processed { result, retire })
    }
}
