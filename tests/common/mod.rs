#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mutant_conductor::build::{BuildError, BuildProcess};
use mutant_conductor::config::ExecutionConfig;
use mutant_conductor::mutant::{Mutant, MutantId, SourceLocation};
use mutant_conductor::project::{
    ProjectComponent, ProjectResolver, ProjectUnderTest, ResolveError, ResolvedProject, TestId,
    TestProject, TestSuite,
};
use mutant_conductor::runner::{
    CoverageCapture, RunRequest, RunnerError, RunnerFactory, TestRunResult, TestRunner,
    TestSelection,
};

/// What a fake run does when a given mutant is active.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Every selected test passes.
    Pass,
    /// These tests fail when selected.
    Fail(Vec<&'static str>),
    /// The run hits the timeout.
    Hang,
    /// The runner dies on every attempt.
    Crash,
}

/// Shared script for every runner a [`FakeFactory`] creates.
#[derive(Debug, Clone)]
pub struct Script {
    pub suite: Vec<&'static str>,
    pub baseline_failing: Vec<&'static str>,
    pub baseline_elapsed: Duration,
    pub coverage: CoverageCapture,
    pub behaviours: BTreeMap<u32, Behaviour>,
}

impl Script {
    pub fn new(suite: &[&'static str]) -> Self {
        Self {
            suite: suite.to_vec(),
            baseline_failing: Vec::new(),
            baseline_elapsed: Duration::from_millis(1000),
            coverage: CoverageCapture::default(),
            behaviours: BTreeMap::new(),
        }
    }

    pub fn with_behaviour(mut self, mutant: u32, behaviour: Behaviour) -> Self {
        self.behaviours.insert(mutant, behaviour);
        self
    }

    pub fn with_baseline_failing(mut self, tests: &[&'static str]) -> Self {
        self.baseline_failing = tests.to_vec();
        self
    }

    pub fn with_coverage(mut self, coverage: CoverageCapture) -> Self {
        self.coverage = coverage;
        self
    }
}

/// One call to [`TestRunner::run`] as seen by the fakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub runner: usize,
    pub mutant: Option<MutantId>,
    pub tests: TestSelection,
}

pub struct FakeRunner {
    serial: usize,
    script: Arc<Script>,
    log: Arc<Mutex<Vec<RunRecord>>>,
    shutdowns: Arc<AtomicUsize>,
}

impl FakeRunner {
    fn selected(&self, selection: &TestSelection) -> Vec<&'static str> {
        match selection {
            TestSelection::All => self.script.suite.clone(),
            TestSelection::Only(tests) => self
                .script
                .suite
                .iter()
                .copied()
                .filter(|name| tests.iter().any(|t| t.as_str() == *name))
                .collect(),
        }
    }
}

impl TestRunner for FakeRunner {
    fn discover_tests(&mut self) -> Result<TestSuite, RunnerError> {
        Ok(TestSuite::from_ids(self.script.suite.iter().copied()))
    }

    fn run(&mut self, request: &RunRequest) -> Result<TestRunResult, RunnerError> {
        self.log
            .lock()
            .expect("run log lock should not be poisoned")
            .push(RunRecord {
                runner: self.serial,
                mutant: request.active_mutant,
                tests: request.tests.clone(),
            });

        let selected = self.selected(&request.tests);
        let Some(mutant) = request.active_mutant else {
            return Ok(TestRunResult {
                failing_tests: failing(&selected, &self.script.baseline_failing),
                ..TestRunResult::passed(self.script.baseline_elapsed)
            });
        };

        match self.script.behaviours.get(&mutant.0) {
            None | Some(Behaviour::Pass) => Ok(TestRunResult::passed(Duration::from_millis(5))),
            Some(Behaviour::Fail(tests)) => Ok(TestRunResult {
                failing_tests: failing(&selected, tests),
                ..TestRunResult::passed(Duration::from_millis(5))
            }),
            Some(Behaviour::Hang) => Ok(TestRunResult {
                timed_out: true,
                ..TestRunResult::passed(request.timeout.unwrap_or_default())
            }),
            Some(Behaviour::Crash) => Err(RunnerError::Crashed(format!(
                "runner {} lost its host",
                self.serial
            ))),
        }
    }

    fn capture_coverage(
        &mut self,
        _suite: &TestSuite,
        _per_test: bool,
    ) -> Result<CoverageCapture, RunnerError> {
        Ok(self.script.coverage.clone())
    }

    fn shutdown(&mut self) -> Result<(), RunnerError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn failing(selected: &[&'static str], failing: &[&'static str]) -> Vec<TestId> {
    selected
        .iter()
        .filter(|name| failing.contains(*name))
        .map(|name| TestId::from(*name))
        .collect()
}

pub struct FakeFactory {
    script: Arc<Script>,
    log: Arc<Mutex<Vec<RunRecord>>>,
    created: AtomicUsize,
    shutdowns: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            log: Arc::default(),
            created: AtomicUsize::new(0),
            shutdowns: Arc::default(),
        }
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.log
            .lock()
            .expect("run log lock should not be poisoned")
            .clone()
    }

    pub fn mutant_runs(&self, mutant: u32) -> Vec<RunRecord> {
        self.runs()
            .into_iter()
            .filter(|r| r.mutant == Some(MutantId(mutant)))
            .collect()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl RunnerFactory for FakeFactory {
    fn create(&self, _slot: usize) -> Result<Box<dyn TestRunner>, RunnerError> {
        let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakeRunner {
            serial,
            script: Arc::clone(&self.script),
            log: Arc::clone(&self.log),
            shutdowns: Arc::clone(&self.shutdowns),
        }))
    }
}

pub struct FakeResolver {
    pub source_files: usize,
    pub test_projects: usize,
}

impl Default for FakeResolver {
    fn default() -> Self {
        Self {
            source_files: 2,
            test_projects: 1,
        }
    }
}

impl ProjectResolver for FakeResolver {
    fn resolve(&self, _config: &ExecutionConfig) -> Result<ResolvedProject, ResolveError> {
        Ok(ResolvedProject {
            project: ProjectUnderTest {
                name: "widgets".to_string(),
                root: "widgets".into(),
                target_framework: None,
                references: Vec::new(),
                contents: ProjectComponent::Folder {
                    path: "widgets/src".into(),
                    children: (0..self.source_files)
                        .map(|i| ProjectComponent::File {
                            path: format!("widgets/src/m{i}.rs").into(),
                        })
                        .collect(),
                },
            },
            test_projects: (0..self.test_projects)
                .map(|i| TestProject {
                    path: format!("widgets/tests/t{i}").into(),
                    target_framework: None,
                })
                .collect(),
        })
    }
}

#[derive(Default)]
pub struct FakeBuild {
    pub initial_fails: bool,
    pub broken: Vec<u32>,
    pub compiled: Mutex<Vec<MutantId>>,
}

impl FakeBuild {
    pub fn compiled(&self) -> Vec<MutantId> {
        let mut out = self
            .compiled
            .lock()
            .expect("compile log lock should not be poisoned")
            .clone();
        out.sort();
        out
    }
}

impl BuildProcess for FakeBuild {
    fn initial_build(&self, project: &ProjectUnderTest) -> Result<(), BuildError> {
        if self.initial_fails {
            return Err(BuildError::Failed {
                step: "initial build".to_string(),
                project: project.name.clone(),
                exit_code: Some(101),
                output: "error: could not compile `widgets`".to_string(),
            });
        }
        Ok(())
    }

    fn compile_mutant(&self, project: &ProjectUnderTest, mutant: &Mutant) -> Result<(), BuildError> {
        self.compiled
            .lock()
            .expect("compile log lock should not be poisoned")
            .push(mutant.id);
        if self.broken.contains(&mutant.id.0) {
            return Err(BuildError::Failed {
                step: format!("compile mutant {}", mutant.id),
                project: project.name.clone(),
                exit_code: Some(1),
                output: "error[E0308]: mismatched types".to_string(),
            });
        }
        Ok(())
    }
}

pub fn mutant(id: u32) -> Mutant {
    Mutant::new(
        MutantId(id),
        SourceLocation {
            file: "widgets/src/m0.rs".into(),
            line: id,
            column: 9,
        },
        "replace + with -",
    )
}

pub fn mutants(ids: &[u32]) -> Vec<Mutant> {
    ids.iter().copied().map(mutant).collect()
}
