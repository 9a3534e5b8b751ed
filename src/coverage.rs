//! Test ↔ mutant coverage and per-mutant test selection.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{info, warn};

use crate::config::CoverageMode;
use crate::mutant::MutantId;
use crate::project::{TestId, TestSuite};
use crate::runner::{CoverageCapture, RunnerError, TestRunner, TestSelection};

/// Coverage capture errors. Fatal: scheduling without coverage would misclassify.
#[derive(Debug, Error)]
pub enum CoverageError {
    /// The runner failed while recording coverage.
    #[error("coverage capture failed: {0}")]
    Runner(#[from] RunnerError),
}

/// Tests a mutant has to run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoveringTests {
    /// No test reaches the mutant; it is never dispatched.
    None,
    /// The whole suite has to run.
    All,
    /// Only these tests reach the mutant.
    Some(Vec<TestId>),
}

impl CoveringTests {
    /// Selection handed to the runner, or `None` when nothing needs to run.
    pub fn selection(&self) -> Option<TestSelection> {
        match self {
            Self::None => None,
            Self::All => Some(TestSelection::All),
            Self::Some(tests) => Some(TestSelection::Only(tests.clone())),
        }
    }
}

/// Bidirectional test ↔ mutant association. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageMap {
    mode: CoverageMode,
    suite_size: usize,
    by_test: BTreeMap<TestId, BTreeSet<MutantId>>,
    by_mutant: BTreeMap<MutantId, BTreeSet<TestId>>,
    covered: BTreeSet<MutantId>,
    static_mutants: BTreeSet<MutantId>,
}

impl CoverageMap {
    /// Map used when coverage optimisation is off: every mutant runs the suite.
    pub fn full_suite() -> Self {
        Self {
            mode: CoverageMode::Off,
            suite_size: 0,
            by_test: BTreeMap::new(),
            by_mutant: BTreeMap::new(),
            covered: BTreeSet::new(),
            static_mutants: BTreeSet::new(),
        }
    }

    /// Build the map from a capture. Records naming tests outside `suite` are dropped.
    pub fn from_capture(mode: CoverageMode, suite: &TestSuite, capture: CoverageCapture) -> Self {
        if mode == CoverageMode::Off {
            return Self::full_suite();
        }

        let mut map = Self {
            mode,
            suite_size: suite.len(),
            by_test: BTreeMap::new(),
            by_mutant: BTreeMap::new(),
            covered: capture.covered,
            static_mutants: capture.static_mutants,
        };

        if mode == CoverageMode::PerTest {
            for record in capture.per_test {
                if !suite.contains(&record.test) {
                    warn!(test = %record.test, "coverage reported for unknown test, ignoring");
                    continue;
                }
                for mutant in &record.mutants {
                    map.by_mutant
                        .entry(*mutant)
                        .or_default()
                        .insert(record.test.clone());
                }
                map.covered.extend(record.mutants.iter().copied());
                map.by_test
                    .entry(record.test)
                    .or_default()
                    .extend(record.mutants);
            }
        }
        map
    }

    /// Mode the map was built in.
    pub fn mode(&self) -> CoverageMode {
        self.mode
    }

    /// Mutants a test reaches. Empty for tests that reach nothing.
    pub fn mutants_for(&self, test: &TestId) -> impl Iterator<Item = MutantId> + '_ {
        self.by_test.get(test).into_iter().flatten().copied()
    }

    /// True if the mutant was reached during one-time initialisation.
    pub fn is_static(&self, mutant: MutantId) -> bool {
        self.static_mutants.contains(&mutant)
    }

    /// Tests that have to run for `mutant`.
    pub fn covering_tests(&self, mutant: MutantId) -> CoveringTests {
        match self.mode {
            CoverageMode::Off => CoveringTests::All,
            _ if self.static_mutants.contains(&mutant) => CoveringTests::All,
            CoverageMode::All => {
                if self.covered.contains(&mutant) {
                    CoveringTests::All
                } else {
                    CoveringTests::None
                }
            }
            CoverageMode::PerTest => match self.by_mutant.get(&mutant) {
                None => CoveringTests::None,
                Some(tests) if tests.is_empty() => CoveringTests::None,
                Some(tests) if tests.len() >= self.suite_size => CoveringTests::All,
                Some(tests) => CoveringTests::Some(tests.iter().cloned().collect()),
            },
        }
    }
}

/// Captures coverage through a runner and builds the [`CoverageMap`].
#[derive(Debug, Clone, Copy)]
pub struct CoverageMapper {
    mode: CoverageMode,
}

impl CoverageMapper {
    /// Mapper for the configured mode.
    pub fn new(mode: CoverageMode) -> Self {
        Self { mode }
    }

    /// Run the capture (unless disabled) and build the map.
    pub fn map(&self, runner: &mut dyn TestRunner, suite: &TestSuite) -> Result<CoverageMap, CoverageError> {
        if self.mode == CoverageMode::Off {
            info!("coverage optimisation disabled, every mutant runs the full suite");
            return Ok(CoverageMap::full_suite());
        }

        let capture = runner.capture_coverage(suite, self.mode == CoverageMode::PerTest)?;
        let map = CoverageMap::from_capture(self.mode, suite, capture);
        info!(
            mode = ?self.mode,
            covered = map.covered.len(),
            static_mutants = map.static_mutants.len(),
            "coverage captured"
        );
        Ok(map)
    }
}
