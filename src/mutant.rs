//! Mutant model, status set and per-mutant lifecycle.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::project::TestId;

/// Stable mutant identifier. Also the value that activates the mutant at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutantId(pub u32);

impl fmt::Display for MutantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a mutant lives in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source file.
    pub file: PathBuf,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// Status of a mutant. Everything except `Pending` and `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutantStatus {
    /// Not yet classified.
    Pending,
    /// Dispatched to a worker.
    Running,
    /// At least one test failed.
    Killed,
    /// Every selected test passed.
    Survived,
    /// Execution exceeded the timeout bound.
    TimedOut,
    /// The mutated variant did not compile.
    CompileError,
    /// No test reaches the mutant.
    NoCoverage,
    /// Excluded by static policy.
    Ignored,
    /// The runner crashed on every allowed attempt.
    Inconclusive,
}

impl MutantStatus {
    /// True if status is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// True if the test suite detected the mutant.
    pub fn is_detected(&self) -> bool {
        matches!(self, Self::Killed | Self::TimedOut)
    }

    /// Lowercase label used in logs and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Killed => "killed",
            Self::Survived => "survived",
            Self::TimedOut => "timed_out",
            Self::CompileError => "compile_error",
            Self::NoCoverage => "no_coverage",
            Self::Ignored => "ignored",
            Self::Inconclusive => "inconclusive",
        }
    }
}

impl fmt::Display for MutantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Illegal status changes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// A terminal status was about to be overwritten.
    #[error("mutant {id} is already {current}; refusing to set {requested}")]
    AlreadyTerminal {
        /// Mutant id.
        id: MutantId,
        /// Existing status.
        current: MutantStatus,
        /// Rejected status.
        requested: MutantStatus,
    },
    /// A non-terminal status was offered where a terminal one is required.
    #[error("mutant {id}: {requested} is not a terminal status")]
    NotTerminal {
        /// Mutant id.
        id: MutantId,
        /// Rejected status.
        requested: MutantStatus,
    },
    /// The transition is not part of the lifecycle.
    #[error("mutant {id}: cannot move from {from} to {to}")]
    Illegal {
        /// Mutant id.
        id: MutantId,
        /// Current state.
        from: MutantStatus,
        /// Requested state.
        to: MutantStatus,
    },
}

/// A single source alteration produced by the (external) mutant generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutant {
    /// Stable identifier.
    pub id: MutantId,
    /// Where the change is applied.
    pub location: SourceLocation,
    /// Mutated operation, e.g. `replace + with -`.
    pub description: String,
    /// Set by static policy when the mutant must never be executed.
    #[serde(default)]
    pub ignore_reason: Option<String>,
    #[serde(skip, default = "pending")]
    status: MutantStatus,
}

fn pending() -> MutantStatus {
    MutantStatus::Pending
}

impl Mutant {
    /// New pending mutant.
    pub fn new(id: MutantId, location: SourceLocation, description: impl Into<String>) -> Self {
        Self {
            id,
            location,
            description: description.into(),
            ignore_reason: None,
            status: MutantStatus::Pending,
        }
    }

    /// Mark the mutant as excluded by static policy.
    pub fn ignored(mut self, reason: impl Into<String>) -> Self {
        self.ignore_reason = Some(reason.into());
        self
    }

    /// Current status.
    pub fn status(&self) -> MutantStatus {
        self.status
    }

    /// Record the terminal classification. Succeeds at most once.
    pub fn set_terminal(&mut self, status: MutantStatus) -> Result<(), LifecycleError> {
        if self.status.is_terminal() {
            return Err(LifecycleError::AlreadyTerminal {
                id: self.id,
                current: self.status,
                requested: status,
            });
        }
        if !status.is_terminal() {
            return Err(LifecycleError::NotTerminal {
                id: self.id,
                requested: status,
            });
        }
        self.status = status;
        Ok(())
    }
}

/// Per-execution state machine: `Pending -> Running -> {Running(retry)} -> Terminal`.
///
/// `NoCoverage` and `Ignored` may be reached straight from `Pending`; every
/// other terminal state requires at least one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutantLifecycle {
    id: MutantId,
    state: MutantStatus,
    attempts: u32,
}

impl MutantLifecycle {
    /// Fresh lifecycle in `Pending`.
    pub fn new(id: MutantId) -> Self {
        Self {
            id,
            state: MutantStatus::Pending,
            attempts: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> MutantStatus {
        self.state
    }

    /// Number of execution attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Begin the first attempt.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.expect_state(MutantStatus::Pending, MutantStatus::Running)?;
        self.state = MutantStatus::Running;
        self.attempts = 1;
        Ok(())
    }

    /// Begin another attempt after an infrastructure failure.
    pub fn retry(&mut self) -> Result<(), LifecycleError> {
        self.expect_state(MutantStatus::Running, MutantStatus::Running)?;
        self.attempts += 1;
        Ok(())
    }

    /// Settle on a terminal status.
    pub fn finish(&mut self, status: MutantStatus) -> Result<MutantStatus, LifecycleError> {
        if !status.is_terminal() {
            return Err(LifecycleError::NotTerminal {
                id: self.id,
                requested: status,
            });
        }
        match (self.state, status) {
            (MutantStatus::Pending, MutantStatus::NoCoverage | MutantStatus::Ignored)
            | (MutantStatus::Running, _) => {
                self.state = status;
                Ok(status)
            }
            (current, _) if current.is_terminal() => Err(LifecycleError::AlreadyTerminal {
                id: self.id,
                current,
                requested: status,
            }),
            (from, to) => Err(LifecycleError::Illegal { id: self.id, from, to }),
        }
    }

    fn expect_state(&self, expected: MutantStatus, to: MutantStatus) -> Result<(), LifecycleError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LifecycleError::Illegal {
                id: self.id,
                from: self.state,
                to,
            })
        }
    }
}

/// Outcome of one mutant. Exactly one per mutant per execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutantRunResult {
    /// Mutant id.
    pub mutant_id: MutantId,
    /// Terminal status.
    pub status: MutantStatus,
    /// First failing test, recorded as evidence for `Killed`.
    pub killed_by: Option<TestId>,
    /// All failing tests reported by the run.
    pub failing_tests: Vec<TestId>,
    /// Human-readable detail (ignore reason, compile error, crash message).
    pub status_reason: Option<String>,
    /// Number of runner attempts; zero for mutants that were never dispatched.
    pub attempts: u32,
    /// Wall time spent on the mutant, compile step included.
    pub elapsed: Duration,
}

impl MutantRunResult {
    /// Result for a mutant classified without execution.
    pub fn undispatched(
        mutant_id: MutantId,
        status: MutantStatus,
        reason: Option<String>,
    ) -> Self {
        Self {
            mutant_id,
            status,
            killed_by: None,
            failing_tests: Vec::new(),
            status_reason: reason,
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutant(id: u32) -> Mutant {
        Mutant::new(
            MutantId(id),
            SourceLocation {
                file: "src/lib.rs".into(),
                line: 10,
                column: 5,
            },
            "replace + with -",
        )
    }

    #[test]
    fn terminal_status_is_written_once() {
        let mut m = mutant(1);
        assert_eq!(m.status(), MutantStatus::Pending);
        m.set_terminal(MutantStatus::Killed)
            .expect("first terminal write should succeed");
        let err = m
            .set_terminal(MutantStatus::Survived)
            .expect_err("second write should be rejected");
        assert_eq!(
            err,
            LifecycleError::AlreadyTerminal {
                id: MutantId(1),
                current: MutantStatus::Killed,
                requested: MutantStatus::Survived,
            }
        );
        assert_eq!(m.status(), MutantStatus::Killed);
    }

    #[test]
    fn set_terminal_rejects_running() {
        let mut m = mutant(2);
        assert!(matches!(
            m.set_terminal(MutantStatus::Running),
            Err(LifecycleError::NotTerminal { .. })
        ));
        assert_eq!(m.status(), MutantStatus::Pending);
    }

    #[test]
    fn lifecycle_allows_retry_then_terminal() {
        let mut lc = MutantLifecycle::new(MutantId(3));
        lc.start().expect("start should succeed");
        lc.retry().expect("retry should succeed");
        assert_eq!(lc.attempts(), 2);
        assert_eq!(
            lc.finish(MutantStatus::Inconclusive),
            Ok(MutantStatus::Inconclusive)
        );
        assert!(matches!(
            lc.retry(),
            Err(LifecycleError::Illegal { .. })
        ));
        assert!(matches!(
            lc.finish(MutantStatus::Killed),
            Err(LifecycleError::AlreadyTerminal { .. })
        ));
    }

    #[test]
    fn lifecycle_requires_execution_for_run_outcomes() {
        let mut lc = MutantLifecycle::new(MutantId(4));
        assert!(matches!(
            lc.finish(MutantStatus::Killed),
            Err(LifecycleError::Illegal { .. })
        ));
        assert_eq!(
            lc.finish(MutantStatus::NoCoverage),
            Ok(MutantStatus::NoCoverage)
        );
        assert_eq!(lc.attempts(), 0);
    }

    #[test]
    fn detected_statuses_are_killed_and_timed_out() {
        assert!(MutantStatus::Killed.is_detected());
        assert!(MutantStatus::TimedOut.is_detected());
        assert!(!MutantStatus::Survived.is_detected());
        assert!(!MutantStatus::Running.is_terminal());
        assert!(MutantStatus::Inconclusive.is_terminal());
    }

    #[test]
    fn ignored_builder_sets_reason() {
        let m = mutant(5).ignored("string literal in log call");
        assert_eq!(m.ignore_reason.as_deref(), Some("string literal in log call"));
        assert_eq!(m.status(), MutantStatus::Pending);
    }
}
