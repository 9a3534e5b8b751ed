//! Aggregate counts, mutation score and threshold evaluation.

use std::fmt;

use serde::Serialize;

use crate::config::Thresholds;
use crate::mutant::{MutantRunResult, MutantStatus};

/// Where a score falls relative to the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    /// At or above `high`.
    High,
    /// Between `low` and `high`.
    Medium,
    /// Below `low` but not breaking.
    Low,
    /// Below `break_at`.
    Broken,
}

impl fmt::Display for ScoreBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Broken => "broken",
        })
    }
}

/// Aggregated run counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Results counted.
    pub total: usize,
    /// Killed mutants.
    pub killed: usize,
    /// Survived mutants.
    pub survived: usize,
    /// Timed-out mutants.
    pub timed_out: usize,
    /// Mutants that did not compile.
    pub compile_errors: usize,
    /// Mutants no test reaches.
    pub no_coverage: usize,
    /// Mutants excluded by policy.
    pub ignored: usize,
    /// Mutants whose runner kept crashing.
    pub inconclusive: usize,
    /// Results that were not terminal. Zero for a completed execution.
    pub incomplete: usize,
}

impl RunSummary {
    /// Count the results of one execution.
    pub fn from_results(results: &[MutantRunResult]) -> Self {
        let mut out = Self {
            total: results.len(),
            ..Self::default()
        };

        for result in results {
            match result.status {
                MutantStatus::Killed => out.killed += 1,
                MutantStatus::Survived => out.survived += 1,
                MutantStatus::TimedOut => out.timed_out += 1,
                MutantStatus::CompileError => out.compile_errors += 1,
                MutantStatus::NoCoverage => out.no_coverage += 1,
                MutantStatus::Ignored => out.ignored += 1,
                MutantStatus::Inconclusive => out.inconclusive += 1,
                MutantStatus::Pending | MutantStatus::Running => out.incomplete += 1,
            }
        }
        out
    }

    /// Killed plus timed out.
    pub fn detected(&self) -> usize {
        self.killed + self.timed_out
    }

    /// Mutants the score is computed over.
    pub fn valid(&self) -> usize {
        self.detected() + self.survived + self.no_coverage
    }

    /// Detected share of valid mutants, as a percentage. `None` with no valid mutants.
    pub fn mutation_score(&self) -> Option<f64> {
        match self.valid() {
            0 => None,
            valid => Some(self.detected() as f64 * 100.0 / valid as f64),
        }
    }

    /// Band for the score, or `None` when there is no score.
    pub fn band(&self, thresholds: &Thresholds) -> Option<ScoreBand> {
        let score = self.mutation_score()?;
        Some(if score >= thresholds.high {
            ScoreBand::High
        } else if score >= thresholds.low {
            ScoreBand::Medium
        } else if score < thresholds.break_at {
            ScoreBand::Broken
        } else {
            ScoreBand::Low
        })
    }

    /// True if the score is below the break threshold.
    pub fn breaks(&self, thresholds: &Thresholds) -> bool {
        self.mutation_score()
            .is_some_and(|score| score < thresholds.break_at)
    }

    /// Per-status table, one `status count` line each, followed by the score.
    pub fn render(&self, thresholds: &Thresholds) -> String {
        let rows = [
            (MutantStatus::Killed, self.killed),
            (MutantStatus::Survived, self.survived),
            (MutantStatus::TimedOut, self.timed_out),
            (MutantStatus::NoCoverage, self.no_coverage),
            (MutantStatus::CompileError, self.compile_errors),
            (MutantStatus::Ignored, self.ignored),
            (MutantStatus::Inconclusive, self.inconclusive),
        ];

        let mut out = format!("{:<14} {:>6}\n", "total", self.total);
        for (status, count) in rows {
            out.push_str(&format!("{:<14} {:>6}\n", status.as_str(), count));
        }
        match (self.mutation_score(), self.band(thresholds)) {
            (Some(score), Some(band)) => {
                out.push_str(&format!("mutation score {score:.2}% ({band})\n"));
            }
            _ => out.push_str("mutation score n/a (no valid mutants)\n"),
        }
        out
    }
}
