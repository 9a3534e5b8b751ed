//! Resolved project model and the resolver seam.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ExecutionConfig;

/// Stable identifier of a single test case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    /// Wrap a test name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Test name as reported by the test framework.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A discovered test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Stable identifier.
    pub id: TestId,
    /// Source file declaring the test, when the framework reports it.
    pub source_file: Option<PathBuf>,
}

/// The set of tests discovered for a project. Immutable after the baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSuite {
    tests: BTreeMap<TestId, TestCase>,
}

impl TestSuite {
    /// Build a suite from discovered test cases; duplicate ids collapse.
    pub fn new(tests: impl IntoIterator<Item = TestCase>) -> Self {
        Self {
            tests: tests.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    /// Build a suite from bare test names.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ids.into_iter().map(|name| TestCase {
            id: TestId::new(name),
            source_file: None,
        }))
    }

    /// Number of tests.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// True when discovery found nothing.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// True if the suite contains the test.
    pub fn contains(&self, id: &TestId) -> bool {
        self.tests.contains_key(id)
    }

    /// Test ids in stable order.
    pub fn ids(&self) -> impl Iterator<Item = &TestId> {
        self.tests.keys()
    }

    /// Test cases in stable order.
    pub fn cases(&self) -> impl Iterator<Item = &TestCase> {
        self.tests.values()
    }
}

/// A node in the source tree of the project under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProjectComponent {
    /// Directory with nested components.
    Folder {
        /// Folder path.
        path: PathBuf,
        /// Nested components.
        children: Vec<ProjectComponent>,
    },
    /// A single source file.
    File {
        /// File path.
        path: PathBuf,
    },
}

impl ProjectComponent {
    /// Component path.
    pub fn path(&self) -> &Path {
        match self {
            Self::Folder { path, .. } | Self::File { path } => path,
        }
    }

    /// All source files below (and including) this component, depth-first.
    pub fn source_files(&self) -> Vec<&Path> {
        let mut out = Vec::new();
        self.collect_files(&mut out);
        out
    }

    fn collect_files<'a>(&'a self, out: &mut Vec<&'a Path>) {
        match self {
            Self::File { path } => out.push(path),
            Self::Folder { children, .. } => {
                for child in children {
                    child.collect_files(out);
                }
            }
        }
    }

    /// Number of source files in the tree.
    pub fn file_count(&self) -> usize {
        match self {
            Self::File { .. } => 1,
            Self::Folder { children, .. } => children.iter().map(Self::file_count).sum(),
        }
    }
}

/// The project whose code is mutated. Read-only to the execution core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUnderTest {
    /// Project name.
    pub name: String,
    /// Project root directory.
    pub root: PathBuf,
    /// Target framework or toolchain the project builds for.
    #[serde(default)]
    pub target_framework: Option<String>,
    /// Referenced libraries or crates.
    #[serde(default)]
    pub references: Vec<String>,
    /// Source tree.
    pub contents: ProjectComponent,
}

/// A test project exercising the project under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestProject {
    /// Path to the test project.
    pub path: PathBuf,
    /// Target framework or toolchain the tests build for.
    #[serde(default)]
    pub target_framework: Option<String>,
}

/// Output of project resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProject {
    /// Project under test.
    pub project: ProjectUnderTest,
    /// Test projects that exercise it.
    pub test_projects: Vec<TestProject>,
}

/// Project resolution errors. Fatal; raised before the baseline.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No project could be located from the configuration.
    #[error("no project found in {0}")]
    NotFound(PathBuf),
    /// Build metadata could not be interpreted.
    #[error("failed to read build metadata for {project}: {reason}")]
    Metadata {
        /// Project name or path.
        project: String,
        /// Resolver-specific detail.
        reason: String,
    },
    /// IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Locates the project under test and its test projects.
pub trait ProjectResolver {
    /// Resolve the projects named by the configuration.
    fn resolve(&self, config: &ExecutionConfig) -> Result<ResolvedProject, ResolveError>;
}

/// Timing of one test within a run.
pub type TestDurations = BTreeMap<TestId, Duration>;
