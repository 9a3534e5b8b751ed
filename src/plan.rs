//! Run plans: a JSON file naming the project, its commands and the mutants to test.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::build::CommandBuildProcess;
use crate::config::ExecutionConfig;
use crate::mutant::Mutant;
use crate::project::{ProjectComponent, ProjectResolver, ProjectUnderTest, ResolveError, ResolvedProject, TestProject};
use crate::runner::CommandRunnerConfig;

/// Plan loading errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Plan file could not be read.
    #[error("failed to read plan {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Plan file is not a valid plan.
    #[error("failed to parse plan {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
}

/// Project section of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProject {
    /// Project name.
    pub name: String,
    /// Project root.
    pub root: PathBuf,
    /// Target framework or toolchain label.
    #[serde(default)]
    pub target_framework: Option<String>,
    /// Referenced packages.
    #[serde(default)]
    pub references: Vec<String>,
    /// Source files eligible for mutation, relative to `root`.
    pub source_files: Vec<PathBuf>,
    /// Test projects exercising the project.
    pub test_projects: Vec<PathBuf>,
}

/// Everything needed to run one project end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPlan {
    /// Project layout.
    pub project: PlanProject,
    /// Test harness launch configuration.
    pub tests: CommandRunnerConfig,
    /// Build command.
    pub build: CommandBuildProcess,
    /// Mutants to classify.
    #[serde(default)]
    pub mutants: Vec<Mutant>,
}

impl RunPlan {
    /// Load a plan. Relative directories are taken relative to the plan file.
    pub fn from_json_file(path: &Path) -> Result<Self, PlanError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut plan: Self = serde_json::from_str(&raw).map_err(|source| PlanError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(base) = path.parent() {
            plan.rebase(base);
        }
        Ok(plan)
    }

    fn rebase(&mut self, base: &Path) {
        for dir in [
            &mut self.project.root,
            &mut self.tests.working_dir,
            &mut self.build.working_dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    /// Resolver backed by the plan's project section.
    pub fn resolver(&self) -> PlanResolver<'_> {
        PlanResolver {
            project: &self.project,
        }
    }
}

/// Resolves the project exactly as the plan describes it.
#[derive(Debug, Clone, Copy)]
pub struct PlanResolver<'a> {
    project: &'a PlanProject,
}

impl ProjectResolver for PlanResolver<'_> {
    fn resolve(&self, config: &ExecutionConfig) -> Result<ResolvedProject, ResolveError> {
        let root = &self.project.root;
        if !root.is_dir() {
            return Err(ResolveError::NotFound(root.clone()));
        }

        let children = self
            .project
            .source_files
            .iter()
            .map(|file| ProjectComponent::File {
                path: root.join(file),
            })
            .collect();

        Ok(ResolvedProject {
            project: ProjectUnderTest {
                name: config
                    .project_name
                    .clone()
                    .unwrap_or_else(|| self.project.name.clone()),
                root: root.clone(),
                target_framework: self.project.target_framework.clone(),
                references: self.project.references.clone(),
                contents: ProjectComponent::Folder {
                    path: root.clone(),
                    children,
                },
            },
            test_projects: self
                .project
                .test_projects
                .iter()
                .map(|path| TestProject {
                    path: root.join(path),
                    target_framework: self.project.target_framework.clone(),
                })
                .collect(),
        })
    }
}
