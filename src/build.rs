//! Build seam and a command-backed build process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::mutant::Mutant;
use crate::project::ProjectUnderTest;
use crate::runner::command::ACTIVE_MUTANT_ENV;

/// Build errors. Fatal for the initial build; scoped to `CompileError` per mutant.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build tool could not be launched.
    #[error("build step `{step}` could not start for {project}: {source}")]
    Launch {
        /// Step description.
        step: String,
        /// Project name.
        project: String,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// The build ran and reported failure.
    #[error("build step `{step}` failed for {project} (exit code {exit_code:?}): {output}")]
    Failed {
        /// Step description.
        step: String,
        /// Project name.
        project: String,
        /// Process exit code, if any.
        exit_code: Option<i32>,
        /// Trimmed compiler output.
        output: String,
    },
}

/// Compiles the project and mutated variants of it.
pub trait BuildProcess: Sync {
    /// Build the unmutated project and its tests.
    fn initial_build(&self, project: &ProjectUnderTest) -> Result<(), BuildError>;

    /// Check that the project compiles with `mutant` applied.
    fn compile_mutant(&self, project: &ProjectUnderTest, mutant: &Mutant) -> Result<(), BuildError>;
}

/// Build process that runs one command, with the active mutant exported
/// through the environment for per-mutant checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBuildProcess {
    /// Program to execute, e.g. `cargo`.
    pub program: String,
    /// Arguments, e.g. `["build", "--tests"]`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory to build in.
    pub working_dir: PathBuf,
    /// Extra environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandBuildProcess {
    fn run(&self, step: &str, project: &ProjectUnderTest, mutant: Option<&Mutant>) -> Result<(), BuildError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .envs(&self.env)
            .env_remove(ACTIVE_MUTANT_ENV);
        if let Some(mutant) = mutant {
            cmd.env(ACTIVE_MUTANT_ENV, mutant.id.to_string());
        }

        debug!(step, project = %project.name, "running build");
        let output = cmd.output().map_err(|source| BuildError::Launch {
            step: step.to_string(),
            project: project.name.clone(),
            source,
        })?;

        if output.status.success() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&output.stderr).to_string()
            + &String::from_utf8_lossy(&output.stdout);
        Err(BuildError::Failed {
            step: step.to_string(),
            project: project.name.clone(),
            exit_code: output.status.code(),
            output: text.trim().to_string(),
        })
    }
}

impl BuildProcess for CommandBuildProcess {
    fn initial_build(&self, project: &ProjectUnderTest) -> Result<(), BuildError> {
        self.run("initial build", project, None)
    }

    fn compile_mutant(&self, project: &ProjectUnderTest, mutant: &Mutant) -> Result<(), BuildError> {
        self.run(&format!("compile mutant {}", mutant.id), project, Some(mutant))
    }
}
