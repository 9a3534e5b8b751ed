//! Process-backed runner speaking the libtest command-line protocol.
//!
//! Discovery runs `<program> <args> -- --list`, filtered runs append
//! `--exact <names>`. The active mutant is exported through
//! [`ACTIVE_MUTANT_ENV`]; instrumented code under test reads it to switch the
//! mutation on. During coverage capture, [`COVERAGE_FILE_ENV`] names a file
//! the instrumentation appends reached mutant ids to, one per line, with a
//! `static:` prefix for mutants reached during one-time initialisation.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    CoverageCapture, RunRequest, RunnerError, RunnerFactory, TestCoverage, TestRunResult,
    TestRunner, TestSelection,
};
use crate::mutant::MutantId;
use crate::project::{TestCase, TestDurations, TestId, TestSuite};

/// Environment variable carrying the id of the mutant to activate.
pub const ACTIVE_MUTANT_ENV: &str = "CONDUCTOR_ACTIVE_MUTANT";
/// Environment variable naming the coverage output file.
pub const COVERAGE_FILE_ENV: &str = "CONDUCTOR_COVERAGE_FILE";

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const KILL_GRACE: Duration = Duration::from_secs(2);
const STATIC_PREFIX: &str = "static:";

/// How to launch the test harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRunnerConfig {
    /// Program to execute, e.g. `cargo`.
    pub program: String,
    /// Arguments placed before the `--` harness separator, e.g. `["test", "-q"]`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory the harness runs in.
    pub working_dir: PathBuf,
    /// Extra environment for every invocation.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Runner that launches one harness process per call.
#[derive(Debug)]
pub struct CommandTestRunner {
    config: CommandRunnerConfig,
    slot: usize,
    closed: bool,
}

struct ProcessOutput {
    status: Option<ExitStatus>,
    stdout: String,
    stderr: String,
    elapsed: Duration,
}

impl CommandTestRunner {
    /// Runner for the given worker slot.
    pub fn new(config: CommandRunnerConfig, slot: usize) -> Self {
        Self {
            config,
            slot,
            closed: false,
        }
    }

    fn command(&self, harness_args: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg("--")
            .args(harness_args)
            .current_dir(&self.config.working_dir)
            .envs(&self.config.env)
            .env_remove(ACTIVE_MUTANT_ENV)
            .env_remove(COVERAGE_FILE_ENV)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // The harness leads its own group so a timeout reaches everything it forked.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }

    fn ensure_open(&self) -> Result<(), RunnerError> {
        if self.closed {
            return Err(RunnerError::StartFailed(format!(
                "runner {} has been shut down",
                self.slot
            )));
        }
        Ok(())
    }

    fn selection_args(selection: &TestSelection) -> Vec<String> {
        match selection {
            TestSelection::All => Vec::new(),
            TestSelection::Only(tests) => std::iter::once("--exact".to_string())
                .chain(tests.iter().map(|t| t.as_str().to_string()))
                .collect(),
        }
    }

    /// Parse `name: test` lines emitted by `--list`.
    fn parse_listing(stdout: &str) -> Vec<TestCase> {
        stdout
            .lines()
            .filter_map(|line| line.trim().strip_suffix(": test"))
            .filter(|name| !name.is_empty())
            .map(|name| TestCase {
                id: TestId::new(name),
                source_file: None,
            })
            .collect()
    }

    /// Parse `test <name> ... ok|FAILED [<1.234s>]` lines.
    fn parse_results(stdout: &str) -> (Vec<TestId>, TestDurations) {
        let mut failing = Vec::new();
        let mut durations = TestDurations::new();

        for line in stdout.lines() {
            let Some(rest) = line.trim().strip_prefix("test ") else {
                continue;
            };
            let Some((name, verdict)) = rest.split_once(" ... ") else {
                continue;
            };
            let mut parts = verdict.split_whitespace();
            let outcome = parts.next().unwrap_or_default();
            let id = TestId::new(name.trim());

            if let Some(elapsed) = parts.next().and_then(parse_report_time) {
                durations.insert(id.clone(), elapsed);
            }
            if outcome == "FAILED" {
                failing.push(id);
            }
        }

        (failing, durations)
    }

    fn parse_coverage_file(path: &Path) -> Result<(Vec<MutantId>, Vec<MutantId>), RunnerError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(RunnerError::Io(err)),
        };

        let mut reached = Vec::new();
        let mut statics = Vec::new();
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (target, value) = match line.strip_prefix(STATIC_PREFIX) {
                Some(value) => (&mut statics, value),
                None => (&mut reached, line),
            };
            let id = value
                .parse::<u32>()
                .map_err(|_| RunnerError::Protocol(format!("bad coverage entry `{line}`")))?;
            target.push(MutantId(id));
        }
        Ok((reached, statics))
    }

    fn execute(&self, mut cmd: Command, timeout: Option<Duration>) -> Result<ProcessOutput, RunnerError> {
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|err| RunnerError::StartFailed(format!("{}: {err}", self.config.program)))?;

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = wait_with_deadline(&mut child, timeout, started)?;
        let elapsed = started.elapsed();

        let (stdout, stderr) = match status {
            Some(_) => (join_reader(stdout), join_reader(stderr)),
            None => {
                let grace = Instant::now() + KILL_GRACE;
                (
                    join_killed_reader(stdout, grace),
                    join_killed_reader(stderr, grace),
                )
            }
        };

        Ok(ProcessOutput {
            status,
            stdout,
            stderr,
            elapsed,
        })
    }
}

fn parse_report_time(token: &str) -> Option<Duration> {
    let secs = token.strip_prefix('<')?.strip_suffix("s>")?;
    secs.parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Join a reader of a killed run. A descendant that escaped the process group
/// can hold the pipe open; its reader is abandoned once `grace` passes.
fn join_killed_reader(handle: Option<JoinHandle<String>>, grace: Instant) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    while !handle.is_finished() {
        if Instant::now() >= grace {
            warn!("harness output still open after kill, abandoning reader");
            return String::new();
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    handle.join().unwrap_or_default()
}

/// Kill the harness together with its process group.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let killed = i32::try_from(child.id())
        .ok()
        .map(|pid| killpg(Pid::from_raw(pid), Signal::SIGKILL));
    if let Some(Err(err)) = &killed {
        debug!(pid = child.id(), %err, "process group kill failed");
    }
    if !matches!(killed, Some(Ok(()))) {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}

/// Wait for the child; on deadline kill it and return `None`.
fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
    started: Instant,
) -> Result<Option<ExitStatus>, RunnerError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if let Some(limit) = timeout {
            if started.elapsed() > limit {
                terminate(child);
                let _ = child.wait();
                return Ok(None);
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn tail(text: &str) -> &str {
    const MAX: usize = 512;
    let trimmed = text.trim_end();
    if trimmed.len() <= MAX {
        return trimmed;
    }
    let mut start = trimmed.len() - MAX;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

impl TestRunner for CommandTestRunner {
    fn discover_tests(&mut self) -> Result<TestSuite, RunnerError> {
        self.ensure_open()?;
        let out = self.execute(self.command(&["--list".to_string()]), None)?;
        match out.status {
            Some(status) if status.success() => Ok(TestSuite::new(Self::parse_listing(&out.stdout))),
            status => Err(RunnerError::Crashed(format!(
                "test listing exited with {status:?}: {}",
                tail(&out.stderr)
            ))),
        }
    }

    fn run(&mut self, request: &RunRequest) -> Result<TestRunResult, RunnerError> {
        self.ensure_open()?;
        // libtest treats an empty filter as "everything".
        if matches!(&request.tests, TestSelection::Only(tests) if tests.is_empty()) {
            return Ok(TestRunResult::passed(Duration::ZERO));
        }
        let mut cmd = self.command(&Self::selection_args(&request.tests));
        if let Some(mutant) = request.active_mutant {
            cmd.env(ACTIVE_MUTANT_ENV, mutant.to_string());
        }

        let out = self.execute(cmd, request.timeout)?;
        let Some(status) = out.status else {
            debug!(slot = self.slot, elapsed_ms = out.elapsed.as_millis() as u64, "run killed at timeout");
            return Ok(TestRunResult {
                elapsed: out.elapsed,
                timed_out: true,
                ..TestRunResult::default()
            });
        };

        let (failing_tests, test_durations) = Self::parse_results(&out.stdout);
        if !status.success() && failing_tests.is_empty() {
            return Err(RunnerError::Crashed(format!(
                "harness exited with {status} without reporting a failing test: {}",
                tail(&out.stderr)
            )));
        }

        Ok(TestRunResult {
            failing_tests,
            test_durations,
            elapsed: out.elapsed,
            timed_out: false,
        })
    }

    fn capture_coverage(
        &mut self,
        suite: &TestSuite,
        per_test: bool,
    ) -> Result<CoverageCapture, RunnerError> {
        self.ensure_open()?;
        let scratch = tempfile::Builder::new()
            .prefix("conductor-coverage-")
            .tempdir()?;
        let mut capture = CoverageCapture::default();

        let batches: Vec<TestSelection> = if per_test {
            suite
                .ids()
                .map(|id| TestSelection::Only(vec![id.clone()]))
                .collect()
        } else {
            vec![TestSelection::All]
        };

        for (idx, selection) in batches.into_iter().enumerate() {
            let file = scratch.path().join(format!("batch-{idx}.cov"));
            let mut cmd = self.command(&Self::selection_args(&selection));
            cmd.env(COVERAGE_FILE_ENV, &file);

            let out = self.execute(cmd, None)?;
            if !out.status.is_some_and(|s| s.success()) {
                debug!(slot = self.slot, batch = idx, "coverage batch reported failures");
            }

            let (reached, statics) = Self::parse_coverage_file(&file)?;
            capture.covered.extend(reached.iter().copied());
            capture.static_mutants.extend(statics);
            if let TestSelection::Only(mut tests) = selection {
                if let Some(test) = tests.pop() {
                    capture.per_test.push(TestCoverage {
                        test,
                        mutants: reached.into_iter().collect(),
                    });
                }
            }
        }

        Ok(capture)
    }

    fn shutdown(&mut self) -> Result<(), RunnerError> {
        self.closed = true;
        Ok(())
    }
}

/// Factory producing [`CommandTestRunner`]s that share one configuration.
#[derive(Debug, Clone)]
pub struct CommandRunnerFactory {
    config: CommandRunnerConfig,
}

impl CommandRunnerFactory {
    /// Factory for the given launch configuration.
    pub fn new(config: CommandRunnerConfig) -> Self {
        Self { config }
    }
}

impl RunnerFactory for CommandRunnerFactory {
    fn create(&self, slot: usize) -> Result<Box<dyn TestRunner>, RunnerError> {
        if !self.config.working_dir.is_dir() {
            warn!(slot, dir = %self.config.working_dir.display(), "runner working directory missing");
            return Err(RunnerError::StartFailed(format!(
                "working directory {} does not exist",
                self.config.working_dir.display()
            )));
        }
        Ok(Box::new(CommandTestRunner::new(self.config.clone(), slot)))
    }
}
