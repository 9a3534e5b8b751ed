use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use mutant_conductor::runner::CommandRunnerFactory;
use mutant_conductor::scheduler::ProgressObserver;
use mutant_conductor::{CoverageMode, ExecutionConfig, MutantRunResult, Pipeline, RunPlan, logging};

#[derive(Debug, Parser)]
#[command(name = "cargo-conductor")]
#[command(about = "Run the mutants of a plan against a project's test suite")]
struct Cli {
    /// Log filter, e.g. `info` or `mutant_conductor=debug`.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialise, capture coverage and classify every mutant of a plan.
    Run {
        /// Plan file naming the project, its commands and its mutants.
        #[arg(long)]
        plan: PathBuf,
        /// Optional configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Worker count.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Fixed per-mutant timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Coverage capture mode.
        #[arg(long, value_enum)]
        coverage: Option<CoverageArg>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CoverageArg {
    /// Every mutant runs the full suite.
    Off,
    /// Skip unreached mutants, run the full suite for the rest.
    All,
    /// Run only the tests that reach each mutant.
    PerTest,
}

impl From<CoverageArg> for CoverageMode {
    fn from(arg: CoverageArg) -> Self {
        match arg {
            CoverageArg::Off => CoverageMode::Off,
            CoverageArg::All => CoverageMode::All,
            CoverageArg::PerTest => CoverageMode::PerTest,
        }
    }
}

/// Prints one line per finished mutant.
struct LineProgress;

impl ProgressObserver for LineProgress {
    fn on_mutant_tested(&self, result: &MutantRunResult) {
        match &result.killed_by {
            Some(test) => println!("mutant {}\t{}\t{}", result.mutant_id, result.status, test),
            None => println!("mutant {}\t{}", result.mutant_id, result.status),
        }
    }
}

fn make_config(
    config: Option<PathBuf>,
    project_dir: PathBuf,
    concurrency: Option<usize>,
    timeout_ms: Option<u64>,
    coverage: Option<CoverageArg>,
) -> Result<ExecutionConfig> {
    let mut out = match config {
        Some(path) => ExecutionConfig::from_json_file(&path)?,
        None => ExecutionConfig::default().with_project_dir(project_dir),
    };
    if let Some(concurrency) = concurrency {
        out = out.with_concurrency(concurrency);
    }
    if let Some(timeout_ms) = timeout_ms {
        out = out.with_timeout_override_ms(timeout_ms);
    }
    if let Some(coverage) = coverage {
        out = out.with_coverage_mode(coverage.into());
    }
    Ok(out)
}

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().collect();
    if args.get(1).is_some_and(|arg| arg == "conductor") {
        args.remove(1);
    }
    let cli = Cli::parse_from(args);
    logging::setup(&cli.log);

    match cli.command {
        Command::Run {
            plan,
            config,
            concurrency,
            timeout_ms,
            coverage,
        } => {
            let mut plan_file = RunPlan::from_json_file(&plan)?;
            let mut mutants = std::mem::take(&mut plan_file.mutants);
            let config = make_config(
                config,
                plan_file.project.root.clone(),
                concurrency,
                timeout_ms,
                coverage,
            )?;
            let thresholds = config.thresholds;

            let interrupted = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&interrupted);
            ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
                .context("failed to install the interrupt handler")?;

            let resolver = plan_file.resolver();
            let runners = CommandRunnerFactory::new(plan_file.tests.clone());
            let pipeline = Pipeline::new(config, &resolver, &plan_file.build, &runners)
                .with_cancellation(interrupted)
                .with_observer(&LineProgress);

            let report = match pipeline.run(&mut mutants) {
                Ok(report) => report,
                Err(err) => {
                    if let Some(failing) = err.baseline_failures() {
                        for test in failing {
                            eprintln!("failing on unmutated code: {test}");
                        }
                    }
                    return Err(err.into());
                }
            };

            println!("project: {}", report.project);
            println!(
                "baseline: {} tests in {}ms, timeout {}ms",
                report.baseline.suite.len(),
                report.baseline.total_duration.as_millis(),
                report.timeout.value().as_millis()
            );
            print!("{}", report.summary.render(&thresholds));

            if report.summary.breaks(&thresholds) {
                eprintln!(
                    "mutation score is below the break threshold of {:.2}%",
                    thresholds.break_at
                );
                std::process::exit(2);
            }
        }
    }

    Ok(())
}
