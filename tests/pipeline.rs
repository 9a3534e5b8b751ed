mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use common::{Behaviour, FakeBuild, FakeFactory, FakeResolver, Script, mutants};
use mutant_conductor::baseline::InitialisationError;
use mutant_conductor::build::BuildError;
use mutant_conductor::config::{CoverageMode, ExecutionConfig};
use mutant_conductor::mutant::{MutantId, MutantStatus};
use mutant_conductor::pipeline::{Pipeline, PipelineError};
use mutant_conductor::project::TestId;
use mutant_conductor::runner::{CoverageCapture, TestCoverage, TestSelection};

fn covers(test: &str, ids: &[u32]) -> TestCoverage {
    TestCoverage {
        test: TestId::from(test),
        mutants: ids.iter().copied().map(MutantId).collect(),
    }
}

fn per_test(records: Vec<TestCoverage>) -> CoverageCapture {
    CoverageCapture {
        per_test: records,
        covered: BTreeSet::new(),
        static_mutants: BTreeSet::new(),
    }
}

fn config(concurrency: usize) -> ExecutionConfig {
    ExecutionConfig::default().with_concurrency(concurrency)
}

#[test]
fn survived_killed_and_uncovered_mutants_end_to_end() {
    let script = Script::new(&["T1", "T2"])
        .with_coverage(per_test(vec![covers("T1", &[1, 2]), covers("T2", &[])]))
        .with_behaviour(2, Behaviour::Fail(vec!["T1"]));
    let factory = FakeFactory::new(script);
    let build = FakeBuild::default();
    let resolver = FakeResolver::default();

    let mut set = mutants(&[1, 2, 3]);
    let report = Pipeline::new(config(2), &resolver, &build, &factory)
        .run(&mut set)
        .expect("pipeline should complete");

    let statuses: Vec<_> = report
        .execution
        .results
        .iter()
        .map(|r| (r.mutant_id, r.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (MutantId(1), MutantStatus::Survived),
            (MutantId(2), MutantStatus::Killed),
            (MutantId(3), MutantStatus::NoCoverage),
        ]
    );
    assert_eq!(report.execution.results[1].killed_by, Some(TestId::from("T1")));
    assert_eq!(
        set.iter().map(|m| m.status()).collect::<Vec<_>>(),
        vec![MutantStatus::Survived, MutantStatus::Killed, MutantStatus::NoCoverage]
    );

    assert!(factory.mutant_runs(3).is_empty(), "uncovered mutant must never run");
    assert_eq!(build.compiled(), vec![MutantId(1), MutantId(2)]);
    for record in factory.mutant_runs(1) {
        assert_eq!(record.tests, TestSelection::Only(vec![TestId::from("T1")]));
    }

    assert_eq!(report.summary.survived, 1);
    assert_eq!(report.summary.killed, 1);
    assert_eq!(report.summary.no_coverage, 1);
    assert_eq!(report.summary.mutation_score(), Some(100.0 / 3.0));
    assert_eq!(factory.shutdowns(), factory.created());
}

#[test]
fn failing_baseline_never_reaches_the_scheduler() {
    let script = Script::new(&["T1", "T2"]).with_baseline_failing(&["T2"]);
    let factory = FakeFactory::new(script);
    let build = FakeBuild::default();
    let resolver = FakeResolver::default();

    let mut set = mutants(&[1, 2]);
    let err = Pipeline::new(config(4), &resolver, &build, &factory)
        .run(&mut set)
        .expect_err("failing baseline should abort");

    assert_eq!(err.baseline_failures(), Some(&[TestId::from("T2")][..]));
    assert!(err.to_string().contains("T2"));
    assert_eq!(factory.created(), 1, "only the baseline runner should start");
    assert!(factory.runs().iter().all(|r| r.mutant.is_none()));
    assert!(build.compiled().is_empty());
    assert!(set.iter().all(|m| m.status() == MutantStatus::Pending));
    assert_eq!(factory.shutdowns(), 1);
}

#[test]
fn initial_build_failure_is_fatal_before_any_runner_starts() {
    let factory = FakeFactory::new(Script::new(&["T1"]));
    let build = FakeBuild {
        initial_fails: true,
        ..FakeBuild::default()
    };
    let resolver = FakeResolver::default();

    let err = Pipeline::new(config(2), &resolver, &build, &factory)
        .run(&mut mutants(&[1]))
        .expect_err("broken build should abort");

    assert!(matches!(
        err,
        PipelineError::Initialisation(InitialisationError::Build(BuildError::Failed { .. }))
    ));
    assert!(err.to_string().contains("initial build"));
    assert_eq!(factory.created(), 0);
}

#[test]
fn project_without_tests_or_sources_is_rejected() {
    let factory = FakeFactory::new(Script::new(&["T1"]));
    let build = FakeBuild::default();

    for resolver in [
        FakeResolver {
            source_files: 0,
            test_projects: 1,
        },
        FakeResolver {
            source_files: 3,
            test_projects: 0,
        },
    ] {
        let err = Pipeline::new(config(1), &resolver, &build, &factory)
            .run(&mut mutants(&[1]))
            .expect_err("unusable project should abort");
        assert!(matches!(
            err,
            PipelineError::Initialisation(InitialisationError::EmptyProject { .. })
        ));
    }
    assert_eq!(factory.created(), 0);
}

#[test]
fn invalid_config_is_rejected_first() {
    let factory = FakeFactory::new(Script::new(&["T1"]));
    let build = FakeBuild::default();
    let resolver = FakeResolver::default();

    let err = Pipeline::new(config(0), &resolver, &build, &factory)
        .run(&mut mutants(&[1]))
        .expect_err("zero workers should be rejected");
    assert!(matches!(
        err,
        PipelineError::Initialisation(InitialisationError::Config(_))
    ));
}

#[test]
fn timeout_is_derived_and_timed_out_worker_is_rehomed() {
    let script = Script::new(&["T1"]).with_behaviour(1, Behaviour::Hang);
    let factory = FakeFactory::new(script);
    let build = FakeBuild::default();
    let resolver = FakeResolver::default();

    let cfg = config(1).with_coverage_mode(CoverageMode::Off);
    let report = Pipeline::new(cfg, &resolver, &build, &factory)
        .run(&mut mutants(&[1, 2]))
        .expect("pipeline should complete");

    assert_eq!(report.timeout.value(), Duration::from_millis(2000));
    assert_eq!(report.execution.results[0].status, MutantStatus::TimedOut);
    assert_eq!(report.execution.results[1].status, MutantStatus::Survived);

    let hung = factory.mutant_runs(1);
    let next = factory.mutant_runs(2);
    assert_eq!(hung.len(), 1);
    assert_eq!(next.len(), 1);
    assert_ne!(hung[0].runner, next[0].runner, "worker should get a fresh runner");
}

#[test]
fn timeout_override_supersedes_baseline() {
    let factory = FakeFactory::new(Script::new(&["T1"]));
    let build = FakeBuild::default();
    let resolver = FakeResolver::default();

    let cfg = config(1).with_timeout_override_ms(250);
    let report = Pipeline::new(cfg, &resolver, &build, &factory)
        .run(&mut mutants(&[]))
        .expect("pipeline should complete");
    assert_eq!(report.timeout.value(), Duration::from_millis(250));
    assert!(report.timeout.is_overridden());
    assert!(report.execution.results.is_empty());
    assert_eq!(report.summary.mutation_score(), None);
}

#[test]
fn crashing_runner_is_retried_once_then_inconclusive() {
    let script = Script::new(&["T1"]).with_behaviour(1, Behaviour::Crash);
    let factory = FakeFactory::new(script);
    let build = FakeBuild::default();
    let resolver = FakeResolver::default();

    let cfg = config(1).with_coverage_mode(CoverageMode::Off);
    let report = Pipeline::new(cfg, &resolver, &build, &factory)
        .run(&mut mutants(&[1, 2]))
        .expect("a crashing mutant must not abort the run");

    let crashed = &report.execution.results[0];
    assert_eq!(crashed.status, MutantStatus::Inconclusive);
    assert_eq!(crashed.attempts, 2);
    assert!(crashed
        .status_reason
        .as_deref()
        .is_some_and(|r| r.contains("lost its host")));
    assert_eq!(factory.mutant_runs(1).len(), 2);
    assert_eq!(report.execution.results[1].status, MutantStatus::Survived);
    assert_eq!(report.summary.inconclusive, 1);
}

#[test]
fn compile_errors_are_scoped_to_their_mutant() {
    let factory = FakeFactory::new(Script::new(&["T1"]));
    let build = FakeBuild {
        broken: vec![2],
        ..FakeBuild::default()
    };
    let resolver = FakeResolver::default();

    let cfg = config(2).with_coverage_mode(CoverageMode::Off);
    let report = Pipeline::new(cfg, &resolver, &build, &factory)
        .run(&mut mutants(&[1, 2, 3]))
        .expect("compile errors must not abort the run");

    assert_eq!(report.execution.results[1].status, MutantStatus::CompileError);
    assert!(factory.mutant_runs(2).is_empty());
    assert_eq!(report.summary.compile_errors, 1);
    assert_eq!(report.summary.survived, 2);
}

#[test]
fn coverage_off_runs_every_mutant_against_the_full_suite() {
    let script = Script::new(&["T1", "T2"]).with_coverage(per_test(vec![covers("T1", &[1])]));
    let factory = FakeFactory::new(script);
    let build = FakeBuild::default();
    let resolver = FakeResolver::default();

    let cfg = config(2).with_coverage_mode(CoverageMode::Off);
    let report = Pipeline::new(cfg, &resolver, &build, &factory)
        .run(&mut mutants(&[1, 2]))
        .expect("pipeline should complete");

    assert!(report
        .execution
        .results
        .iter()
        .all(|r| r.status == MutantStatus::Survived));
    for id in [1, 2] {
        let runs = factory.mutant_runs(id);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].tests, TestSelection::All);
    }
}

#[test]
fn static_mutants_run_the_full_suite_under_per_test_coverage() {
    let mut capture = per_test(vec![covers("T1", &[1])]);
    capture.static_mutants.insert(MutantId(2));
    let script = Script::new(&["T1", "T2"])
        .with_coverage(capture)
        .with_behaviour(2, Behaviour::Fail(vec!["T2"]));
    let factory = FakeFactory::new(script);
    let build = FakeBuild::default();
    let resolver = FakeResolver::default();

    let report = Pipeline::new(config(1), &resolver, &build, &factory)
        .run(&mut mutants(&[1, 2]))
        .expect("pipeline should complete");

    assert_eq!(report.execution.results[1].status, MutantStatus::Killed);
    assert_eq!(report.execution.results[1].killed_by, Some(TestId::from("T2")));
    assert_eq!(factory.mutant_runs(2)[0].tests, TestSelection::All);
}

#[test]
fn ignored_mutants_are_reported_without_running() {
    let factory = FakeFactory::new(Script::new(&["T1"]));
    let build = FakeBuild::default();
    let resolver = FakeResolver::default();

    let mut set = mutants(&[1, 2]);
    set[0] = set[0].clone().ignored("inside a debug_assert");
    let cfg = config(1).with_coverage_mode(CoverageMode::Off);
    let report = Pipeline::new(cfg, &resolver, &build, &factory)
        .run(&mut set)
        .expect("pipeline should complete");

    assert_eq!(report.execution.results[0].status, MutantStatus::Ignored);
    assert_eq!(
        report.execution.results[0].status_reason.as_deref(),
        Some("inside a debug_assert")
    );
    assert!(factory.mutant_runs(1).is_empty());
    assert_eq!(build.compiled(), vec![MutantId(2)]);
}
