use std::path::Path;

use async_stress_runner::prelude::{run, StressCli};
use async_stress_summary_model::{load_run_report, RunStatus, Verdict};
use chrono::Local;

fn sample_cli_cfg(output_dir: &Path) -> StressCli {
    StressCli {
        workers: 4,
        samples_per_worker: 10,
        gate_rounds: 2,
        gate_units: 6,
        gate_capacity: 3,
        probe_threads: 4,
        probe_increments: 500,
        target_process: "OpenSim".to_string(),
        skip_liveness_check: true,
        output_dir: output_dir.to_path_buf(),
        run_id: Some("suite-test".to_string()),
        no_progress: true,
    }
}

#[test]
fn full_run_writes_a_consistent_report() {
    let dir = tempfile::tempdir().unwrap();
    let cli = sample_cli_cfg(dir.path());

    let outcome = run(&cli, Local::now()).unwrap();
    let report = &outcome.report;

    assert_eq!("suite-test", report.run_id);
    assert!(report.environment_failure.is_none());
    assert!(report.structural_failures.is_empty());
    assert_ne!(Verdict::Aborted, report.verdict);

    let concurrency = report.test_results.concurrency.as_ref().unwrap();
    assert_eq!(
        40,
        concurrency.total_samples + concurrency.lost_samples,
        "samples produced plus samples lost must account for every planned sample"
    );

    let admission = report.test_results.admission.as_ref().unwrap();
    assert_eq!(2, admission.rounds.len());

    let consistency = report.test_results.memory_consistency.as_ref().unwrap();
    assert_eq!(2_000, consistency.expected);
    assert_eq!(consistency.expected, consistency.locked);
    assert!(consistency.consistent);

    assert_eq!(report.anomalies.len(), report.anomalies_detected);
    assert_eq!(
        report.anomalies_detected == 0,
        report.status == RunStatus::Pass
    );
    assert_eq!(report.status.exit_code(), outcome.exit_code());

    let loaded = load_run_report(std::fs::File::open(&outcome.report_path).unwrap()).unwrap();
    assert_eq!(*report, loaded);
}

#[test]
fn missing_target_process_fails_without_running_phases() {
    let dir = tempfile::tempdir().unwrap();
    let cli = StressCli {
        skip_liveness_check: false,
        target_process: format!("no-such-process-{}", nanoid::nanoid!(12)),
        run_id: None,
        ..sample_cli_cfg(dir.path())
    };

    let outcome = run(&cli, Local::now()).unwrap();
    let report = &outcome.report;

    assert!(report.environment_failure.is_some());
    assert_eq!(RunStatus::Fail, report.status);
    assert_eq!(Verdict::Aborted, report.verdict);
    assert_eq!(1, outcome.exit_code());
    assert_eq!(0, report.anomalies_detected);
    assert!(report.test_results.concurrency.is_none());
    assert!(report.test_results.admission.is_none());
    assert!(report.test_results.memory_consistency.is_none());
    assert!(!report.run_id.is_empty());
    assert!(outcome.report_path.exists());
}
