use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use async_stress_core::prelude::{Phase, ShutdownHandle};
use async_stress_instruments::{classify, render_category_summary};
use async_stress_summary_model::{
    write_run_report, AdmissionSummary, AnomalyRecord, ConcurrencySummary, ConsistencySummary,
    GateRoundSummary, RunReport, RunStatus,
};
use chrono::{DateTime, Local, Utc};

use crate::cli::StressCli;
use crate::config::{
    classifier_thresholds, DriverConfig, GateConfig, ProbeConfig, LIVENESS_TIMEOUT,
    SHUTDOWN_GRACE, STALE_OPERATION_THRESHOLD, STUCK_OPERATION_THRESHOLD,
};
use crate::context::RunnerContext;
use crate::driver::{run_driver, synthetic_event};
use crate::executor::Executor;
use crate::gate::run_gate_phase;
use crate::init::run_file_stem;
use crate::liveness::check_target_process;
use crate::monitor::start_monitor;
use crate::probe::{probe, RaceObservation};
use crate::progress::{start_progress, SampleProgress};
use crate::shutdown::start_shutdown_listener;
use crate::types::StressResult;

#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub report_path: PathBuf,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        self.report.status.exit_code()
    }
}

/// Run the whole suite and write the report.
///
/// Phase failures are captured in the report rather than returned. An error is only returned if
/// the runtime cannot be started or the report cannot be written.
pub fn run(cli: &StressCli, started_at: DateTime<Local>) -> anyhow::Result<RunOutcome> {
    let run_id = cli.run_id.clone().unwrap_or_else(|| nanoid::nanoid!());
    log::info!("Starting async safety run {run_id}");

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = ShutdownHandle::new();
    let executor = Executor::new(runtime, shutdown_handle.clone());
    start_shutdown_listener(&executor, &shutdown_handle);
    let context = RunnerContext::new(executor, shutdown_handle.clone(), !cli.no_progress);

    let mut report = RunReport::new(run_id, started_at.with_timezone(&Utc));
    let start = Instant::now();

    if cli.skip_liveness_check {
        log::warn!("Skipping the check for a running '{}' process", cli.target_process);
    } else if !check_target_process(context.executor(), &cli.target_process, LIVENESS_TIMEOUT) {
        report.set_environment_failure(format!(
            "No running process matches '{}'",
            cli.target_process
        ));
        return finish(context, report, cli, &started_at, start);
    }

    // Report high usage by the harness itself, which would skew the latency results.
    start_monitor(shutdown_handle.new_listener());

    let mut cancel_listener = shutdown_handle.new_listener();
    let mut cancelled = false;
    for phase in [
        Phase::Concurrency,
        Phase::Admission,
        Phase::MemoryConsistency,
    ] {
        cancelled = cancelled || cancel_listener.should_shutdown();
        if cancelled {
            report.add_structural_failure(format!("{phase}: skipped after shutdown signal"));
            continue;
        }

        log::info!("=== {phase} ===");
        let result = match phase {
            Phase::Concurrency => run_concurrency_phase(&context, &cli.driver_config())
                .map(|summary| report.test_results.concurrency = Some(summary)),
            Phase::Admission => run_admission_phase(&context, &cli.gate_config())
                .map(|summary| report.test_results.admission = Some(summary)),
            Phase::MemoryConsistency => run_consistency_phase(&context, &cli.probe_config())
                .map(|summary| report.test_results.memory_consistency = Some(summary)),
            Phase::Operations => Ok(()),
        };

        if let Err(e) = result {
            log::error!("The {phase} phase failed: {e:?}");
            report.add_structural_failure(format!("{phase}: {e:#}"));
        }
    }

    context.tracker().check_for_stuck(STUCK_OPERATION_THRESHOLD);
    context.tracker().cleanup_stale(STALE_OPERATION_THRESHOLD);
    let tracked = context.tracker().statistics();
    log::info!(
        "Tracked {} operations, {} still active",
        tracked.total,
        tracked.active
    );

    finish(context, report, cli, &started_at, start)
}

fn run_concurrency_phase(
    context: &RunnerContext,
    config: &DriverConfig,
) -> StressResult<ConcurrencySummary> {
    let ledger = context.ledger();
    let before = ledger.count_for(Phase::Concurrency);

    let progress = SampleProgress::default();
    if context.show_progress() {
        start_progress(
            config.expected_samples(),
            progress.clone(),
            context.shutdown_handle().new_listener(),
        );
    }

    let output = run_driver(
        config,
        synthetic_event,
        ledger,
        context.shutdown_handle(),
        &progress,
    )?;
    let stats = classify(
        &output.samples,
        output.elapsed,
        &classifier_thresholds(),
        ledger,
    )?;
    log::info!("Per category:");
    for line in render_category_summary(&stats).lines() {
        log::info!("{line}");
    }

    Ok(ConcurrencySummary {
        workers: config.worker_count,
        samples_per_worker: config.samples_per_worker,
        total_samples: stats.sample_count,
        failed_workers: output.failed_workers,
        lost_samples: output.lost_samples,
        total_time_s: stats.total_elapsed.as_secs_f64(),
        throughput: stats.throughput,
        avg_duration_ms: stats.duration_avg.as_secs_f64() * 1000.0,
        min_duration_ms: stats.duration_min.as_secs_f64() * 1000.0,
        max_duration_ms: stats.duration_max.as_secs_f64() * 1000.0,
        potential_races: stats.clustering_count,
        anomalies: ledger.count_for(Phase::Concurrency) - before,
    })
}

fn run_admission_phase(
    context: &RunnerContext,
    config: &GateConfig,
) -> StressResult<AdmissionSummary> {
    let ledger = context.ledger();
    let before = ledger.count_for(Phase::Admission);

    let outcome = run_gate_phase(context.executor(), config, context.tracker(), ledger)?;

    Ok(AdmissionSummary {
        capacity: config.capacity,
        units_per_round: config.units,
        rounds: outcome
            .rounds
            .iter()
            .map(|r| GateRoundSummary {
                round: r.round,
                completed: r.completed,
                timed_out: r.timed_out,
                abandoned: r.abandoned,
                still_running: r.still_running,
                duration_s: r.elapsed.as_secs_f64(),
                passed: r.passed,
            })
            .collect(),
        passed_rounds: outcome.passed_rounds,
        anomalies: ledger.count_for(Phase::Admission) - before,
    })
}

fn run_consistency_phase(
    context: &RunnerContext,
    config: &ProbeConfig,
) -> StressResult<ConsistencySummary> {
    let ledger = context.ledger();
    let before = ledger.count_for(Phase::MemoryConsistency);

    let outcome = probe(config, ledger)?;

    Ok(ConsistencySummary {
        expected: outcome.expected,
        locked: outcome.locked,
        unlocked: outcome.unlocked,
        locked_duration_s: outcome.locked_elapsed.as_secs_f64(),
        unlocked_duration_s: outcome.unlocked_elapsed.as_secs_f64(),
        race_observed: outcome.race == RaceObservation::Diverged,
        consistent: outcome.consistent(),
        anomalies: ledger.count_for(Phase::MemoryConsistency) - before,
    })
}

fn finish(
    context: RunnerContext,
    mut report: RunReport,
    cli: &StressCli,
    started_at: &DateTime<Local>,
    start: Instant,
) -> anyhow::Result<RunOutcome> {
    let anomalies = context
        .ledger()
        .snapshot()
        .into_iter()
        .map(|a| AnomalyRecord {
            phase: a.phase.to_string(),
            kind: a.kind.to_string(),
            message: a.message,
            detected_at: a.detected_at,
        })
        .collect();
    report.finalize(anomalies, start.elapsed().as_secs_f64());
    context.close(SHUTDOWN_GRACE);

    log::info!("=== Summary ===");
    log::info!("Duration: {:.2}s", report.duration_seconds);
    log::info!("Anomalies detected: {}", report.anomalies_detected);
    if let Some(reason) = &report.environment_failure {
        log::error!("Environment failure: {reason}");
    }
    for failure in &report.structural_failures {
        log::error!("Structural failure: {failure}");
    }
    log::info!("{}", report.verdict.describe());
    match report.status {
        RunStatus::Pass => log::info!("Status: PASS"),
        RunStatus::Fail => log::error!("Status: FAIL"),
    }

    let report_path = cli
        .output_dir
        .join(format!("{}.json", run_file_stem(started_at)));
    write_run_report(&report, &report_path)
        .with_context(|| format!("Failed to write report to {}", report_path.display()))?;
    log::info!("Report written to {}", report_path.display());

    Ok(RunOutcome {
        report,
        report_path,
    })
}
