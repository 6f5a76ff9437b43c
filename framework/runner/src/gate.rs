use std::sync::Arc;
use std::time::Duration;

use async_stress_core::prelude::{AnomalyKind, AnomalyLedger, Phase};
use async_stress_instruments::{render_round_summary, OperationTracker, RoundRow};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::config::GateConfig;
use crate::executor::Executor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Completed,
    TimedOut,
    Failed,
}

/// What happened to the units of one admission-gated round.
#[derive(Debug, Clone, PartialEq)]
pub struct GateRoundOutcome {
    pub round: usize,
    pub completed: usize,
    /// Units that gave up waiting for a permit.
    pub timed_out: usize,
    /// Units whose task failed to run to completion.
    pub failed: usize,
    /// Units the round stopped waiting for at the join deadline.
    pub abandoned: usize,
    /// Abandoned units that held a permit and were still working when the round reported.
    pub still_running: usize,
    pub elapsed: Duration,
    pub passed: bool,
}

impl GateRoundOutcome {
    pub fn to_row(&self) -> RoundRow {
        RoundRow {
            round: self.round,
            completed: self.completed,
            timed_out: self.timed_out,
            abandoned: self.abandoned,
            still_running: self.still_running,
            elapsed_ms: self.elapsed.as_secs_f64() * 1000.0,
            passed: self.passed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatePhaseOutcome {
    pub rounds: Vec<GateRoundOutcome>,
    pub passed_rounds: usize,
}

/// Run one round of units competing for `config.capacity` permits.
///
/// Each unit waits at most `config.acquire_timeout` for a permit and then works for a random
/// duration while holding it. The round waits for all units against a single deadline and
/// abandons any that have not finished, leaving them to run out on the runtime.
pub fn run_gate_round(
    executor: &Executor,
    config: &GateConfig,
    tracker: &Arc<OperationTracker>,
    ledger: &AnomalyLedger,
    round: usize,
) -> anyhow::Result<GateRoundOutcome> {
    let kind = format!("gate_round_{round}");

    let (mut outcome, elapsed) = executor.execute_in_place({
        let config = config.clone();
        let tracker = tracker.clone();
        let kind = kind.clone();
        async move {
            let permits = Arc::new(Semaphore::new(config.capacity));
            let start = Instant::now();

            let handles = (0..config.units)
                .map(|unit| {
                    let permits = permits.clone();
                    let tracker = tracker.clone();
                    let kind = kind.clone();
                    let acquire_timeout = config.acquire_timeout;
                    let work = config.random_work();
                    tokio::spawn(async move {
                        match tokio::time::timeout(acquire_timeout, permits.acquire_owned()).await
                        {
                            Ok(Ok(_permit)) => {
                                let resource = format!("unit-{unit}");
                                let _op = tracker.start(&kind, Some(&resource));
                                tokio::time::sleep(work).await;
                                UnitOutcome::Completed
                            }
                            Ok(Err(_)) => UnitOutcome::Failed,
                            Err(_) => UnitOutcome::TimedOut,
                        }
                    })
                })
                .collect::<Vec<_>>();

            let deadline = start + config.join_timeout;
            let mut outcome = GateRoundOutcome {
                round,
                completed: 0,
                timed_out: 0,
                failed: 0,
                abandoned: 0,
                still_running: 0,
                elapsed: Duration::ZERO,
                passed: false,
            };
            for handle in handles {
                match tokio::time::timeout_at(deadline, handle).await {
                    Ok(Ok(UnitOutcome::Completed)) => outcome.completed += 1,
                    Ok(Ok(UnitOutcome::TimedOut)) => outcome.timed_out += 1,
                    Ok(Ok(UnitOutcome::Failed)) => outcome.failed += 1,
                    Ok(Err(e)) => {
                        log::error!("Gated unit in round {round} failed: {e:?}");
                        outcome.failed += 1;
                    }
                    Err(_) => outcome.abandoned += 1,
                }
            }

            Ok((outcome, start.elapsed()))
        }
    })?;

    outcome.elapsed = elapsed;
    outcome.still_running = tracker
        .active_operations()
        .iter()
        .filter(|op| op.kind == kind)
        .count();

    let fast_enough = elapsed <= config.round_ceiling;
    let enough_completed = config.enough_completed(outcome.completed);
    outcome.passed = fast_enough && enough_completed;

    if !fast_enough {
        ledger.record(
            Phase::Admission,
            AnomalyKind::SlowGateRound,
            format!(
                "Round {round} took {:.2}s, more than the {:.2}s ceiling",
                elapsed.as_secs_f64(),
                config.round_ceiling.as_secs_f64()
            ),
        );
    } else if !enough_completed {
        ledger.record(
            Phase::Admission,
            AnomalyKind::LowGateSuccess,
            format!(
                "Round {round} completed {}/{} units",
                outcome.completed, config.units
            ),
        );
    }

    if outcome.still_running > 0 {
        log::warn!(
            "Round {round} left {} units still running",
            outcome.still_running
        );
    }
    log::info!(
        "Round {round}: {}/{} completed, {} timed out, {} abandoned in {:.2}s",
        outcome.completed,
        config.units,
        outcome.timed_out,
        outcome.abandoned,
        elapsed.as_secs_f64()
    );

    Ok(outcome)
}

/// Run `config.rounds` independent rounds and check that enough of them passed.
pub fn run_gate_phase(
    executor: &Executor,
    config: &GateConfig,
    tracker: &Arc<OperationTracker>,
    ledger: &AnomalyLedger,
) -> anyhow::Result<GatePhaseOutcome> {
    log::info!(
        "Running {} admission rounds of {} units through {} permits",
        config.rounds,
        config.units,
        config.capacity
    );

    let mut rounds = Vec::with_capacity(config.rounds);
    for round in 1..=config.rounds {
        rounds.push(run_gate_round(executor, config, tracker, ledger, round)?);
    }

    let passed_rounds = rounds.iter().filter(|r| r.passed).count();
    let rows = rounds.iter().map(GateRoundOutcome::to_row).collect::<Vec<_>>();
    log::info!("Admission rounds:");
    for line in render_round_summary(&rows).lines() {
        log::info!("{line}");
    }

    if !config.enough_rounds_passed(passed_rounds) {
        ledger.record(
            Phase::Admission,
            AnomalyKind::GateRoundsFailing,
            format!("Only {passed_rounds}/{} rounds passed", config.rounds),
        );
    }

    Ok(GatePhaseOutcome {
        rounds,
        passed_rounds,
    })
}
