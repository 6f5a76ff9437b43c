use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_stress_core::prelude::{
    AnomalyKind, AnomalyLedger, DelegatedShutdownListener, Phase, ShutdownHandle,
    ShutdownSignalError, WorkerFailure,
};
use async_stress_instruments::{Category, Sample};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{random_between_with, DriverConfig};
use crate::progress::SampleProgress;

/// State owned by one driver worker and passed to its hook for every sample.
#[derive(Debug)]
pub struct WorkerContext {
    worker_id: usize,
    sequence_index: usize,
    delay_min: Duration,
    delay_max: Duration,
    rng: StdRng,
}

impl WorkerContext {
    fn new(worker_id: usize, config: &DriverConfig) -> Self {
        Self {
            worker_id,
            sequence_index: 0,
            delay_min: config.delay_min,
            delay_max: config.delay_max,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Index of the sample currently being produced, starting from 0 for each worker.
    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    /// A processing cost drawn from the configured delay range.
    pub fn random_delay(&mut self) -> Duration {
        random_between_with(&mut self.rng, self.delay_min, self.delay_max)
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// Performs one unit of work and reports which category it belonged to.
///
/// The driver times the call, so the hook only has to do the work.
pub type SampleHook = fn(&mut WorkerContext) -> anyhow::Result<Category>;

/// The default unit of work. Picks a random category and sleeps for a random delay.
pub fn synthetic_event(ctx: &mut WorkerContext) -> anyhow::Result<Category> {
    let category = Category::random(ctx.rng());
    std::thread::sleep(ctx.random_delay());
    Ok(category)
}

#[derive(Debug)]
pub struct DriverOutput {
    /// Samples from every worker that finished, in the order the workers reported.
    pub samples: Vec<Sample>,
    /// Workers that returned an error, panicked or did not report before the join timeout.
    pub failed_workers: usize,
    pub lost_samples: usize,
    pub elapsed: Duration,
}

type WorkerReport = (usize, Result<Vec<Sample>, WorkerFailure>);

/// Run `config.worker_count` workers, each producing `config.samples_per_worker` samples with
/// `hook`.
///
/// A worker that fails loses all of its samples but never affects its siblings. Workers are
/// joined with one shared deadline; a worker that has not reported by then is abandoned and left
/// running.
pub fn run_driver(
    config: &DriverConfig,
    hook: SampleHook,
    ledger: &Arc<AnomalyLedger>,
    shutdown_handle: &ShutdownHandle,
    progress: &SampleProgress,
) -> anyhow::Result<DriverOutput> {
    log::info!(
        "Starting {} workers with {} samples each",
        config.worker_count,
        config.samples_per_worker
    );

    let (tx, rx) = mpsc::channel::<WorkerReport>();
    let start = Instant::now();

    let mut spawned = 0;
    let mut failed_workers = 0;
    for worker_id in 0..config.worker_count {
        let tx = tx.clone();
        let config = config.clone();
        let worker_ledger = ledger.clone();
        let listener = shutdown_handle.new_listener();
        let progress = progress.clone();

        let result = std::thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    run_worker(worker_id, &config, hook, &worker_ledger, listener, &progress)
                }));
                let report = match outcome {
                    Ok(Ok(samples)) => Ok(samples),
                    Ok(Err(e)) => Err(WorkerFailure::new(worker_id, format!("{e:#}"))),
                    Err(payload) => Err(WorkerFailure::panicked(worker_id, payload.as_ref())),
                };
                if tx.send((worker_id, report)).is_err() {
                    log::debug!("Worker {worker_id} finished after the driver stopped waiting");
                }
            });

        match result {
            Ok(_) => spawned += 1,
            Err(e) => {
                failed_workers += 1;
                record_spawn_failure(ledger, worker_id, &e);
            }
        }
    }
    drop(tx);

    let deadline = start + config.join_timeout;
    let mut samples = Vec::with_capacity(config.expected_samples());
    let mut reported = 0;
    while reported < spawned {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((_, Ok(worker_samples))) => {
                reported += 1;
                samples.extend(worker_samples);
            }
            Ok((worker_id, Err(failure))) => {
                reported += 1;
                failed_workers += 1;
                log::error!("{failure}");
                ledger.record(
                    Phase::Concurrency,
                    AnomalyKind::WorkerFailure,
                    format!("Worker {worker_id}: {}", failure.message()),
                );
            }
            Err(_) => break,
        }
    }
    let elapsed = start.elapsed();

    let abandoned = spawned - reported;
    if abandoned > 0 {
        failed_workers += abandoned;
        ledger.record(
            Phase::Concurrency,
            AnomalyKind::WorkerAbandoned,
            format!(
                "{abandoned} workers did not finish within {}s",
                config.join_timeout.as_secs_f64()
            ),
        );
    }
    progress.finish();

    let lost_samples = failed_workers * config.samples_per_worker;
    log::info!(
        "Driver finished in {:.2}s with {} samples, {} failed workers",
        elapsed.as_secs_f64(),
        samples.len(),
        failed_workers
    );

    Ok(DriverOutput {
        samples,
        failed_workers,
        lost_samples,
        elapsed,
    })
}

fn record_spawn_failure(ledger: &AnomalyLedger, worker_id: usize, error: &std::io::Error) {
    log::error!("Worker {worker_id} could not be started: {error}");
    ledger.record(
        Phase::Concurrency,
        AnomalyKind::WorkerFailure,
        format!("Worker {worker_id} could not be started: {error}"),
    );
}

fn run_worker(
    worker_id: usize,
    config: &DriverConfig,
    hook: SampleHook,
    ledger: &AnomalyLedger,
    mut listener: DelegatedShutdownListener,
    progress: &SampleProgress,
) -> anyhow::Result<Vec<Sample>> {
    let mut ctx = WorkerContext::new(worker_id, config);
    let mut samples = Vec::with_capacity(config.samples_per_worker);

    for sequence_index in 0..config.samples_per_worker {
        if listener.should_shutdown() {
            return Err(ShutdownSignalError::default())
                .with_context(|| format!("Stopped after {sequence_index} samples"));
        }

        ctx.sequence_index = sequence_index;
        let started = Instant::now();
        let category = hook(&mut ctx)?;
        let duration = started.elapsed();

        if duration > config.slow_sample_threshold {
            ledger.record(
                Phase::Concurrency,
                AnomalyKind::SlowSample,
                format!(
                    "Worker {worker_id} sample {sequence_index} ({category}) took {:.1}ms",
                    duration.as_secs_f64() * 1000.0
                ),
            );
        }

        samples.push(Sample {
            worker_id,
            sequence_index,
            category,
            duration,
            timestamp: Utc::now(),
        });
        progress.inc();
    }

    Ok(samples)
}
