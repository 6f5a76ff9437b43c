use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_stress_core::prelude::{AnomalyKind, AnomalyLedger, Phase};
use parking_lot::Mutex;

use crate::config::ProbeConfig;

/// What the unlocked run says about the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceObservation {
    /// Updates were lost, which is the expected outcome for unsynchronised increments.
    Diverged,
    /// The unlocked total matched. This does not show that there is no race.
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub expected: u64,
    pub locked: u64,
    pub unlocked: u64,
    pub locked_elapsed: Duration,
    pub unlocked_elapsed: Duration,
    pub race: RaceObservation,
}

impl ProbeOutcome {
    /// Only the locked run decides consistency.
    pub fn consistent(&self) -> bool {
        self.locked == self.expected
    }
}

/// Increment a shared counter from `config.threads` threads, once under a lock and once without.
///
/// A locked total that differs from the expected one is recorded as an anomaly. The unlocked run
/// is informational and never records one.
pub fn probe(config: &ProbeConfig, ledger: &AnomalyLedger) -> anyhow::Result<ProbeOutcome> {
    let expected = config.expected_total();
    log::info!(
        "Probing a shared counter with {} threads x {} increments",
        config.threads,
        config.increments_per_thread
    );

    let locked_counter = Mutex::new(0u64);
    let locked_elapsed = run_concurrently("probe-locked", config.threads, || {
        for _ in 0..config.increments_per_thread {
            *locked_counter.lock() += 1;
        }
    })?;
    let locked = locked_counter.into_inner();

    // Load then store, so concurrent increments can overwrite each other.
    let unlocked_counter = AtomicU64::new(0);
    let unlocked_elapsed = run_concurrently("probe-unlocked", config.threads, || {
        for _ in 0..config.increments_per_thread {
            let current = unlocked_counter.load(Ordering::Relaxed);
            std::hint::spin_loop();
            unlocked_counter.store(current + 1, Ordering::Relaxed);
        }
    })?;
    let unlocked = unlocked_counter.into_inner();

    let race = if unlocked == expected {
        RaceObservation::Inconclusive
    } else {
        RaceObservation::Diverged
    };

    log::info!(
        "Locked counter: {locked}/{expected} in {:.3}s",
        locked_elapsed.as_secs_f64()
    );
    match race {
        RaceObservation::Diverged => log::info!(
            "Unlocked counter: {unlocked}/{expected} in {:.3}s, {} updates lost",
            unlocked_elapsed.as_secs_f64(),
            expected.abs_diff(unlocked)
        ),
        RaceObservation::Inconclusive => log::info!(
            "Unlocked counter: {unlocked}/{expected} in {:.3}s, no lost updates observed (inconclusive)",
            unlocked_elapsed.as_secs_f64()
        ),
    }

    let outcome = ProbeOutcome {
        expected,
        locked,
        unlocked,
        locked_elapsed,
        unlocked_elapsed,
        race,
    };

    if !outcome.consistent() {
        ledger.record(
            Phase::MemoryConsistency,
            AnomalyKind::LockedCounterMismatch,
            format!("Locked counter reached {locked}, expected {expected}"),
        );
    }

    Ok(outcome)
}

/// Run `work` on `threads` scoped threads and return how long it took for all of them to finish.
fn run_concurrently(
    label: &str,
    threads: usize,
    work: impl Fn() + Sync,
) -> anyhow::Result<Duration> {
    let start = Instant::now();
    std::thread::scope(|scope| -> anyhow::Result<Duration> {
        let handles = (0..threads)
            .map(|i| {
                std::thread::Builder::new()
                    .name(format!("{label}-{i}"))
                    .spawn_scoped(scope, &work)
            })
            .collect::<Result<Vec<_>, _>>()?;

        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("{label} thread panicked"))?;
        }

        Ok(start.elapsed())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_total_is_exact() {
        let ledger = AnomalyLedger::new();
        for (threads, increments) in [(1, 1), (4, 250), (10, 1000), (16, 5000)] {
            let config = ProbeConfig {
                threads,
                increments_per_thread: increments,
            };

            let outcome = probe(&config, &ledger).unwrap();

            assert_eq!(config.expected_total(), outcome.locked);
            assert!(outcome.consistent());
        }
        assert_eq!(0, ledger.count());
    }

    #[test]
    fn unlocked_run_never_records_an_anomaly() {
        let ledger = AnomalyLedger::new();
        let config = ProbeConfig {
            threads: 8,
            increments_per_thread: 100_000,
        };

        let outcome = probe(&config, &ledger).unwrap();

        assert!(outcome.unlocked <= outcome.expected);
        assert_eq!(
            outcome.unlocked == outcome.expected,
            outcome.race == RaceObservation::Inconclusive
        );
        assert_eq!(0, ledger.count());
    }

    #[test]
    fn single_thread_cannot_race() {
        let ledger = AnomalyLedger::new();
        let config = ProbeConfig {
            threads: 1,
            increments_per_thread: 10_000,
        };

        let outcome = probe(&config, &ledger).unwrap();

        assert_eq!(10_000, outcome.unlocked);
        assert_eq!(RaceObservation::Inconclusive, outcome.race);
    }
}
