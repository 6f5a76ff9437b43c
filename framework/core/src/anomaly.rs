use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// The part of the suite that detected an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Phase {
    #[display("concurrency")]
    Concurrency,
    #[display("admission")]
    Admission,
    #[display("memory_consistency")]
    MemoryConsistency,
    #[display("operations")]
    Operations,
}

/// Which heuristic tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum AnomalyKind {
    /// A single synthetic unit of work exceeded the slow threshold while it was being produced.
    #[display("slow_sample")]
    SlowSample,
    /// A worker returned an error or panicked.
    #[display("worker_failure")]
    WorkerFailure,
    /// A worker did not report back before its join deadline.
    #[display("worker_abandoned")]
    WorkerAbandoned,
    /// The classifier found the maximum duration above the slow threshold.
    #[display("slow_outlier")]
    SlowOutlier,
    /// Too many timestamp buckets were over the cluster size limit.
    #[display("contention")]
    Contention,
    #[display("slow_gate_round")]
    SlowGateRound,
    #[display("low_gate_success")]
    LowGateSuccess,
    #[display("gate_rounds_failing")]
    GateRoundsFailing,
    /// The counter protected by a mutex did not add up.
    #[display("locked_counter_mismatch")]
    LockedCounterMismatch,
    #[display("slow_operation")]
    SlowOperation,
    #[display("stuck_operation")]
    StuckOperation,
    /// The same resource was entered twice by operations of one kind within the race window.
    #[display("potential_race")]
    PotentialRace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub phase: Phase,
    pub kind: AnomalyKind,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

/// Accumulates the anomalies detected during one run.
///
/// The ledger is created by the runner and handed to each phase by reference (or behind an
/// [std::sync::Arc] for worker threads). The count only ever goes up: there is no way to
/// remove or reset an entry.
#[derive(Debug, Default)]
pub struct AnomalyLedger {
    count: AtomicUsize,
    entries: Mutex<Vec<Anomaly>>,
}

impl AnomalyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an anomaly and return the updated total.
    pub fn record(&self, phase: Phase, kind: AnomalyKind, message: impl Into<String>) -> usize {
        let message = message.into();
        log::warn!("[{phase}] {kind}: {message}");

        self.entries.lock().push(Anomaly {
            phase,
            kind,
            message,
            detected_at: Utc::now(),
        });

        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn count_for(&self, phase: Phase) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|a| a.phase == phase)
            .count()
    }

    pub fn count_of(&self, kind: AnomalyKind) -> usize {
        self.entries.lock().iter().filter(|a| a.kind == kind).count()
    }

    /// Copy of the entries recorded so far, in the order they were recorded.
    pub fn snapshot(&self) -> Vec<Anomaly> {
        self.entries.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn record_returns_running_total() {
        let ledger = AnomalyLedger::new();
        assert_eq!(0, ledger.count());

        assert_eq!(
            1,
            ledger.record(Phase::Concurrency, AnomalyKind::SlowSample, "slow")
        );
        assert_eq!(
            2,
            ledger.record(Phase::Admission, AnomalyKind::LowGateSuccess, "low")
        );
        assert_eq!(2, ledger.count());
    }

    #[test]
    fn counts_by_phase_and_kind() {
        let ledger = AnomalyLedger::new();
        ledger.record(Phase::Concurrency, AnomalyKind::SlowSample, "a");
        ledger.record(Phase::Concurrency, AnomalyKind::Contention, "b");
        ledger.record(Phase::Admission, AnomalyKind::SlowGateRound, "c");

        assert_eq!(2, ledger.count_for(Phase::Concurrency));
        assert_eq!(1, ledger.count_for(Phase::Admission));
        assert_eq!(0, ledger.count_for(Phase::MemoryConsistency));
        assert_eq!(1, ledger.count_of(AnomalyKind::Contention));

        let snapshot = ledger.snapshot();
        assert_eq!(3, snapshot.len());
        assert_eq!("a", snapshot[0].message);
    }

    #[test]
    fn count_never_decreases_under_concurrent_records() {
        let ledger = Arc::new(AnomalyLedger::new());

        let writers = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        ledger.record(Phase::Concurrency, AnomalyKind::SlowSample, "slow");
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut last_seen = 0;
        while writers.iter().any(|w| !w.is_finished()) {
            let now = ledger.count();
            assert!(now >= last_seen);
            last_seen = now;
        }

        for w in writers {
            w.join().unwrap();
        }

        assert_eq!(400, ledger.count());
        assert_eq!(400, ledger.snapshot().len());
    }

    #[test]
    fn display_uses_snake_case() {
        assert_eq!("memory_consistency", Phase::MemoryConsistency.to_string());
        assert_eq!(
            "locked_counter_mismatch",
            AnomalyKind::LockedCounterMismatch.to_string()
        );
    }
}
