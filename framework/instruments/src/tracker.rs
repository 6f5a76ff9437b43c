use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stress_core::prelude::{AnomalyKind, AnomalyLedger, Phase};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// An operation that has started and not yet finished.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub operation_id: String,
    pub kind: String,
    /// The resource the operation works on, if it is shared with other operations.
    pub resource_id: Option<String>,
    pub thread_name: String,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl OperationRecord {
    pub fn new(kind: &str, resource_id: Option<&str>) -> Self {
        let current = std::thread::current();
        Self {
            operation_id: nanoid::nanoid!(8),
            kind: kind.to_string(),
            resource_id: resource_id.map(str::to_string),
            thread_name: current
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:?}", current.id())),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStatistics {
    pub total: usize,
    pub active: usize,
}

/// Keeps track of operations that are in flight so that slow and stuck ones can be reported.
#[derive(Debug)]
pub struct OperationTracker {
    active: Mutex<HashMap<String, OperationRecord>>,
    /// Last time each `kind:resource` key was entered.
    last_access: Mutex<HashMap<String, Instant>>,
    total: AtomicUsize,
    slow_threshold: Duration,
    race_window: Duration,
    ledger: Arc<AnomalyLedger>,
}

impl OperationTracker {
    pub fn new(
        ledger: Arc<AnomalyLedger>,
        slow_threshold: Duration,
        race_window: Duration,
    ) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            last_access: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
            slow_threshold,
            race_window,
            ledger,
        }
    }

    /// Start tracking an operation. It is finished when the returned guard is dropped.
    ///
    /// When a `resource_id` is given, entering the same resource with the same `kind` again within
    /// the race window records a potential race.
    pub fn start(self: &Arc<Self>, kind: &str, resource_id: Option<&str>) -> TrackedOperation {
        let record = OperationRecord::new(kind, resource_id);
        let operation_id = record.operation_id.clone();
        log::trace!("Operation {operation_id} ({kind}) started on {}", record.thread_name);

        self.active.lock().insert(operation_id.clone(), record);
        self.total.fetch_add(1, Ordering::SeqCst);

        if let Some(resource_id) = resource_id {
            self.check_race(kind, resource_id);
        }

        TrackedOperation {
            tracker: self.clone(),
            operation_id,
        }
    }

    fn check_race(&self, kind: &str, resource_id: &str) {
        let key = format!("{kind}:{resource_id}");
        let now = Instant::now();

        let previous = self.last_access.lock().insert(key, now);
        if let Some(previous) = previous {
            let since = now.duration_since(previous);
            if since < self.race_window {
                self.ledger.record(
                    Phase::Operations,
                    AnomalyKind::PotentialRace,
                    format!(
                        "Resource '{resource_id}' entered by {kind} twice within {:.3}ms",
                        since.as_secs_f64() * 1000.0
                    ),
                );
            }
        }
    }

    fn finish(&self, operation_id: &str) {
        let Some(record) = self.active.lock().remove(operation_id) else {
            return;
        };

        let elapsed = record.elapsed();
        if elapsed > self.slow_threshold {
            self.ledger.record(
                Phase::Operations,
                AnomalyKind::SlowOperation,
                format!(
                    "Operation {} ({}) took {}ms",
                    record.operation_id,
                    record.kind,
                    elapsed.as_millis()
                ),
            );
        }
    }

    pub fn active_operations(&self) -> Vec<OperationRecord> {
        self.active.lock().values().cloned().collect()
    }

    /// Record one anomaly for every active operation that started more than `older_than` ago.
    ///
    /// Returns the number of stuck operations found.
    pub fn check_for_stuck(&self, older_than: Duration) -> usize {
        let stuck = self
            .active
            .lock()
            .values()
            .filter(|op| op.elapsed() > older_than)
            .cloned()
            .collect::<Vec<_>>();

        if !stuck.is_empty() {
            log::error!(
                "{} operations stuck for more than {}s",
                stuck.len(),
                older_than.as_secs_f64()
            );
        }

        for op in &stuck {
            self.ledger.record(
                Phase::Operations,
                AnomalyKind::StuckOperation,
                format!(
                    "Operation {} ({}) on {} running for {:.1}s",
                    op.operation_id,
                    op.kind,
                    op.thread_name,
                    op.elapsed().as_secs_f64()
                ),
            );
        }

        stuck.len()
    }

    /// Stop tracking operations that started more than `older_than` ago. Their guards become no-ops.
    ///
    /// Returns the number of operations removed.
    pub fn cleanup_stale(&self, older_than: Duration) -> usize {
        let mut active = self.active.lock();
        let stale = active
            .values()
            .filter(|op| op.elapsed() > older_than)
            .map(|op| op.operation_id.clone())
            .collect::<Vec<_>>();

        for operation_id in &stale {
            if let Some(op) = active.remove(operation_id) {
                log::warn!("Removed stale operation {} ({})", op.operation_id, op.kind);
            }
        }

        stale.len()
    }

    pub fn statistics(&self) -> TrackerStatistics {
        TrackerStatistics {
            total: self.total.load(Ordering::SeqCst),
            active: self.active.lock().len(),
        }
    }
}

/// Guard for a tracked operation.
#[derive(Debug)]
pub struct TrackedOperation {
    tracker: Arc<OperationTracker>,
    operation_id: String,
}

impl TrackedOperation {
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }
}

impl Drop for TrackedOperation {
    fn drop(&mut self) {
        self.tracker.finish(&self.operation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(slow: Duration) -> (Arc<AnomalyLedger>, Arc<OperationTracker>) {
        let ledger = Arc::new(AnomalyLedger::new());
        let tracker = Arc::new(OperationTracker::new(
            ledger.clone(),
            slow,
            Duration::from_millis(10),
        ));
        (ledger, tracker)
    }

    #[test]
    fn guard_drop_finishes_the_operation() {
        let (ledger, tracker) = tracker(Duration::from_secs(5));

        let op = tracker.start("gated_unit", None);
        assert_eq!(8, op.operation_id().len());
        assert_eq!(
            TrackerStatistics {
                total: 1,
                active: 1
            },
            tracker.statistics()
        );

        drop(op);
        assert_eq!(
            TrackerStatistics {
                total: 1,
                active: 0
            },
            tracker.statistics()
        );
        assert_eq!(0, ledger.count());
    }

    #[test]
    fn slow_operation_is_recorded_when_it_finishes() {
        let (ledger, tracker) = tracker(Duration::from_millis(1));

        let op = tracker.start("slow", None);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(0, ledger.count());
        drop(op);

        assert_eq!(1, ledger.count_of(AnomalyKind::SlowOperation));
    }

    #[test]
    fn stuck_operations_are_recorded_once_each() {
        let (ledger, tracker) = tracker(Duration::from_secs(60));

        let _a = tracker.start("a", None);
        let _b = tracker.start("b", None);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(0, tracker.check_for_stuck(Duration::from_secs(60)));
        assert_eq!(2, tracker.check_for_stuck(Duration::from_millis(1)));
        assert_eq!(2, ledger.count_of(AnomalyKind::StuckOperation));

        let kinds = tracker
            .active_operations()
            .into_iter()
            .map(|op| op.kind)
            .collect::<std::collections::HashSet<_>>();
        assert!(kinds.contains("a"));
        assert!(kinds.contains("b"));
    }

    #[test]
    fn same_resource_entered_twice_quickly_is_a_potential_race() {
        let (ledger, tracker) = tracker(Duration::from_secs(5));

        let first = tracker.start("write", Some("counter"));
        let second = tracker.start("write", Some("counter"));
        drop((first, second));

        assert_eq!(1, ledger.count_of(AnomalyKind::PotentialRace));
        assert_eq!(1, ledger.count_for(Phase::Operations));
    }

    #[test]
    fn distinct_keys_and_spaced_access_are_not_races() {
        let (ledger, tracker) = tracker(Duration::from_secs(5));

        drop(tracker.start("write", Some("counter")));
        drop(tracker.start("read", Some("counter")));
        drop(tracker.start("write", Some("other")));
        drop(tracker.start("write", None));
        drop(tracker.start("write", None));
        std::thread::sleep(Duration::from_millis(20));
        drop(tracker.start("write", Some("counter")));

        assert_eq!(0, ledger.count());
    }

    #[test]
    fn stale_operations_are_dropped_without_anomalies() {
        let (ledger, tracker) = tracker(Duration::from_secs(60));

        let old = tracker.start("old", None);
        std::thread::sleep(Duration::from_millis(20));
        let _fresh = tracker.start("fresh", None);

        assert_eq!(1, tracker.cleanup_stale(Duration::from_millis(10)));
        assert_eq!(1, tracker.statistics().active);
        assert_eq!("fresh", tracker.active_operations()[0].kind);

        drop(old);
        assert_eq!(1, tracker.statistics().active);
        assert_eq!(0, ledger.count());
    }
}
