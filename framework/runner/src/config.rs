//! Fixed heuristic thresholds and the phase configurations built from them.
//!
//! Every number here depends on the host the harness runs on. A loaded CI machine will see
//! longer sleeps and fewer same-instant clusters than an idle workstation, so these are the
//! first place to look when results are flaky.

use std::time::Duration;

use async_stress_instruments::ClassifierThresholds;
use rand::Rng;

/// Shortest simulated processing cost of one synthetic event.
pub const SAMPLE_DELAY_MIN: Duration = Duration::from_millis(1);
/// Longest simulated processing cost of one synthetic event.
pub const SAMPLE_DELAY_MAX: Duration = Duration::from_millis(10);
/// A unit of work taking ten times the longest simulated delay means the worker was starved
/// of CPU or blocked on something it should not have been.
pub const SLOW_SAMPLE_THRESHOLD: Duration = Duration::from_millis(100);
/// Samples completing within the same unit are treated as happening at the same instant.
pub const CLUSTER_UNIT: Duration = Duration::from_millis(1);
/// More samples than this in one cluster unit is a potential contention point.
pub const CLUSTER_SIZE_LIMIT: usize = 10;
/// More contention points than this in one run is reported as an anomaly.
pub const CONTENTION_GROUP_LIMIT: usize = 5;
/// How long the driver waits for its workers before abandoning them.
pub const DRIVER_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest a gated unit waits for a permit before giving up.
pub const GATE_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);
pub const GATE_WORK_MIN: Duration = Duration::from_millis(10);
pub const GATE_WORK_MAX: Duration = Duration::from_millis(50);
/// How long a round waits for its units before abandoning them.
pub const GATE_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
/// 20 units of at most 50ms through 5 permits needs about 200ms. A round slower than this is
/// being held up by something other than the permit.
pub const GATE_ROUND_CEILING: Duration = Duration::from_secs(3);
/// Fraction of units in a round that must complete.
pub const GATE_SUCCESS_FRACTION: f64 = 0.9;
/// Fraction of rounds that must pass.
pub const GATE_ROUND_PASS_FRACTION: f64 = 0.8;

/// A process table query that takes longer than this is treated as "not running".
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);
/// Tracked operations taking longer than this are reported when they finish.
pub const SLOW_OPERATION_THRESHOLD: Duration = Duration::from_secs(5);
/// Tracked operations still running after this long are reported as stuck.
pub const STUCK_OPERATION_THRESHOLD: Duration = Duration::from_secs(30);
/// Tracked operations still running after this long are dropped from tracking.
pub const STALE_OPERATION_THRESHOLD: Duration = Duration::from_secs(300);
/// Entering the same tracked resource twice within this window is a potential race.
pub const RACE_WINDOW: Duration = Duration::from_millis(10);
/// CPU share of the whole host above which the harness warns that it may be skewing its own
/// latency results.
pub const HIGH_CPU_USAGE_PERCENT: f32 = 50.0;
/// How long abandoned tasks get to finish once the run is over.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Configuration of the synthetic load driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub worker_count: usize,
    pub samples_per_worker: usize,
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub slow_sample_threshold: Duration,
    pub join_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            worker_count: 20,
            samples_per_worker: 100,
            delay_min: SAMPLE_DELAY_MIN,
            delay_max: SAMPLE_DELAY_MAX,
            slow_sample_threshold: SLOW_SAMPLE_THRESHOLD,
            join_timeout: DRIVER_JOIN_TIMEOUT,
        }
    }
}

impl DriverConfig {
    pub fn expected_samples(&self) -> usize {
        self.worker_count * self.samples_per_worker
    }
}

/// Configuration of the admission-gated rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub rounds: usize,
    pub units: usize,
    pub capacity: usize,
    pub acquire_timeout: Duration,
    pub work_min: Duration,
    pub work_max: Duration,
    pub join_timeout: Duration,
    pub round_ceiling: Duration,
    pub success_fraction: f64,
    pub round_pass_fraction: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            units: 20,
            capacity: 5,
            acquire_timeout: GATE_ACQUIRE_TIMEOUT,
            work_min: GATE_WORK_MIN,
            work_max: GATE_WORK_MAX,
            join_timeout: GATE_JOIN_TIMEOUT,
            round_ceiling: GATE_ROUND_CEILING,
            success_fraction: GATE_SUCCESS_FRACTION,
            round_pass_fraction: GATE_ROUND_PASS_FRACTION,
        }
    }
}

impl GateConfig {
    pub fn random_work(&self) -> Duration {
        random_between(self.work_min, self.work_max)
    }

    pub fn enough_completed(&self, completed: usize) -> bool {
        completed as f64 >= self.units as f64 * self.success_fraction
    }

    pub fn enough_rounds_passed(&self, passed: usize) -> bool {
        passed as f64 >= self.rounds as f64 * self.round_pass_fraction
    }
}

/// Configuration of the shared counter probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub threads: usize,
    pub increments_per_thread: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            threads: 10,
            increments_per_thread: 1000,
        }
    }
}

impl ProbeConfig {
    pub fn expected_total(&self) -> u64 {
        self.threads as u64 * self.increments_per_thread as u64
    }
}

pub fn classifier_thresholds() -> ClassifierThresholds {
    ClassifierThresholds {
        slow_sample: SLOW_SAMPLE_THRESHOLD,
        cluster_unit: CLUSTER_UNIT,
        cluster_size_limit: CLUSTER_SIZE_LIMIT,
        contention_group_limit: CONTENTION_GROUP_LIMIT,
    }
}

/// A duration drawn uniformly from `[min, max]` at microsecond resolution.
pub(crate) fn random_between(min: Duration, max: Duration) -> Duration {
    random_between_with(&mut rand::thread_rng(), min, max)
}

pub(crate) fn random_between_with<R: Rng + ?Sized>(
    rng: &mut R,
    min: Duration,
    max: Duration,
) -> Duration {
    let lo = min.as_micros() as u64;
    let hi = (max.as_micros() as u64).max(lo);
    Duration::from_micros(rng.gen_range(lo..=hi))
}
