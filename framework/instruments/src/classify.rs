use std::time::Duration;

use async_stress_core::prelude::{AnomalyKind, AnomalyLedger, Phase};
use itertools::{Itertools, MinMaxResult};

use crate::sample::{Category, Sample};

/// Fixed limits that the classifier compares a sample set against.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierThresholds {
    /// A maximum duration above this is an outlier.
    pub slow_sample: Duration,
    /// Width of the timestamp buckets used to approximate "the same instant".
    pub cluster_unit: Duration,
    /// A bucket holding more samples than this is one unit of potential contention.
    pub cluster_size_limit: usize,
    /// More contended buckets than this is a contention anomaly.
    pub contention_group_limit: usize,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ClassifyError {
    #[error("Cannot classify an empty sample set")]
    EmptySampleSet,
    #[error("Cannot compute throughput over zero elapsed time")]
    ZeroElapsed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryStatistics {
    pub category: Category,
    pub count: usize,
    pub duration_min: Duration,
    pub duration_avg: Duration,
    pub duration_max: Duration,
    pub duration_total: Duration,
}

/// Aggregate view over one driver run. Recomputed on every call to [classify].
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub sample_count: usize,
    pub total_elapsed: Duration,
    /// Samples per second of wall-clock time.
    pub throughput: f64,
    pub duration_min: Duration,
    pub duration_avg: Duration,
    pub duration_max: Duration,
    /// Number of timestamp buckets holding more than the cluster size limit.
    pub clustering_count: usize,
    pub largest_cluster: usize,
    pub per_category: Vec<CategoryStatistics>,
}

/// Compute aggregate statistics for a set of samples and apply the outlier and clustering
/// heuristics.
///
/// The samples are treated as an unordered multiset, so the order they were collected in does
/// not matter. Each heuristic that trips records exactly one anomaly in `ledger`; data driven
/// findings never produce an error. Only a sample set that cannot be summarised at all (empty,
/// or produced in zero time) fails.
pub fn classify(
    samples: &[Sample],
    total_elapsed: Duration,
    thresholds: &ClassifierThresholds,
    ledger: &AnomalyLedger,
) -> Result<RunStatistics, ClassifyError> {
    if samples.is_empty() {
        return Err(ClassifyError::EmptySampleSet);
    }
    if total_elapsed.is_zero() {
        return Err(ClassifyError::ZeroElapsed);
    }

    let (duration_min, duration_max) = match samples.iter().map(|s| s.duration).minmax() {
        MinMaxResult::NoElements => return Err(ClassifyError::EmptySampleSet),
        MinMaxResult::OneElement(d) => (d, d),
        MinMaxResult::MinMax(min, max) => (min, max),
    };

    log::info!("Analyzing {} samples", samples.len());

    let sample_count = samples.len();
    let total_duration = samples.iter().map(|s| s.duration).sum::<Duration>();
    let duration_avg = total_duration / sample_count as u32;
    let throughput = sample_count as f64 / total_elapsed.as_secs_f64();

    let buckets = samples
        .iter()
        .map(|s| s.bucket(thresholds.cluster_unit))
        .counts();
    let contended = buckets
        .iter()
        .filter(|&(_, &size)| size > thresholds.cluster_size_limit)
        .sorted()
        .collect::<Vec<_>>();
    for (bucket, size) in &contended {
        log::warn!("Potential contention: {size} samples in bucket {bucket}");
    }
    let clustering_count = contended.len();
    let largest_cluster = buckets.values().copied().max().unwrap_or_default();

    let per_category = samples
        .iter()
        .into_group_map_by(|s| s.category)
        .into_iter()
        .sorted_by_key(|(category, _)| *category)
        .map(|(category, group)| {
            let durations = group.iter().map(|s| s.duration).collect::<Vec<_>>();
            let duration_total = durations.iter().sum::<Duration>();
            CategoryStatistics {
                category,
                count: durations.len(),
                duration_min: durations.iter().copied().min().unwrap_or_default(),
                duration_avg: duration_total / durations.len() as u32,
                duration_max: durations.iter().copied().max().unwrap_or_default(),
                duration_total,
            }
        })
        .collect::<Vec<_>>();

    log::info!("Total samples: {sample_count}");
    log::info!("Total time: {:.2}s", total_elapsed.as_secs_f64());
    log::info!("Throughput: {throughput:.1} samples/sec");
    log::info!("Avg duration: {:.2}ms", as_ms(duration_avg));
    log::info!("Max duration: {:.2}ms", as_ms(duration_max));
    log::info!("Min duration: {:.2}ms", as_ms(duration_min));
    log::info!("Potential contention buckets: {clustering_count}");

    if duration_max > thresholds.slow_sample {
        ledger.record(
            Phase::Concurrency,
            AnomalyKind::SlowOutlier,
            format!("Max duration {:.1}ms", as_ms(duration_max)),
        );
    }

    if clustering_count > thresholds.contention_group_limit {
        ledger.record(
            Phase::Concurrency,
            AnomalyKind::Contention,
            format!("{clustering_count} potential contention buckets"),
        );
    }

    Ok(RunStatistics {
        sample_count,
        total_elapsed,
        throughput,
        duration_min,
        duration_avg,
        duration_max,
        clustering_count,
        largest_cluster,
        per_category,
    })
}

fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    const BASE_MICROS: i64 = 1_700_000_000_000_000;

    fn thresholds() -> ClassifierThresholds {
        ClassifierThresholds {
            slow_sample: Duration::from_millis(100),
            cluster_unit: Duration::from_millis(1),
            cluster_size_limit: 10,
            contention_group_limit: 5,
        }
    }

    fn sample(category: Category, duration_ms: u64, at_micros: i64) -> Sample {
        Sample {
            worker_id: 0,
            sequence_index: 0,
            category,
            duration: Duration::from_millis(duration_ms),
            timestamp: Utc.timestamp_micros(at_micros).unwrap(),
        }
    }

    /// `groups` buckets, each 1ms apart and each holding `per_group` samples.
    fn clustered(groups: usize, per_group: usize) -> Vec<Sample> {
        (0..groups)
            .flat_map(|g| {
                (0..per_group).map(move |i| {
                    sample(
                        Category::Touch,
                        5,
                        BASE_MICROS + g as i64 * 1_000 + i as i64,
                    )
                })
            })
            .collect()
    }

    #[test]
    fn empty_sample_set_fails_fast() {
        let ledger = AnomalyLedger::new();
        let result = classify(&[], Duration::from_secs(1), &thresholds(), &ledger);
        assert_eq!(Err(ClassifyError::EmptySampleSet), result);
        assert_eq!(0, ledger.count());
    }

    #[test]
    fn zero_elapsed_fails_fast() {
        let ledger = AnomalyLedger::new();
        let samples = vec![sample(Category::Timer, 3, BASE_MICROS)];
        let result = classify(&samples, Duration::ZERO, &thresholds(), &ledger);
        assert_eq!(Err(ClassifyError::ZeroElapsed), result);
    }

    #[test]
    fn computes_aggregate_statistics() {
        let ledger = AnomalyLedger::new();
        let samples = vec![
            sample(Category::Timer, 2, BASE_MICROS),
            sample(Category::Listen, 4, BASE_MICROS + 5_000),
            sample(Category::Timer, 9, BASE_MICROS + 10_000),
        ];

        let stats = classify(&samples, Duration::from_secs(2), &thresholds(), &ledger).unwrap();

        assert_eq!(3, stats.sample_count);
        assert_eq!(1.5, stats.throughput);
        assert_eq!(Duration::from_millis(2), stats.duration_min);
        assert_eq!(Duration::from_millis(5), stats.duration_avg);
        assert_eq!(Duration::from_millis(9), stats.duration_max);
        assert_eq!(0, stats.clustering_count);
        assert_eq!(1, stats.largest_cluster);
        assert_eq!(0, ledger.count());

        assert_eq!(
            vec![Category::Listen, Category::Timer],
            stats
                .per_category
                .iter()
                .map(|c| c.category)
                .collect::<Vec<_>>()
        );
        let timer = &stats.per_category[1];
        assert_eq!(2, timer.count);
        assert_eq!(Duration::from_millis(11), timer.duration_total);
        assert_eq!(Duration::from_micros(5_500), timer.duration_avg);
    }

    #[test]
    fn order_of_samples_does_not_matter() {
        let ledger = AnomalyLedger::new();
        let mut samples = clustered(3, 4);
        samples.push(sample(Category::Sensor, 40, BASE_MICROS + 50_000));

        let forward =
            classify(&samples, Duration::from_secs(1), &thresholds(), &ledger).unwrap();
        samples.reverse();
        let backward =
            classify(&samples, Duration::from_secs(1), &thresholds(), &ledger).unwrap();

        assert_eq!(forward, backward);
    }

    #[test]
    fn slow_maximum_records_one_outlier() {
        let ledger = AnomalyLedger::new();
        let samples = vec![
            sample(Category::Collision, 101, BASE_MICROS),
            sample(Category::Collision, 150, BASE_MICROS + 1_000),
        ];

        classify(&samples, Duration::from_secs(1), &thresholds(), &ledger).unwrap();

        assert_eq!(1, ledger.count());
        assert_eq!(1, ledger.count_of(AnomalyKind::SlowOutlier));
    }

    #[test]
    fn maximum_at_threshold_is_not_an_outlier() {
        let ledger = AnomalyLedger::new();
        let samples = vec![sample(Category::Collision, 100, BASE_MICROS)];

        classify(&samples, Duration::from_secs(1), &thresholds(), &ledger).unwrap();

        assert_eq!(0, ledger.count());
    }

    #[test]
    fn clusters_up_to_the_limit_are_tolerated() {
        let ledger = AnomalyLedger::new();
        let samples = clustered(5, 11);

        let stats = classify(&samples, Duration::from_secs(1), &thresholds(), &ledger).unwrap();

        assert_eq!(5, stats.clustering_count);
        assert_eq!(11, stats.largest_cluster);
        assert_eq!(0, ledger.count());
    }

    #[test]
    fn too_many_clusters_record_one_contention_anomaly() {
        let ledger = AnomalyLedger::new();
        let samples = clustered(6, 11);

        let stats = classify(&samples, Duration::from_secs(1), &thresholds(), &ledger).unwrap();

        assert_eq!(6, stats.clustering_count);
        assert_eq!(1, ledger.count());
        assert_eq!(1, ledger.count_of(AnomalyKind::Contention));
    }

    #[test]
    fn bucket_of_exactly_the_size_limit_is_not_contended() {
        let ledger = AnomalyLedger::new();
        let samples = clustered(8, 10);

        let stats = classify(&samples, Duration::from_secs(1), &thresholds(), &ledger).unwrap();

        assert_eq!(0, stats.clustering_count);
        assert_eq!(0, ledger.count());
    }
}
