use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// The fixed set of synthetic event tags a worker can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum Category {
    #[display("listen")]
    Listen,
    #[display("timer")]
    Timer,
    #[display("touch")]
    Touch,
    #[display("collision")]
    Collision,
    #[display("sensor")]
    Sensor,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Listen,
        Category::Timer,
        Category::Touch,
        Category::Collision,
        Category::Sensor,
    ];

    /// Pick a category uniformly at random.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// One recorded synthetic unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub worker_id: usize,
    pub sequence_index: usize,
    pub category: Category,
    /// Wall-clock time the unit of work took.
    pub duration: Duration,
    /// Wall-clock time at which the unit of work completed.
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    /// The index of the `unit` sized time slot that this sample's timestamp falls into.
    pub fn bucket(&self, unit: Duration) -> i64 {
        let unit_us = (unit.as_micros() as i64).max(1);
        self.timestamp.timestamp_micros().div_euclid(unit_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_at(micros: i64) -> Sample {
        Sample {
            worker_id: 0,
            sequence_index: 0,
            category: Category::Timer,
            duration: Duration::from_millis(3),
            timestamp: Utc.timestamp_micros(micros).unwrap(),
        }
    }

    #[test]
    fn samples_in_the_same_millisecond_share_a_bucket() {
        let unit = Duration::from_millis(1);
        assert_eq!(
            sample_at(1_700_000_000_000_100).bucket(unit),
            sample_at(1_700_000_000_000_999).bucket(unit)
        );
        assert_ne!(
            sample_at(1_700_000_000_000_999).bucket(unit),
            sample_at(1_700_000_000_001_000).bucket(unit)
        );
    }

    #[test]
    fn zero_unit_does_not_divide_by_zero() {
        let s = sample_at(1_234);
        assert_eq!(1_234, s.bucket(Duration::ZERO));
    }

    #[test]
    fn random_category_is_from_the_fixed_set() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            assert!(Category::ALL.contains(&Category::random(&mut rng)));
        }
    }

    #[test]
    fn duration_in_millis() {
        assert_eq!(3.0, sample_at(0).duration_ms());
    }
}
