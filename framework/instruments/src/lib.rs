mod classify;
mod report;
mod sample;
mod tracker;

pub use classify::{
    classify, CategoryStatistics, ClassifierThresholds, ClassifyError, RunStatistics,
};
pub use report::{render_category_summary, render_round_summary, RoundRow};
pub use sample::{Category, Sample};
pub use tracker::{OperationRecord, OperationTracker, TrackedOperation, TrackerStatistics};
