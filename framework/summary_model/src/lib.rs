use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

/// Runs with fewer anomalies than this are reported as minor issues rather than significant ones.
pub const MINOR_ISSUE_LIMIT: usize = 5;

/// Overall outcome of a run, which also decides the process exit status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pass,
    Fail,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Pass => 0,
            RunStatus::Fail => 1,
        }
    }
}

/// How serious the anomalies found in a run are.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Clean,
    MinorIssues,
    Significant,
    /// The run did not complete, so the anomaly count does not describe the host.
    Aborted,
}

impl Verdict {
    pub fn from_anomaly_count(count: usize) -> Self {
        match count {
            0 => Verdict::Clean,
            n if n < MINOR_ISSUE_LIMIT => Verdict::MinorIssues,
            _ => Verdict::Significant,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Verdict::Clean => "ALL TESTS PASSED - no anomalies detected",
            Verdict::MinorIssues => "MINOR ISSUES DETECTED - review recommended",
            Verdict::Significant => "SIGNIFICANT ISSUES DETECTED - immediate attention required",
            Verdict::Aborted => "RUN ABORTED - environment or harness failure, results incomplete",
        }
    }
}

/// Results of the synthetic load driver and the classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcurrencySummary {
    pub workers: usize,
    pub samples_per_worker: usize,
    pub total_samples: usize,
    pub failed_workers: usize,
    /// Samples that were never produced because their worker failed or was abandoned.
    pub lost_samples: usize,
    pub total_time_s: f64,
    /// Samples per second
    pub throughput: f64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    /// Number of timestamp buckets that held more samples than the cluster size limit
    pub potential_races: usize,
    pub anomalies: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateRoundSummary {
    pub round: usize,
    pub completed: usize,
    pub timed_out: usize,
    pub abandoned: usize,
    /// Units still running when the round reported, because they were abandoned after
    /// acquiring a permit.
    pub still_running: usize,
    pub duration_s: f64,
    pub passed: bool,
}

/// Results of the admission-gated rounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdmissionSummary {
    pub capacity: usize,
    pub units_per_round: usize,
    pub rounds: Vec<GateRoundSummary>,
    pub passed_rounds: usize,
    pub anomalies: usize,
}

/// Results of the shared counter probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsistencySummary {
    pub expected: u64,
    pub locked: u64,
    pub unlocked: u64,
    pub locked_duration_s: f64,
    pub unlocked_duration_s: f64,
    /// Whether the unlocked run lost updates. `false` is inconclusive, not proof of safety.
    pub race_observed: bool,
    pub consistent: bool,
    pub anomalies: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<ConcurrencySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission: Option<AdmissionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_consistency: Option<ConsistencySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyRecord {
    pub phase: String,
    pub kind: String,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

/// The record written once at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub anomalies_detected: usize,
    pub test_results: TestResults,
    pub anomalies: Vec<AnomalyRecord>,
    /// Set when the run was aborted before any phase ran, for example because the target
    /// process was not found.
    pub environment_failure: Option<String>,
    /// Phases that failed unexpectedly.
    pub structural_failures: Vec<String>,
    pub verdict: Verdict,
    pub status: RunStatus,
}

impl RunReport {
    pub fn new(run_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            duration_seconds: 0.0,
            anomalies_detected: 0,
            test_results: TestResults::default(),
            anomalies: Vec::new(),
            environment_failure: None,
            structural_failures: Vec::new(),
            verdict: Verdict::Clean,
            status: RunStatus::Pass,
        }
    }

    pub fn set_environment_failure(&mut self, reason: String) {
        self.environment_failure = Some(reason);
    }

    pub fn add_structural_failure(&mut self, reason: String) {
        self.structural_failures.push(reason);
    }

    /// Fill in the anomalies and derive the verdict and status.
    ///
    /// The run fails if any anomaly was detected, the environment check failed or any phase
    /// failed structurally. The last two abort the run whatever the anomaly count.
    pub fn finalize(&mut self, anomalies: Vec<AnomalyRecord>, duration_seconds: f64) {
        self.anomalies_detected = anomalies.len();
        self.anomalies = anomalies;
        self.duration_seconds = duration_seconds;
        let aborted = self.environment_failure.is_some() || !self.structural_failures.is_empty();
        self.verdict = if aborted {
            Verdict::Aborted
        } else {
            Verdict::from_anomaly_count(self.anomalies_detected)
        };

        let failed = self.anomalies_detected > 0 || aborted;
        self.status = if failed {
            RunStatus::Fail
        } else {
            RunStatus::Pass
        };
    }
}

/// Write the report as pretty printed JSON to a new file at `path`.
pub fn write_run_report(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::File::create(path)?;
    store_run_report(report, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run report to a writer
pub fn store_run_report<W: Write>(report: &RunReport, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

/// Load a run report from a reader
pub fn load_run_report<R: Read>(reader: R) -> anyhow::Result<RunReport> {
    let reader = std::io::BufReader::new(reader);
    let report: RunReport = serde_json::from_reader(reader)?;
    Ok(report)
}
