use std::path::PathBuf;

use clap::Parser;

use crate::config::{DriverConfig, GateConfig, ProbeConfig};

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct StressCli {
    /// The number of concurrent workers producing synthetic events
    #[clap(long, default_value_t = 20)]
    pub workers: usize,

    /// The number of events each worker produces
    #[clap(long, default_value_t = 100)]
    pub samples_per_worker: usize,

    /// The number of admission-gated rounds to run
    #[clap(long, default_value_t = 5)]
    pub gate_rounds: usize,

    /// The number of units competing for permits in each round
    #[clap(long, default_value_t = 20)]
    pub gate_units: usize,

    /// The number of permits available in each round
    #[clap(long, default_value_t = 5)]
    pub gate_capacity: usize,

    /// The number of threads incrementing the shared counter
    #[clap(long, default_value_t = 10)]
    pub probe_threads: usize,

    /// The number of increments each probe thread performs
    #[clap(long, default_value_t = 1000)]
    pub probe_increments: usize,

    /// Pattern matched against the name and command line of running processes. The suite only
    /// runs if a matching process is found.
    #[clap(long, default_value = "OpenSim")]
    pub target_process: String,

    /// Run the suite without checking that the target process is running.
    #[clap(long, default_value = "false")]
    pub skip_liveness_check: bool,

    /// Directory that the log file and the JSON report are written to
    #[clap(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Identifier recorded in the report. A random one is generated if not set.
    #[clap(long)]
    pub run_id: Option<String>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,
}

impl StressCli {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            worker_count: self.workers,
            samples_per_worker: self.samples_per_worker,
            ..Default::default()
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            rounds: self.gate_rounds,
            units: self.gate_units,
            capacity: self.gate_capacity,
            ..Default::default()
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            threads: self.probe_threads,
            increments_per_thread: self.probe_increments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_standard_suite() {
        let cli = StressCli::try_parse_from(["async_safety"]).unwrap();

        assert_eq!(DriverConfig::default(), cli.driver_config());
        assert_eq!(GateConfig::default(), cli.gate_config());
        assert_eq!(ProbeConfig::default(), cli.probe_config());
        assert_eq!("OpenSim", cli.target_process);
        assert!(!cli.skip_liveness_check);
        assert!(cli.run_id.is_none());
    }

    #[test]
    fn overrides_flow_into_phase_configs() {
        let cli = StressCli::try_parse_from([
            "async_safety",
            "--workers",
            "4",
            "--samples-per-worker",
            "7",
            "--gate-capacity",
            "2",
            "--probe-threads",
            "3",
            "--skip-liveness-check",
            "--target-process",
            "my-engine",
        ])
        .unwrap();

        assert_eq!(28, cli.driver_config().expected_samples());
        assert_eq!(2, cli.gate_config().capacity);
        assert_eq!(3_000, cli.probe_config().expected_total());
        assert!(cli.skip_liveness_check);
        assert_eq!("my-engine", cli.target_process);
    }
}
