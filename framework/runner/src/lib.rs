mod cli;
mod config;
mod context;
mod driver;
mod executor;
mod gate;
mod init;
mod liveness;
mod monitor;
mod probe;
mod progress;
mod run;
mod shutdown;
mod types;

pub mod prelude {
    pub use crate::cli::StressCli;
    pub use crate::config::*;
    pub use crate::context::RunnerContext;
    pub use crate::driver::{run_driver, synthetic_event, DriverOutput, SampleHook, WorkerContext};
    pub use crate::executor::Executor;
    pub use crate::gate::{run_gate_phase, run_gate_round, GatePhaseOutcome, GateRoundOutcome};
    pub use crate::init::{init, run_file_stem, Invocation};
    pub use crate::liveness::{check_target_process, is_process_running};
    pub use crate::probe::{probe, ProbeOutcome, RaceObservation};
    pub use crate::progress::SampleProgress;
    pub use crate::run::{run, RunOutcome};
    pub use crate::types::StressResult;
}
