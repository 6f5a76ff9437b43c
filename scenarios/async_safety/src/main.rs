use async_stress_runner::prelude::{init, run, StressResult};

fn main() -> StressResult<()> {
    let invocation = init()?;
    log::info!("Logging to {}", invocation.log_path.display());

    match run(&invocation.cli, invocation.started_at) {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(e) => {
            log::error!("Run failed: {e:?}");
            std::process::exit(1);
        }
    }
}
