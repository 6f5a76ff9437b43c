use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::executor::Executor;

/// Check whether any other process has a name or command line containing `pattern`.
///
/// This process is skipped, since its own command line may contain the pattern as an argument.
pub fn is_process_running(pattern: &str) -> bool {
    let this_process_pid = Pid::from_u32(std::process::id());

    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );

    sys.processes().iter().any(|(pid, process)| {
        if *pid == this_process_pid {
            return false;
        }

        let name = process.name().to_string_lossy();
        if name.contains(pattern) {
            return true;
        }

        let cmd = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        cmd.contains(pattern)
    })
}

/// Run [is_process_running] with a time limit.
///
/// A query that does not answer within `timeout`, or that fails, is reported as "not running".
pub fn check_target_process(executor: &Executor, pattern: &str, timeout: Duration) -> bool {
    let owned_pattern = pattern.to_string();
    let result = executor.execute_in_place(async move {
        let check = tokio::task::spawn_blocking(move || is_process_running(&owned_pattern));
        let running = tokio::time::timeout(timeout, check).await??;
        Ok(running)
    });

    match result {
        Ok(running) => {
            if running {
                log::info!("Found running process matching '{pattern}'");
            } else {
                log::error!("No running process matches '{pattern}'");
            }
            running
        }
        Err(e) => {
            log::error!("Could not check for a process matching '{pattern}': {e:?}");
            false
        }
    }
}
