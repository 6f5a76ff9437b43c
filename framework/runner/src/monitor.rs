use async_stress_core::prelude::DelegatedShutdownListener;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::config::HIGH_CPU_USAGE_PERCENT;

/// Monitor the resource usage of the stress runner process and report high usage.
///
/// Note that this won't stop the suite proceeding, it will just log a warning to let the user know
/// that latency results might be skewed by the harness itself.
///
/// The CPU usage for the process is collected every [sysinfo::MINIMUM_CPU_UPDATE_INTERVAL] and checked.
/// If it is above [HIGH_CPU_USAGE_PERCENT] with respect to the number of cores then a warning is logged.
pub(crate) fn start_monitor(mut shutdown_listener: DelegatedShutdownListener) {
    let spawned = std::thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || {
            let this_process_pid = Pid::from_u32(std::process::id());
            let mut sys = System::new();

            sys.refresh_cpu_all();
            let cpu_count = sys.cpus().len().max(1);

            loop {
                if shutdown_listener.should_shutdown() {
                    break;
                }

                sys.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[this_process_pid]),
                    true,
                    ProcessRefreshKind::nothing().with_cpu(),
                );

                match sys.process(this_process_pid) {
                    Some(process) => {
                        let usage = host_share(process.cpu_usage(), cpu_count);
                        if usage > HIGH_CPU_USAGE_PERCENT {
                            log::warn!("High CPU usage detected. The stress runner is using {usage:.2}% of the CPU, with {cpu_count} available cores");
                        }
                    }
                    None => {
                        log::debug!("Process info not available, stopping monitor");
                        break;
                    }
                }

                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            }
        });

    if let Err(e) = spawned {
        log::warn!("Failed to start monitor thread: {e:?}");
    }
}

/// Per-process CPU usage is reported per core, so 100% is one full core.
fn host_share(process_usage: f32, cpu_count: usize) -> f32 {
    (process_usage / (cpu_count * 100) as f32) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_is_relative_to_all_cores() {
        assert_eq!(25.0, host_share(100.0, 4));
        assert_eq!(100.0, host_share(800.0, 8));
    }
}
