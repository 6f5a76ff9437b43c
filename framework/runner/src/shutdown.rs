use tokio::signal;

use async_stress_core::prelude::ShutdownHandle;

use crate::executor::Executor;

/// Listen for Ctrl-C on the executor's runtime and turn it into a shutdown signal.
pub(crate) fn start_shutdown_listener(executor: &Executor, shutdown_handle: &ShutdownHandle) {
    let listener_handle = shutdown_handle.clone();
    executor.spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                log::warn!("Received shutdown signal, stopping workers...");
                listener_handle.shutdown();
            }
            Err(e) => log::error!("Failed to listen for Ctrl-C: {e:?}"),
        }
    });
}
