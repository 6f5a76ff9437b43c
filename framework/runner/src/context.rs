use std::sync::Arc;
use std::time::Duration;

use async_stress_core::prelude::{AnomalyLedger, ShutdownHandle};
use async_stress_instruments::OperationTracker;

use crate::config::{RACE_WINDOW, SLOW_OPERATION_THRESHOLD};
use crate::executor::Executor;

/// State shared by every phase of one run.
///
/// The ledger lives here rather than in a global so that each run, and each test, gets its own
/// anomaly count.
#[derive(Debug)]
pub struct RunnerContext {
    executor: Executor,
    shutdown_handle: ShutdownHandle,
    ledger: Arc<AnomalyLedger>,
    tracker: Arc<OperationTracker>,
    show_progress: bool,
}

impl RunnerContext {
    pub fn new(executor: Executor, shutdown_handle: ShutdownHandle, show_progress: bool) -> Self {
        let ledger = Arc::new(AnomalyLedger::new());
        let tracker = Arc::new(OperationTracker::new(
            ledger.clone(),
            SLOW_OPERATION_THRESHOLD,
            RACE_WINDOW,
        ));

        Self {
            executor,
            shutdown_handle,
            ledger,
            tracker,
            show_progress,
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown_handle
    }

    pub fn ledger(&self) -> &Arc<AnomalyLedger> {
        &self.ledger
    }

    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }

    pub fn show_progress(&self) -> bool {
        self.show_progress
    }

    /// Signal the background threads to stop and shut the runtime down.
    ///
    /// Units abandoned by the admission rounds get `grace` to finish before they are dropped.
    pub fn close(self, grace: Duration) {
        self.shutdown_handle.shutdown();
        self.executor.close(grace);
    }
}
