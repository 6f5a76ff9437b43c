mod anomaly;
mod failure;
mod shutdown;

pub mod prelude {
    pub use crate::anomaly::{Anomaly, AnomalyKind, AnomalyLedger, Phase};
    pub use crate::failure::WorkerFailure;
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};
}
