/// Returned from a synthetic unit of work when it cannot produce its sample.
///
/// A failure is local to the worker that raised it. The driver records it as an anomaly, drops
/// the samples that worker had produced so far, and lets the sibling workers carry on.
#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("Worker {worker_id} failed: {msg}")]
pub struct WorkerFailure {
    worker_id: usize,
    msg: String,
}

impl WorkerFailure {
    pub fn new(worker_id: usize, msg: impl Into<String>) -> Self {
        Self {
            worker_id,
            msg: msg.into(),
        }
    }

    /// Build a failure from the payload of a caught panic.
    pub fn panicked(worker_id: usize, payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("panicked: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("panicked: {s}")
        } else {
            "panicked: unknown panic".to_string()
        };

        Self { worker_id, msg }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}
