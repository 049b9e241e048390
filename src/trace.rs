//! Execution trace collection.
//!
//! [`with_trace`] scopes a task-local sink around a future; every
//! [`Predict`](crate::modules::Predict) forward that runs inside it records
//! the step it executed. Trace-driven optimizers such as
//! [`BootstrapTrace`](crate::optimizer::BootstrapTrace) replay these steps
//! to mine per-leaf demonstrations.
//!
//! The sink is task-local: concurrent trace windows never observe each
//! other, and work handed to spawned tasks (e.g.
//! [`Parallel`](crate::modules::Parallel) workers) falls outside the
//! window.

use std::cell::RefCell;
use std::future::Future;

use indexmap::IndexMap;
use serde_json::Value;

/// One recorded predictor execution.
#[derive(Debug, Clone)]
pub struct TraceStep {
    /// Signature-name hint of the predictor that ran; empty when the
    /// signature is anonymous.
    pub predictor: String,
    pub inputs: IndexMap<String, Value>,
    pub outputs: IndexMap<String, Value>,
}

tokio::task_local! {
    static TRACE_SINK: RefCell<Vec<TraceStep>>;
}

/// Whether the current task is inside a trace window.
pub fn is_active() -> bool {
    TRACE_SINK.try_with(|_| ()).is_ok()
}

/// Appends a step to the current window, if any.
pub fn record(step: TraceStep) {
    let _ = TRACE_SINK.try_with(|sink| sink.borrow_mut().push(step));
}

/// Runs `future` inside a fresh trace window and returns its output
/// together with everything recorded.
pub async fn with_trace<F, T>(future: F) -> (T, Vec<TraceStep>)
where
    F: Future<Output = T>,
{
    TRACE_SINK
        .scope(RefCell::new(Vec::new()), async move {
            let output = future.await;
            let steps = TRACE_SINK.with(|sink| sink.take());
            (output, steps)
        })
        .await
}
