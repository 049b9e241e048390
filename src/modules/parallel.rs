use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::errors::PredictError;
use crate::core::module::Module;
use crate::data::{Example, Prediction};

pub const DEFAULT_NUM_WORKERS: usize = 4;

/// One unit of fan-out work: a module and the inputs to run it on.
pub type ExecutionPair = (Arc<dyn Module>, Example);

/// Outcome of a fan-out run. `results` is in input order with `None` at
/// failed slots; `errors` pairs each failed index with its message.
#[derive(Debug, Default)]
pub struct ParallelResult {
    pub results: Vec<Option<Prediction>>,
    pub errors: Vec<(usize, String)>,
    pub metadata: indexmap::IndexMap<String, serde_json::Value>,
}

/// Concurrent execution over a fixed worker pool.
///
/// Pairs are fed to `num_workers` workers through a channel; results merge
/// back into input order. `max_errors: Some(n)` aborts the combined result
/// once more than `n` pairs have failed; `None` reports partial success
/// with error bookkeeping in the metadata. Dropping the returned future
/// cancels in-flight workers.
#[derive(Debug, Clone)]
pub struct Parallel {
    num_workers: usize,
    max_errors: Option<usize>,
}

impl Default for Parallel {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            max_errors: None,
        }
    }
}

impl Parallel {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            max_errors: None,
        }
    }

    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = Some(max_errors);
        self
    }

    /// Runs every pair and merges results back into input order.
    pub async fn execute(&self, pairs: Vec<ExecutionPair>) -> Result<ParallelResult, PredictError> {
        let total = pairs.len();
        if total == 0 {
            return Ok(ParallelResult::default());
        }

        let (work_tx, work_rx) = mpsc::channel::<(usize, ExecutionPair)>(total);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        let (result_tx, mut result_rx) =
            mpsc::channel::<(usize, Result<Prediction, PredictError>)>(total);

        for (index, pair) in pairs.into_iter().enumerate() {
            work_tx
                .try_send((index, pair))
                .expect("work channel sized to the job list");
        }
        drop(work_tx);

        let workers: Vec<_> = (0..self.num_workers.min(total))
            .map(|worker| {
                let work_rx = Arc::clone(&work_rx);
                let result_tx = result_tx.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { work_rx.lock().await.recv().await };
                        let Some((index, (module, inputs))) = job else {
                            break;
                        };
                        debug!(worker, index, "parallel job start");
                        let outcome = module.forward(inputs).await;
                        if result_tx.send((index, outcome)).await.is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(result_tx);

        let mut by_index: HashMap<usize, Result<Prediction, PredictError>> = HashMap::new();
        while let Some((index, outcome)) = result_rx.recv().await {
            by_index.insert(index, outcome);
        }
        for worker in workers {
            let _ = worker.await;
        }

        let mut result = ParallelResult {
            results: Vec::with_capacity(total),
            ..Default::default()
        };
        for index in 0..total {
            match by_index.remove(&index) {
                Some(Ok(prediction)) => result.results.push(Some(prediction)),
                Some(Err(err)) => {
                    result.errors.push((index, err.to_string()));
                    result.results.push(None);
                }
                None => {
                    result.errors.push((index, "worker dropped the job".to_string()));
                    result.results.push(None);
                }
            }
        }

        let error_count = result.errors.len();
        if let Some(max_errors) = self.max_errors
            && error_count > max_errors
        {
            return Err(PredictError::TooManyErrors {
                error_count,
                max_errors,
            });
        }

        result
            .metadata
            .insert("error_count".to_string(), json!(error_count));
        result
            .metadata
            .insert("success_count".to_string(), json!(total - error_count));
        result.metadata.insert(
            "errors".to_string(),
            json!(
                result
                    .errors
                    .iter()
                    .map(|(index, message)| json!({"index": index, "error": message}))
                    .collect::<Vec<_>>()
            ),
        );
        Ok(result)
    }

    /// Fan-out of one module over many inputs.
    pub async fn forward_all(
        &self,
        module: Arc<dyn Module>,
        inputs: Vec<Example>,
    ) -> Result<ParallelResult, PredictError> {
        let pairs = inputs
            .into_iter()
            .map(|example| (Arc::clone(&module), example))
            .collect();
        self.execute(pairs).await
    }
}
