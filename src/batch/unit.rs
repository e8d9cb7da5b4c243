//! Batch execution unit.

use super::window::CollapsedRequest;
use crate::error::IntoExecutionError;
use crate::isolation::IsolatedExecutor;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tracing::error;

type BatchFn<K, A, V> =
    Arc<dyn Fn(Vec<CollapsedRequest<K, A>>) -> BoxFuture<'static, Result<Vec<V>>> + Send + Sync>;

/// One batched call of caller-supplied domain logic.
///
/// The unit guarantees the invocation contract only: the batch function runs once per
/// call on the shared executor, and its output is accepted only if it has exactly one
/// value per input request.
pub struct BatchExecutionUnit<K, A, V> {
    batch_fn: BatchFn<K, A, V>,
    executor: Arc<IsolatedExecutor>,
}

impl<K, A, V> Clone for BatchExecutionUnit<K, A, V> {
    fn clone(&self) -> Self {
        Self {
            batch_fn: Arc::clone(&self.batch_fn),
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<K, A, V> BatchExecutionUnit<K, A, V>
where
    K: Send + 'static,
    A: Send + 'static,
    V: Send + 'static,
{
    pub fn new<F, Fut, E>(executor: Arc<IsolatedExecutor>, batch_fn: F) -> Self
    where
        F: Fn(Vec<CollapsedRequest<K, A>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Vec<V>, E>> + Send + 'static,
        E: IntoExecutionError + Send + 'static,
    {
        let batch_fn: BatchFn<K, A, V> = Arc::new(move |requests| {
            batch_fn(requests)
                .map(|r| r.map_err(IntoExecutionError::into_execution_error))
                .boxed()
        });
        Self { batch_fn, executor }
    }

    pub fn executor(&self) -> &Arc<IsolatedExecutor> {
        &self.executor
    }

    /// Execute the batch for `requests`, returning values in the same order.
    ///
    /// Fails with `Mapping` when the batch function returns the wrong number of values;
    /// otherwise with whatever the executor reports (`Rejected`, `Timeout`, ...).
    pub async fn execute(&self, requests: Vec<CollapsedRequest<K, A>>) -> Result<Vec<V>> {
        let expected = requests.len();
        let timeout = self.executor.context().execution_timeout;
        // Invoked only inside the admitted task, so a rejected window never calls it.
        let batch_fn = Arc::clone(&self.batch_fn);
        let values = self
            .executor
            .isolate(async move { batch_fn(requests).await }, timeout)
            .await?;

        if values.len() != expected {
            error!(
                expected,
                actual = values.len(),
                "batch function returned a result of the wrong length"
            );
            return Err(Error::Mapping {
                expected,
                actual: values.len(),
            });
        }
        Ok(values)
    }
}
