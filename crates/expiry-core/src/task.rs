//! Detached task helpers

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::error;

use crate::error::CoreError;

/// Wrap a fallible task so its failure is logged and counted
pub(crate) fn observed<F>(
    cache_name: &str,
    task: &'static str,
    fut: F,
) -> impl Future<Output = ()> + Send + 'static
where
    F: Future<Output = Result<(), CoreError>> + Send + 'static,
{
    let cache_name = cache_name.to_string();
    async move {
        if let Err(e) = fut.await {
            error!("Detached {} for cache {} failed: {}", task, cache_name, e);
            metrics::counter!("expiry_detached_failures_total", "cache" => cache_name, "task" => task)
                .increment(1);
        }
    }
}

/// Run a task without joining it; failures are still logged
pub(crate) fn spawn_detached<F>(cache_name: &str, task: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), CoreError>> + Send + 'static,
{
    tokio::spawn(observed(cache_name, task, fut))
}
