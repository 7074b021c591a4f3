//! Quota-error callback registry

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CoreError;

type QuotaErrorCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync>;

/// Callbacks to run when the host reports that storage quota is exhausted
///
/// Callbacks run one at a time in registration order.
#[derive(Default)]
pub struct QuotaErrorRegistry {
    callbacks: Mutex<Vec<QuotaErrorCallback>>,
}

impl QuotaErrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback to run on every quota error
    pub fn register_callback<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let callback: QuotaErrorCallback = Arc::new(move || callback().boxed());
        let mut callbacks = self.callbacks.lock();
        callbacks.push(callback);
        debug!("Registered quota error callback ({} total)", callbacks.len());
    }

    /// Run every callback, awaiting each before starting the next
    ///
    /// Stops at the first failing callback and returns its error.
    pub async fn run_all(&self) -> Result<(), CoreError> {
        let callbacks: Vec<QuotaErrorCallback> = self.callbacks.lock().clone();
        info!("About to run {} callbacks to clean up caches", callbacks.len());

        for callback in callbacks {
            callback().await?;
        }

        info!("Finished running quota error callbacks");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.lock().is_empty()
    }
}
