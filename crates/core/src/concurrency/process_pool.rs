//! Bounded pool for external processes (agent CLIs, git, test runners).

use crate::config::ProcessPoolConfig;
use crate::error::{StoreError, StoreResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Limits how many processes run at once. An unconfigured pool never waits.
///
/// Permits are owned by the running future, so they are released on every
/// exit path: completion, panic unwinding, or the caller dropping the future.
#[derive(Debug, Clone)]
pub struct ProcessPool {
    permits: Option<Arc<Semaphore>>,
    capacity: usize,
}

impl ProcessPool {
    /// `0` means unlimited.
    pub fn new(max_concurrent: usize) -> Self {
        if max_concurrent == 0 {
            return Self::unlimited();
        }
        Self {
            permits: Some(Arc::new(Semaphore::new(max_concurrent))),
            capacity: max_concurrent,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            permits: None,
            capacity: 0,
        }
    }

    pub fn from_config(config: &ProcessPoolConfig) -> Self {
        Self::new(config.max_concurrent)
    }

    /// `None` when unlimited.
    pub fn capacity(&self) -> Option<usize> {
        self.permits.as_ref().map(|_| self.capacity)
    }

    pub fn available(&self) -> Option<usize> {
        self.permits.as_ref().map(|s| s.available_permits())
    }

    /// Runs `fut` once a slot is free. Gives up with `Cancelled` if `cancel`
    /// fires while waiting.
    pub async fn run<F, T>(&self, cancel: &CancellationToken, fut: F) -> StoreResult<T>
    where
        F: Future<Output = T>,
    {
        self.run_weighted(cancel, 1, fut).await
    }

    /// Like [`run`](Self::run) but holds `weight` slots.
    pub async fn run_weighted<F, T>(
        &self,
        cancel: &CancellationToken,
        weight: u32,
        fut: F,
    ) -> StoreResult<T>
    where
        F: Future<Output = T>,
    {
        if weight == 0 {
            return Err(StoreError::Validation("process weight must be at least 1".into()));
        }
        let Some(permits) = &self.permits else {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            return Ok(fut.await);
        };
        if weight as usize > self.capacity {
            return Err(StoreError::Validation(format!(
                "process weight {weight} exceeds pool capacity {}",
                self.capacity
            )));
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            permit = permits.clone().acquire_many_owned(weight) => permit
                .map_err(|_| StoreError::Internal("process pool closed".into()))?,
        };
        debug!(weight, available = permits.available_permits(), "process slot acquired");
        let out = fut.await;
        drop(permit);
        Ok(out)
    }
}

impl Default for ProcessPool {
    fn default() -> Self {
        Self::from_config(&ProcessPoolConfig::default())
    }
}
