// SPDX-License-Identifier: PMPL-1.0-or-later
//! Bounded worker pool for blocking source invocations.
//!
//! Each submission becomes a tokio task that waits for a semaphore permit
//! and then runs the work on the blocking thread pool. The permit count
//! caps how many sources are queried at once across all federations that
//! share the pool.

use std::sync::Arc;
use std::time::Duration;

use fedsearch_model::{SourceError, SourceId, SourceResult};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::debug;

use crate::error::FederationError;

/// Shared pool running source invocations.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    runtime: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Pool of `size` concurrent workers spawning onto `runtime`.
    pub fn new(runtime: Handle, size: usize) -> Self {
        let size = size.max(1);
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Pool spawning onto the runtime of the calling context.
    pub fn current(size: usize) -> Result<Self, FederationError> {
        let runtime =
            Handle::try_current().map_err(|e| FederationError::NoRuntime(e.to_string()))?;
        Ok(Self::new(runtime, size))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers not currently running a source.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop accepting work. Tasks already submitted but still waiting for a
    /// worker finish as cancelled.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.permits.is_closed()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Queue `work` for `source_id`. Never blocks.
    pub fn submit<F>(&self, source_id: SourceId, work: F) -> Result<TaskHandle, FederationError>
    where
        F: FnOnce() -> SourceResult + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(FederationError::PoolShutdown);
        }

        let permits = Arc::clone(&self.permits);
        let submitted_at = Instant::now();
        let task_source = source_id.clone();

        let join = self.runtime.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return SourceResult::failed(
                        task_source,
                        SourceError::Cancelled,
                        Duration::ZERO,
                    )
                }
            };
            match tokio::task::spawn_blocking(work).await {
                Ok(result) => result,
                Err(e) => {
                    debug!(source_id = %task_source, error = %e, "Blocking invocation did not complete");
                    SourceResult::failed(
                        task_source,
                        join_failure(&e),
                        submitted_at.elapsed(),
                    )
                }
            }
        });

        Ok(TaskHandle {
            source_id,
            submitted_at,
            join,
        })
    }
}

/// Map a task join failure onto a per-source error.
pub(crate) fn join_failure(error: &JoinError) -> SourceError {
    if error.is_panic() {
        SourceError::Panicked(error.to_string())
    } else {
        SourceError::Cancelled
    }
}

/// In-flight invocation of one source.
#[derive(Debug)]
pub struct TaskHandle {
    source_id: SourceId,
    submitted_at: Instant,
    join: JoinHandle<SourceResult>,
}

impl TaskHandle {
    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop waiting for this invocation. A source already running on a
    /// blocking thread is not interrupted; its answer is discarded.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Wait for the invocation to finish.
    pub async fn join(&mut self) -> Result<SourceResult, JoinError> {
        (&mut self.join).await
    }
}
