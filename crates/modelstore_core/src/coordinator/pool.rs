//! Background executor for async calls.

use crate::error::{CoreError, CoreResult};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// Runs blocking store work off the caller's thread.
///
/// Backed by the blocking pool of a dedicated tokio runtime. Dropping the
/// pool does not wait: calls already running finish, calls still queued
/// are abandoned and report [`CoreError::ExecutorShutdown`].
pub struct BackgroundPool {
    runtime: Option<Runtime>,
    threads: usize,
}

impl BackgroundPool {
    /// Creates a pool with at most `threads` concurrent calls.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the runtime cannot start its threads.
    pub fn new(threads: usize) -> CoreResult<Self> {
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_name("modelstore-bg")
            .build()?;
        debug!(threads, "background pool started");
        Ok(Self {
            runtime: Some(runtime),
            threads,
        })
    }

    /// Returns the concurrency bound.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Queues `job`.
    pub(crate) fn execute(&self, job: impl FnOnce() + Send + 'static) -> CoreResult<()> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or(CoreError::ExecutorShutdown)?;
        // Completion is reported by the job itself; the join handle is not needed.
        drop(runtime.spawn_blocking(job));
        Ok(())
    }
}

impl Drop for BackgroundPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Never blocks, so the pool may be dropped from any context.
            runtime.shutdown_background();
            debug!("background pool stopped");
        }
    }
}

impl std::fmt::Debug for BackgroundPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundPool")
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_jobs_off_thread() {
        let pool = BackgroundPool::new(2).unwrap();
        let (tx, rx) = mpsc::channel();
        let caller = std::thread::current().id();
        pool.execute(move || {
            tx.send(std::thread::current().id()).unwrap();
        })
        .unwrap();
        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn zero_threads_means_one() {
        assert_eq!(BackgroundPool::new(0).unwrap().threads(), 1);
    }
}
