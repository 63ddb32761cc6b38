//! Job orchestration engine.
//!
//! One [`Engine`] is constructed at startup and shut down explicitly; it
//! owns the execution controller and wires the store, the converter, and
//! the per-job execution routine together. Nothing in here is a
//! module-level global, so tests run any number of independent engines.

pub mod executor;
pub mod runner;

use std::sync::Arc;
use std::time::Duration;

use meshport_core::JobRecord;
use meshport_pipeline::Converter;
use meshport_store::{JobStore, StoreError};

use self::executor::Executor;

/// Orchestration context: store + converter + bounded executor.
pub struct Engine {
    store: Arc<JobStore>,
    converter: Arc<dyn Converter>,
    executor: Arc<Executor>,
}

impl Engine {
    pub fn new(store: Arc<JobStore>, converter: Arc<dyn Converter>, max_workers: usize) -> Self {
        Self {
            store,
            converter,
            executor: Arc::new(Executor::new(max_workers)),
        }
    }

    /// The underlying job store.
    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Dispatch a job to the worker pool (idempotent, fire-and-forget).
    pub fn submit(&self, id: &str) -> bool {
        let store = Arc::clone(&self.store);
        let converter = Arc::clone(&self.converter);
        let executor = Arc::clone(&self.executor);
        let job_id = id.to_string();

        self.executor.submit(id, async move {
            runner::run_job(&store, converter.as_ref(), &job_id).await;
            executor.deregister(&job_id);
        })
    }

    /// Request cancellation of a job.
    ///
    /// Performs the status-dependent transition in the store, then tries
    /// to abort the handle before its worker starts. When that succeeds
    /// on a record that is not yet terminal (a resubmitted `cancelling`
    /// record), the record is force-finalized; no pipeline code will
    /// ever observe the flag.
    pub fn request_cancel(&self, id: &str) -> Result<JobRecord, StoreError> {
        let mut record = self.store.request_cancel(id)?;

        if self.executor.cancel_if_not_started(id) && !record.status.is_terminal() {
            record = self.store.set_cancelled(id, "Cancelled before start")?;
        }

        self.store.append_log(id, "Cancellation requested");
        Ok(record)
    }

    /// Resubmit every job the store reports as pending after a restart.
    ///
    /// Returns the number of resumed jobs.
    pub fn resume_pending(&self) -> usize {
        let mut resumed = 0;
        for record in self.store.list_pending_for_resume() {
            self.store
                .append_log(&record.id, "Recovered after restart and queued for processing");
            if self.submit(&record.id) {
                resumed += 1;
            }
        }
        resumed
    }

    /// Stop accepting submissions and let in-flight work drain.
    pub async fn shutdown(&self, timeout: Duration) {
        let in_flight = self.executor.in_flight();
        tracing::info!(in_flight, "Draining execution controller");
        if self.executor.drain(timeout).await {
            tracing::info!("Execution controller drained");
        } else {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Drain timed out with jobs still in flight",
            );
        }
    }
}
