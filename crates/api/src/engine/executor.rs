//! Bounded-concurrency execution controller.
//!
//! Dispatches job routines onto Tokio tasks gated by a semaphore sized
//! to the configured worker count (default 1, strictly serial). Tracks
//! one handle per job id: submission is idempotent while a handle is
//! live, and a handle whose task has not yet acquired a worker can be
//! aborted before it starts.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Poll interval while draining in-flight handles at shutdown.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bookkeeping for one submitted job.
struct JobHandle {
    /// Set by the task after it acquires a worker permit. A handle with
    /// this still false can be aborted without any record mutation
    /// having happened.
    started: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Semaphore-bounded worker pool with a per-job handle registry.
///
/// The controller never mutates job records itself; all record mutation
/// happens inside the execution routine running on a worker.
pub struct Executor {
    semaphore: Arc<Semaphore>,
    handles: Mutex<HashMap<String, JobHandle>>,
    closed: AtomicBool,
}

impl Executor {
    pub fn new(max_workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            handles: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Dispatch a job routine to the pool.
    ///
    /// Idempotent: a no-op returning `false` while a live handle for
    /// `id` is registered, or after [`Executor::close`]. The routine
    /// itself is responsible for deregistering via
    /// [`Executor::deregister`] when it finishes.
    pub fn submit<F>(&self, id: &str, routine: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!(job_id = %id, "Executor closed, rejecting submission");
            return false;
        }

        let mut handles = self.lock_handles();
        if let Some(existing) = handles.get(id) {
            if !existing.task.is_finished() {
                tracing::debug!(job_id = %id, "Job already in flight, ignoring submission");
                return false;
            }
        }

        let started = Arc::new(AtomicBool::new(false));
        let started_flag = Arc::clone(&started);
        let semaphore = Arc::clone(&self.semaphore);

        let task = tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            started_flag.store(true, Ordering::SeqCst);
            routine.await;
        });

        handles.insert(id.to_string(), JobHandle { started, task });
        true
    }

    /// Abort a handle whose task has not begun running.
    ///
    /// Succeeds only while the task is still waiting for a worker; once
    /// the routine has started, cancellation is strictly cooperative.
    /// On success the caller force-finalizes the record, since no
    /// pipeline code is running to observe the flag.
    pub fn cancel_if_not_started(&self, id: &str) -> bool {
        let mut handles = self.lock_handles();
        let Some(handle) = handles.get(id) else {
            return false;
        };
        if handle.started.load(Ordering::SeqCst) || handle.task.is_finished() {
            return false;
        }
        handle.task.abort();
        handles.remove(id);
        true
    }

    /// Drop the handle for a finished routine.
    pub fn deregister(&self, id: &str) {
        self.lock_handles().remove(id);
    }

    /// Number of registered handles (queued or running).
    pub fn in_flight(&self) -> usize {
        self.lock_handles().len()
    }

    /// Stop accepting new submissions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Wait for all handles to resolve, up to `timeout`.
    ///
    /// Closes the pool first. In-flight routines are left to finish (or
    /// cancel cooperatively); nothing is forcibly discarded. Returns
    /// `true` when the registry emptied in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.close();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut handles = self.lock_handles();
                handles.retain(|_, handle| !handle.task.is_finished());
                if handles.is_empty() {
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    fn lock_handles(&self) -> MutexGuard<'_, HashMap<String, JobHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn submit_runs_the_routine() {
        let executor = Arc::new(Executor::new(1));
        let ran = Arc::new(AtomicBool::new(false));
        let ran_flag = Arc::clone(&ran);
        let exec = Arc::clone(&executor);

        assert!(executor.submit("a", async move {
            ran_flag.store(true, Ordering::SeqCst);
            exec.deregister("a");
        }));

        assert!(executor.drain(Duration::from_secs(5)).await);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn submit_is_idempotent_while_handle_is_live() {
        let executor = Executor::new(1);
        let count = Arc::new(AtomicUsize::new(0));

        let gate = Arc::new(Semaphore::new(0));
        let (c1, g1) = (Arc::clone(&count), Arc::clone(&gate));
        assert!(executor.submit("a", async move {
            let _permit = g1.acquire().await.unwrap();
            c1.fetch_add(1, Ordering::SeqCst);
        }));

        let c2 = Arc::clone(&count);
        assert!(!executor.submit("a", async move {
            c2.fetch_add(1, Ordering::SeqCst);
        }));

        gate.add_permits(1);
        executor.drain(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_before_start_aborts_queued_task() {
        // One worker, occupied: the second submission cannot start.
        let executor = Executor::new(1);
        let gate = Arc::new(Semaphore::new(0));

        let g1 = Arc::clone(&gate);
        executor.submit("busy", async move {
            let _permit = g1.acquire().await.unwrap();
        });

        let ran = Arc::new(AtomicBool::new(false));
        let ran_flag = Arc::clone(&ran);
        executor.submit("queued", async move {
            ran_flag.store(true, Ordering::SeqCst);
        });

        // Give the first task a moment to claim the worker permit.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(executor.cancel_if_not_started("queued"));
        assert!(!executor.cancel_if_not_started("queued"));

        gate.add_permits(1);
        assert!(executor.drain(Duration::from_secs(5)).await);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_after_start_fails() {
        let executor = Executor::new(1);
        let gate = Arc::new(Semaphore::new(0));

        let g1 = Arc::clone(&gate);
        executor.submit("a", async move {
            let _permit = g1.acquire().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!executor.cancel_if_not_started("a"));

        gate.add_permits(1);
        executor.drain(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn closed_executor_rejects_submissions() {
        let executor = Executor::new(1);
        executor.close();
        assert!(!executor.submit("a", async {}));
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn drain_times_out_on_stuck_routine() {
        let executor = Executor::new(1);
        let gate = Arc::new(Semaphore::new(0));
        let g1 = Arc::clone(&gate);
        executor.submit("stuck", async move {
            let _permit = g1.acquire().await.unwrap();
        });

        assert!(!executor.drain(Duration::from_millis(200)).await);
        gate.add_permits(1);
    }
}
