//! Bounded worker pool for map and reduce tasks.
//!
//! Tasks are admitted through a semaphore so that at most `workers` of
//! them execute at once; everything beyond the bound queues on the permit
//! rather than spawning unbounded threads. The actual map/reduce closures
//! are synchronous CPU work and run on the blocking thread pool. A fault
//! inside a task — an error or a panic — is caught here and reported as a
//! failed result, never as an uncaught fault that could take down the run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::task::{Phase, TaskId, TaskStatus, TaskTable};

/// Handle to one submitted task. Resolves through [`WorkerPool::await_all`].
pub struct TaskHandle<T> {
    pub id: TaskId,
    join: JoinHandle<anyhow::Result<T>>,
}

/// The resolution of one task: its output, or the contained cause of its
/// failure.
pub struct TaskResult<T> {
    pub id: TaskId,
    pub outcome: anyhow::Result<T>,
}

/// The outcome of one fan-in: a result per handle, in submission order.
pub struct FanIn<T> {
    pub results: Vec<TaskResult<T>>,

    /// Whether cancellation was observed during (or before) the fan-in.
    pub cancelled: bool,
}

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    table: TaskTable,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(workers: usize, table: TaskTable, cancel: CancellationToken) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            table,
            cancel,
        }
    }

    /// Enqueue a task. It starts once a worker slot frees up, unless the
    /// run is cancelled before then — cancelled tasks resolve as Failed
    /// without ever running.
    pub fn submit<T, F>(&self, id: TaskId, phase: Phase, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.table.register(id, phase);

        let semaphore = self.semaphore.clone();
        let table = self.table.clone();
        let cancel = self.cancel.clone();

        let join = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    table.transition(id, TaskStatus::Failed);
                    return Err(anyhow!("worker pool shut down"));
                }
            };

            if cancel.is_cancelled() {
                table.transition(id, TaskStatus::Failed);
                return Err(anyhow!("cancelled before start"));
            }

            table.transition(id, TaskStatus::Running);

            let result = match tokio::task::spawn_blocking(work).await {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(anyhow!("task panicked: {}", panic_message(err))),
                Err(err) => Err(anyhow!("task aborted: {err}")),
            };

            let status = if result.is_ok() {
                TaskStatus::Done
            } else {
                TaskStatus::Failed
            };
            table.transition(id, status);

            result
        });

        TaskHandle { id, join }
    }

    /// Block until every referenced task resolves, returning one result per
    /// handle in submission order.
    ///
    /// If the cancellation token fires, tasks already in flight get `drain`
    /// to finish; whatever is still unresolved after that is abandoned and
    /// reported as Failed.
    pub async fn await_all<T: Send + 'static>(
        &self,
        handles: Vec<TaskHandle<T>>,
        drain: Duration,
    ) -> FanIn<T> {
        let mut results = Vec::with_capacity(handles.len());
        let mut drain_deadline = self.cancel.is_cancelled().then(|| Instant::now() + drain);

        for mut handle in handles {
            let joined = loop {
                if let Some(deadline) = drain_deadline {
                    match time::timeout_at(deadline, &mut handle.join).await {
                        Ok(joined) => break Some(joined),
                        Err(_) => break None,
                    }
                }
                tokio::select! {
                    joined = &mut handle.join => break Some(joined),
                    _ = self.cancel.cancelled() => {
                        drain_deadline = Some(Instant::now() + drain);
                    }
                }
            };

            let outcome = match joined {
                Some(Ok(result)) => result,
                Some(Err(err)) => {
                    self.table.transition(handle.id, TaskStatus::Failed);
                    Err(anyhow!("worker task did not complete: {err}"))
                }
                None => {
                    handle.join.abort();
                    self.table.transition(handle.id, TaskStatus::Failed);
                    Err(anyhow!("abandoned after cancellation drain timeout"))
                }
            };

            results.push(TaskResult {
                id: handle.id,
                outcome,
            });
        }

        FanIn {
            results,
            cancelled: self.cancel.is_cancelled(),
        }
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(message) = payload.downcast_ref::<&str>() {
                (*message).to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "opaque panic payload".to_string()
            }
        }
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn pool(workers: usize) -> (WorkerPool, TaskTable, CancellationToken) {
        let table = TaskTable::new();
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(workers, table.clone(), cancel.clone());
        (pool, table, cancel)
    }

    #[tokio::test]
    async fn results_come_back_in_submission_order() {
        let (pool, _, _) = pool(4);

        let handles: Vec<_> = (0u64..8)
            .map(|id| {
                pool.submit(id, Phase::Map, move || {
                    // Later submissions finish earlier.
                    std::thread::sleep(Duration::from_millis(8u64.saturating_sub(id)));
                    Ok(id)
                })
            })
            .collect();

        let fan_in = pool.await_all(handles, Duration::from_secs(1)).await;
        assert!(!fan_in.cancelled);
        let ids: Vec<u64> = fan_in
            .results
            .iter()
            .map(|result| *result.outcome.as_ref().unwrap())
            .collect();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrency_stays_within_bound() {
        let (pool, _, _) = pool(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0u64..10)
            .map(|id| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(id, Phase::Map, move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        pool.await_all(handles, Duration::from_secs(1)).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn task_error_is_contained() {
        let (pool, table, _) = pool(2);

        let ok = pool.submit(0, Phase::Map, || Ok(1u64));
        let bad = pool.submit(1, Phase::Map, || Err::<u64, _>(anyhow!("boom")));

        let fan_in = pool.await_all(vec![ok, bad], Duration::from_secs(1)).await;
        assert!(fan_in.results[0].outcome.is_ok());
        assert!(fan_in.results[1].outcome.is_err());
        assert_eq!(table.status(0), Some(TaskStatus::Done));
        assert_eq!(table.status(1), Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn task_panic_is_contained() {
        let (pool, table, _) = pool(2);

        let bad = pool.submit(0, Phase::Map, || -> anyhow::Result<()> {
            panic!("mapper exploded")
        });
        let ok = pool.submit(1, Phase::Map, || Ok(()));

        let fan_in = pool.await_all(vec![bad, ok], Duration::from_secs(1)).await;
        let err = fan_in.results[0].outcome.as_ref().err().unwrap();
        assert!(err.to_string().contains("mapper exploded"));
        assert!(fan_in.results[1].outcome.is_ok());
        assert_eq!(table.status(0), Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn cancelled_tasks_never_start() {
        let (pool, table, cancel) = pool(2);
        cancel.cancel();

        let started = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0u64..4)
            .map(|id| {
                let started = started.clone();
                pool.submit(id, Phase::Map, move || {
                    started.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        let fan_in = pool.await_all(handles, Duration::from_millis(100)).await;
        assert!(fan_in.cancelled);
        assert!(fan_in.results.iter().all(|result| result.outcome.is_err()));
        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(table.count(Phase::Map, TaskStatus::Failed), 4);
    }
}
