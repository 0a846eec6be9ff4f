//! The orchestrator: sequences fetch, map, shuffle and reduce for one
//! pipeline run.
//!
//! The orchestrator is the only component with cross-phase knowledge. Its
//! own logic is single-threaded and suspends at exactly two points — the
//! map fan-in and the reduce fan-in — while the worker pool executes tasks.
//! It owns retry policy (a failed task is re-dispatched with the same
//! payload up to `max_retries` attempts, then marked permanently failed and
//! the run degrades to a partial result) and reacts to the cancellation
//! token by draining in-flight work and returning whatever aggregation
//! exists.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::{KeyValue, MapFn, PipelineError, Record, ReduceFn, Workload};

use crate::pool::WorkerPool;
use crate::shuffle::{shuffle, ShuffleGroup};
use crate::source::InputSource;
use crate::task::{Phase, Task, TaskId, TaskTable};

/// Tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Worker pool concurrency bound.
    pub workers: usize,

    /// Maximum attempts per task before it is marked permanently failed.
    pub max_retries: u32,

    /// Number of reduce buckets.
    pub n_reduce: usize,

    /// Skip-and-log records that fail to decode instead of failing the
    /// map task.
    pub skip_bad_records: bool,

    /// How long in-flight tasks may keep running after cancellation.
    pub drain_timeout: Duration,

    /// Auxiliary argument passed through to the workload functions.
    pub aux: Bytes,
}

impl Default for RunConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            workers,
            max_retries: 3,
            n_reduce: workers,
            skip_bad_records: false,
            drain_timeout: Duration::from_secs(5),
            aux: Bytes::new(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every task resolved successfully.
    Success,

    /// Some tasks exhausted their retries; the mapping covers the rest.
    Partial,

    /// Cancellation was requested; the mapping covers whatever had fully
    /// completed by then.
    Cancelled,
}

/// Dispatch counters for the run-completion event.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub dispatched: u64,
    pub retried: u64,
    pub failed: u64,
}

/// Everything a caller learns about a finished run.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub counts: BTreeMap<String, u64>,
    pub failed_tasks: Vec<TaskId>,
    pub stats: RunStats,
}

struct PhaseOutcome<T> {
    /// Outputs of tasks that reached Done, in completion-processing order.
    done: Vec<(TaskId, T)>,
    failed: Vec<TaskId>,
    cancelled: bool,
}

pub struct Orchestrator {
    workload: Workload,
    config: RunConfig,
    cancel: CancellationToken,
    table: TaskTable,
}

impl Orchestrator {
    pub fn new(workload: Workload, config: RunConfig) -> Self {
        Self::with_cancel(workload, config, CancellationToken::new())
    }

    pub fn with_cancel(workload: Workload, config: RunConfig, cancel: CancellationToken) -> Self {
        Self {
            workload,
            config,
            cancel,
            table: TaskTable::new(),
        }
    }

    /// Token that cancels the run when triggered.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The shared task status table, readable while a run is in flight.
    pub fn task_table(&self) -> TaskTable {
        self.table.clone()
    }

    /// Drive one full pipeline run and produce the final word mapping.
    ///
    /// Fatal conditions (`SourceUnavailable`, `InvalidAggregateInput`,
    /// `ResourceExhausted`) return `Err`; task-level failures degrade the
    /// run to `Partial` instead.
    pub async fn run(&self, source: &dyn InputSource) -> Result<RunReport, PipelineError> {
        let records = source.fetch_records()?;
        info!(records = records.len(), "starting pipeline run");

        let pool = WorkerPool::new(self.config.workers, self.table.clone(), self.cancel.clone());
        let mut stats = RunStats::default();
        let mut next_task_id: TaskId = 0;
        let mut failed_tasks: Vec<TaskId> = Vec::new();

        // Map phase: one task per record, fan-out bounded only by the pool.
        let map_tasks: Vec<Task<Record>> = records
            .into_iter()
            .map(|record| {
                let id = next_task_id;
                next_task_id += 1;
                Task::new(id, Phase::Map, record)
            })
            .collect();
        info!(tasks = map_tasks.len(), "dispatching map tasks");

        let map_fn = self.workload.map_fn;
        let aux = self.config.aux.clone();
        let skip_bad_records = self.config.skip_bad_records;
        let map_phase = self
            .run_phase(&pool, map_tasks, &mut stats, move |record| {
                run_map_task(map_fn, record, aux.clone(), skip_bad_records)
            })
            .await?;

        failed_tasks.extend(&map_phase.failed);
        let map_outputs: Vec<Vec<KeyValue>> =
            map_phase.done.into_iter().map(|(_, out)| out).collect();

        if map_phase.cancelled {
            // No further dispatch after cancellation; aggregate what the
            // completed map tasks produced, locally and synchronously.
            let counts = self.aggregate_local(map_outputs);
            return Ok(self.finish(RunStatus::Cancelled, counts, failed_tasks, stats));
        }

        // Shuffle: a single synchronous aggregation step between the
        // fan-ins. Nothing to parallelize.
        info!("map fan-in complete, shuffling");
        let buckets = shuffle(map_outputs, self.config.n_reduce);

        // Reduce phase: one task per non-empty bucket.
        let reduce_tasks: Vec<Task<Vec<ShuffleGroup>>> = buckets
            .into_iter()
            .filter(|bucket| !bucket.is_empty())
            .map(|bucket| {
                let id = next_task_id;
                next_task_id += 1;
                Task::new(id, Phase::Reduce, bucket)
            })
            .collect();
        info!(tasks = reduce_tasks.len(), "dispatching reduce tasks");

        let reduce_fn = self.workload.reduce_fn;
        let aux = self.config.aux.clone();
        let reduce_phase = self
            .run_phase(&pool, reduce_tasks, &mut stats, move |bucket| {
                run_reduce_task(reduce_fn, bucket, aux.clone())
            })
            .await?;

        failed_tasks.extend(&reduce_phase.failed);

        let mut counts = BTreeMap::new();
        for (_, pairs) in reduce_phase.done {
            for (word, total) in pairs {
                counts.insert(word, total);
            }
        }

        let status = if reduce_phase.cancelled {
            RunStatus::Cancelled
        } else if failed_tasks.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };

        Ok(self.finish(status, counts, failed_tasks, stats))
    }

    /// Dispatch a set of same-phase tasks and block until all of them
    /// resolve, re-dispatching failures up to the retry bound.
    async fn run_phase<P, T, F>(
        &self,
        pool: &WorkerPool,
        tasks: Vec<Task<P>>,
        stats: &mut RunStats,
        exec: F,
    ) -> Result<PhaseOutcome<T>, PipelineError>
    where
        P: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(P) -> anyhow::Result<T> + Clone + Send + 'static,
    {
        let mut done = Vec::new();
        let mut failed = Vec::new();
        let mut pending = tasks;
        let mut cancelled = self.cancel.is_cancelled();

        while !pending.is_empty() && !cancelled {
            let mut round = std::mem::take(&mut pending);

            let mut handles = Vec::with_capacity(round.len());
            for task in &mut round {
                task.attempt += 1;
                stats.dispatched += 1;
                let exec = exec.clone();
                let payload = task.payload.clone();
                handles.push(pool.submit(task.id, task.phase, move || exec(payload)));
            }

            let fan_in = pool.await_all(handles, self.config.drain_timeout).await;
            cancelled = fan_in.cancelled;

            for (result, task) in fan_in.results.into_iter().zip(round) {
                match result.outcome {
                    Ok(output) => done.push((task.id, output)),
                    Err(cause) => {
                        let cause = match cause.downcast::<PipelineError>() {
                            Ok(err) if err.is_fatal() => {
                                error!(task = task.id, error = %err, "fatal task failure, aborting run");
                                return Err(err);
                            }
                            Ok(err) => anyhow::Error::from(err),
                            Err(cause) => cause,
                        };

                        if cancelled || task.attempt >= self.config.max_retries {
                            error!(
                                task = task.id,
                                phase = ?task.phase,
                                attempt = task.attempt,
                                error = %cause,
                                "task permanently failed"
                            );
                            stats.failed += 1;
                            failed.push(task.id);
                        } else {
                            warn!(
                                task = task.id,
                                attempt = task.attempt,
                                error = %cause,
                                "task failed, retrying"
                            );
                            stats.retried += 1;
                            pending.push(task);
                        }
                    }
                }
            }
        }

        Ok(PhaseOutcome {
            done,
            failed,
            cancelled,
        })
    }

    /// Reduce completed map output in place, without touching the pool.
    /// Used on the cancellation path, where no new tasks may be dispatched
    /// but already-completed work should still be surfaced.
    fn aggregate_local(&self, map_outputs: Vec<Vec<KeyValue>>) -> BTreeMap<String, u64> {
        let reduce_fn = self.workload.reduce_fn;
        let mut counts = BTreeMap::new();

        for bucket in shuffle(map_outputs, 1) {
            for (key, values) in bucket {
                let reduced = reduce_fn(
                    key.clone(),
                    Box::new(values.into_iter()),
                    self.config.aux.clone(),
                );
                match reduced.map(|out| parse_total(&key, &out)) {
                    Ok(Ok(total)) => {
                        counts.insert(String::from_utf8_lossy(&key).into_owned(), total);
                    }
                    Ok(Err(err)) | Err(err) => {
                        warn!(error = %err, "dropping group during cancellation aggregation");
                    }
                }
            }
        }

        counts
    }

    /// Emit the run-completion event and assemble the report. This event is
    /// the only window into internal task bookkeeping.
    fn finish(
        &self,
        status: RunStatus,
        counts: BTreeMap<String, u64>,
        failed_tasks: Vec<TaskId>,
        stats: RunStats,
    ) -> RunReport {
        info!(
            status = ?status,
            dispatched = stats.dispatched,
            retried = stats.retried,
            failed = stats.failed,
            words = counts.len(),
            "pipeline run complete"
        );
        RunReport {
            status,
            counts,
            failed_tasks,
            stats,
        }
    }
}

/// Run one map task: apply the map function to a record and materialize
/// its output. Decode failures are skipped-and-logged when the run is
/// configured that way; every other failure propagates to retry handling.
fn run_map_task(
    map_fn: MapFn,
    record: Record,
    aux: Bytes,
    skip_bad_records: bool,
) -> anyhow::Result<Vec<KeyValue>> {
    let record_key = record.key.clone();
    let result =
        map_fn(record.into_kv(), aux).and_then(|pairs| pairs.collect::<anyhow::Result<Vec<_>>>());

    match result {
        Ok(pairs) => Ok(pairs),
        Err(err) if skip_bad_records && is_decode_error(&err) => {
            warn!(record = %record_key, "skipping undecodable record");
            Ok(Vec::new())
        }
        Err(err) => Err(err),
    }
}

/// Run one reduce task: fold every group in the bucket through the reduce
/// function and parse the totals.
fn run_reduce_task(
    reduce_fn: ReduceFn,
    bucket: Vec<ShuffleGroup>,
    aux: Bytes,
) -> anyhow::Result<Vec<(String, u64)>> {
    let mut results = Vec::with_capacity(bucket.len());

    for (key, values) in bucket {
        let out = reduce_fn(key.clone(), Box::new(values.into_iter()), aux.clone())?;
        let total = parse_total(&key, &out)?;
        results.push((String::from_utf8_lossy(&key).into_owned(), total));
    }

    Ok(results)
}

fn parse_total(key: &Bytes, out: &Bytes) -> anyhow::Result<u64> {
    std::str::from_utf8(out)
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            PipelineError::InvalidAggregateInput {
                key: String::from_utf8_lossy(key).into_owned(),
                value: String::from_utf8_lossy(out).into_owned(),
            }
            .into()
        })
}

fn is_decode_error(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::RecordDecode { .. })
    )
}
