//! Task identity and status bookkeeping.
//!
//! Tasks are created by the orchestrator when a phase begins and garbage
//! collected when the phase completes; only their statuses outlive the
//! phase, in the shared [`TaskTable`]. The table is the single piece of
//! shared mutable state in the engine — payloads and results always move
//! by value.

use std::sync::Arc;

use dashmap::DashMap;

pub type TaskId = u64;

/// Which stage of the pipeline a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Map,
    Reduce,
}

/// Lifecycle of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Submitted, waiting for a worker slot.
    Pending,

    /// Currently executing on a worker.
    Running,

    /// Resolved successfully.
    Done,

    /// Resolved with a failure (including exhausted retries and panics).
    Failed,
}

impl TaskStatus {
    /// Pending and Running tasks still hold up their phase's fan-in.
    pub fn is_resolved(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

/// One unit of dispatchable work: a payload bound for the pool, plus the
/// bookkeeping the orchestrator needs to retry it.
#[derive(Debug, Clone)]
pub struct Task<P> {
    pub id: TaskId,
    pub phase: Phase,

    /// How many times this task has been dispatched, including the
    /// in-flight attempt.
    pub attempt: u32,

    pub payload: P,
}

impl<P> Task<P> {
    pub fn new(id: TaskId, phase: Phase, payload: P) -> Self {
        Self {
            id,
            phase,
            attempt: 0,
            payload,
        }
    }
}

/// Concurrency-safe status table shared between the orchestrator, the
/// worker pool, and test instrumentation.
#[derive(Debug, Default, Clone)]
pub struct TaskTable {
    inner: Arc<DashMap<TaskId, (Phase, TaskStatus)>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly submitted task as Pending.
    pub fn register(&self, id: TaskId, phase: Phase) {
        self.inner.insert(id, (phase, TaskStatus::Pending));
    }

    /// Record a status transition. Unknown ids are ignored; the pool only
    /// transitions tasks it registered.
    pub fn transition(&self, id: TaskId, status: TaskStatus) {
        if let Some(mut entry) = self.inner.get_mut(&id) {
            entry.1 = status;
        }
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.inner.get(&id).map(|entry| entry.1)
    }

    /// Whether any task of the given phase is still Pending or Running.
    /// Used to assert the fan-in barrier between phases.
    pub fn any_unresolved(&self, phase: Phase) -> bool {
        self.inner
            .iter()
            .any(|entry| entry.0 == phase && !entry.1.is_resolved())
    }

    /// Number of tasks of the given phase with the given status.
    pub fn count(&self, phase: Phase, status: TaskStatus) -> usize {
        self.inner
            .iter()
            .filter(|entry| entry.0 == phase && entry.1 == status)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_visible() {
        let table = TaskTable::new();
        table.register(1, Phase::Map);
        assert_eq!(table.status(1), Some(TaskStatus::Pending));
        assert!(table.any_unresolved(Phase::Map));

        table.transition(1, TaskStatus::Running);
        assert!(table.any_unresolved(Phase::Map));

        table.transition(1, TaskStatus::Done);
        assert!(!table.any_unresolved(Phase::Map));
        assert_eq!(table.count(Phase::Map, TaskStatus::Done), 1);
    }

    #[test]
    fn phases_are_tracked_independently() {
        let table = TaskTable::new();
        table.register(1, Phase::Map);
        table.transition(1, TaskStatus::Done);
        table.register(2, Phase::Reduce);

        assert!(!table.any_unresolved(Phase::Map));
        assert!(table.any_unresolved(Phase::Reduce));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let table = TaskTable::new();
        table.transition(99, TaskStatus::Done);
        assert_eq!(table.status(99), None);
    }
}
