//! In-memory task table with retention
//!
//! Sharded (`DashMap`), so workers of different agents updating their own
//! tasks never contend on one lock. Every status change goes through
//! `Task::transition`, which refuses anything non-monotonic.
//!
//! Retention: a terminal task stays pollable for `retention` after it
//! finished, and at most `max_retained` terminal tasks are kept (oldest
//! evicted first). Non-terminal tasks are never evicted.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::task::{CancelOutcome, CancellationState, Task, TaskId, TaskPayload, TaskPhase, TaskStatus};
use crate::agent::{AgentKind, Outcome};
use crate::error::{ControllerError, TaskFailure};
use crate::metrics::TASKS_FINISHED;
use crate::security::Capability;

struct Entry {
    task: Task,
    cancel: CancellationToken,
    finished_at: Option<Instant>,
}

impl Entry {
    fn mark_finished(&mut self) {
        self.finished_at = Some(Instant::now());
        TASKS_FINISHED
            .with_label_values(&[self.task.agent_kind.as_str(), self.task.status.as_str()])
            .inc();
    }
}

/// What a worker needs once it owns a task
#[derive(Debug, Clone)]
pub struct StartedTask {
    pub id: TaskId,
    pub agent: AgentKind,
    pub payload: TaskPayload,
    pub declared: Capability,
    pub cancel: CancellationToken,
}

pub struct TaskStore {
    tasks: DashMap<TaskId, Entry>,
    retention: Duration,
    max_retained: usize,
}

impl TaskStore {
    pub fn new(retention: Duration, max_retained: usize) -> Self {
        Self {
            tasks: DashMap::new(),
            retention,
            max_retained,
        }
    }

    /// Register a new task, pending or already terminal (denied at submission)
    pub fn insert(&self, task: Task) {
        let mut entry = Entry {
            cancel: CancellationToken::new(),
            finished_at: None,
            task,
        };
        if entry.task.status.is_terminal() {
            entry.mark_finished();
        }
        self.tasks.insert(entry.task.id, entry);
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).map(|e| e.task.clone())
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// `pending → running`. `None` when the task is gone or no longer pending.
    pub fn start(&self, id: TaskId) -> Option<StartedTask> {
        let mut entry = self.tasks.get_mut(&id)?;
        if !entry.task.transition(TaskStatus::Running) {
            return None;
        }
        Some(StartedTask {
            id,
            agent: entry.task.agent_kind,
            payload: entry.task.payload.clone(),
            declared: entry.task.declared_capability,
            cancel: entry.cancel.clone(),
        })
    }

    pub fn set_phase(&self, id: TaskId, phase: TaskPhase) {
        if let Some(mut entry) = self.tasks.get_mut(&id) {
            if entry.task.status == TaskStatus::Running {
                entry.task.phase = phase;
            }
        }
    }

    /// `running → terminal` from an execution outcome
    pub fn finish(&self, id: TaskId, outcome: Outcome) -> Option<TaskStatus> {
        let mut entry = self.tasks.get_mut(&id)?;

        let (status, result, error) = match outcome {
            Outcome::Succeeded(output) => (TaskStatus::Succeeded, Some(output), None),
            Outcome::Failed(failure) => (TaskStatus::Failed, None, Some(failure)),
            Outcome::Cancelled => (TaskStatus::Cancelled, None, None),
        };
        if !entry.task.transition(status) {
            return None;
        }
        entry.task.result = result;
        entry.task.error = error;

        if entry.task.cancellation == Some(CancellationState::Requested) {
            entry.task.cancellation = Some(if status == TaskStatus::Cancelled {
                CancellationState::Honored
            } else {
                CancellationState::TooLate
            });
        }
        entry.mark_finished();
        Some(status)
    }

    /// Timeout shortcut for workers
    pub fn fail(&self, id: TaskId, failure: TaskFailure) -> Option<TaskStatus> {
        self.finish(id, Outcome::Failed(failure))
    }

    pub fn cancel(&self, id: TaskId) -> Result<CancelOutcome, ControllerError> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or(ControllerError::UnknownTask(id))?;

        match entry.task.status {
            TaskStatus::Pending => {
                entry.task.transition(TaskStatus::Cancelled);
                entry.task.cancellation = Some(CancellationState::Honored);
                entry.mark_finished();
                Ok(CancelOutcome::Cancelled)
            }
            TaskStatus::Running => {
                entry.task.cancellation = Some(CancellationState::Requested);
                entry.cancel.cancel();
                Ok(CancelOutcome::Requested)
            }
            _ => Ok(CancelOutcome::AlreadyTerminal),
        }
    }

    /// Cancel every pending task (shutdown). Returns how many were cancelled.
    pub fn cancel_pending(&self) -> usize {
        let mut cancelled = 0;
        for mut entry in self.tasks.iter_mut() {
            if entry.task.status == TaskStatus::Pending && entry.task.transition(TaskStatus::Cancelled) {
                entry.task.cancellation = Some(CancellationState::Honored);
                entry.mark_finished();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Evict a terminal task now. `Ok(false)` when it is still in flight.
    pub fn acknowledge(&self, id: TaskId) -> Result<bool, ControllerError> {
        if !self.tasks.contains_key(&id) {
            return Err(ControllerError::UnknownTask(id));
        }
        Ok(self
            .tasks
            .remove_if(&id, |_, entry| entry.task.status.is_terminal())
            .is_some())
    }

    /// Apply the retention policy as of `now`. Returns the number evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut finished: Vec<(Instant, TaskId)> = self
            .tasks
            .iter()
            .filter_map(|e| e.finished_at.map(|at| (at, e.task.id)))
            .collect();
        finished.sort_unstable();

        let expired = finished
            .iter()
            .take_while(|(at, _)| now.saturating_duration_since(*at) >= self.retention)
            .count();
        let excess = finished.len().saturating_sub(self.max_retained);
        let evict = expired.max(excess);

        finished[..evict]
            .iter()
            .filter(|(_, id)| self.tasks.remove_if(id, |_, e| e.task.status.is_terminal()).is_some())
            .count()
    }

    pub fn counts(&self) -> BTreeMap<TaskStatus, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.tasks.iter() {
            *counts.entry(entry.task.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
