//! Task model and its lifecycle rules
//!
//! ```text
//!            ┌──────────► denied      (declared check refused)
//!            │
//!   pending ─┼──────────► cancelled   (cancel before pickup)
//!            │
//!            └─► running ─┬─► succeeded
//!                         ├─► failed
//!                         └─► cancelled (honored at a checkpoint)
//! ```
//!
//! Transitions are monotonic; nothing leaves a terminal state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{AgentKind, Provenance, TaskOutput};
use crate::error::TaskFailure;
use crate::security::Capability;

/// Time-sortable task identifier (UUID v7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(TaskId)
    }
}

/// What the caller asked for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Free-form request text
    pub request: String,
    /// Declared capability; inferred from the request when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
    /// Optional structured context (`cwd`, `path`, `package`, ...)
    #[serde(default)]
    pub context: serde_json::Value,
}

impl TaskPayload {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            capability: None,
            context: serde_json::Value::Null,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// String value from the context object
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Denied,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Denied | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Denied)
                | (Pending, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Denied => "denied",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent-facing progress within `running`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Accepted,
    Interpreting,
    CheckingPermission,
    Executing,
    Finished,
}

/// Outcome of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationState {
    /// Flag set on a running task, not yet observed
    Requested,
    /// The task stopped at a checkpoint (or never started)
    Honored,
    /// The task finished before reaching a checkpoint
    TooLate,
}

/// Returned by `Controller::cancel`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Was pending; now cancelled
    Cancelled,
    /// Was running; the agent will stop at its next checkpoint if it reaches one
    Requested,
    /// Already terminal; nothing changed
    AlreadyTerminal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub agent_kind: AgentKind,
    pub payload: TaskPayload,
    /// Capability checked at submission
    pub declared_capability: Capability,
    pub status: TaskStatus,
    pub phase: TaskPhase,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskOutput>,
    pub error: Option<TaskFailure>,
    pub cancellation: Option<CancellationState>,
    /// How the agent was picked, for requests submitted without one
    pub routing: Option<Provenance>,
}

impl Task {
    pub fn new(id: TaskId, agent_kind: AgentKind, payload: TaskPayload, declared: Capability) -> Self {
        Self {
            id,
            agent_kind,
            payload,
            declared_capability: declared,
            status: TaskStatus::Pending,
            phase: TaskPhase::Accepted,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            cancellation: None,
            routing: None,
        }
    }

    /// Apply a status change if it is a legal transition
    pub(crate) fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => {
                self.completed_at = Some(Utc::now());
                self.phase = TaskPhase::Finished;
            }
            _ => {}
        }
        true
    }

    /// Reason string for denied and failed tasks alike
    pub fn reason(&self) -> Option<String> {
        self.error.as_ref().map(TaskFailure::reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(
            TaskId::new(),
            AgentKind::ShellAssistant,
            TaskPayload::new("list files"),
            Capability::SystemCommands,
        )
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let mut t = task();
        assert!(t.transition(TaskStatus::Running));
        assert!(t.started_at.is_some());
        assert!(!t.transition(TaskStatus::Pending));
        assert!(!t.transition(TaskStatus::Denied));
        assert!(t.transition(TaskStatus::Succeeded));
        assert!(t.completed_at.is_some());
        assert_eq!(t.phase, TaskPhase::Finished);

        for next in [TaskStatus::Running, TaskStatus::Failed, TaskStatus::Cancelled] {
            assert!(!t.transition(next));
        }
    }

    #[test]
    fn test_pending_can_be_denied_or_cancelled() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Denied));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Succeeded));
    }

    #[test]
    fn test_task_ids_are_time_ordered() {
        let a = TaskId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = TaskId::new();
        assert!(a < b);
        assert_eq!(a.to_string().parse::<TaskId>().unwrap(), a);
    }

    #[test]
    fn test_payload_context_lookup() {
        let p = TaskPayload::new("cleanup").with_context(serde_json::json!({ "path": "/tmp/x" }));
        assert_eq!(p.context_str("path"), Some("/tmp/x"));
        assert_eq!(p.context_str("cwd"), None);
    }
}
