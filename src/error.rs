//! Error types for the orchestration core
//!
//! Two families live here:
//!
//! - **Hard errors** (`ControllerError`, `ConfigError`) are returned to the caller.
//!   They only signal programmer misuse (an agent kind that was never registered,
//!   a task id that does not exist) or an invalid startup configuration.
//! - **Task failures** (`TaskFailure`) never cross the Controller boundary as errors.
//!   They are stored on the terminal Task, so a denied task and a failed task are
//!   reported the same way: a terminal status plus a reason string.
//!
//! `BackendError` and `EffectError` are internal to agent execution. Backend errors
//! are always recovered by the rule fallback; effect errors become
//! `TaskFailure::EffectFailed`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::TaskId;

/// Errors surfaced synchronously by the Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// No descriptor is registered for the requested agent kind
    #[error("invalid agent kind: {0}")]
    InvalidAgentKind(String),

    /// The task id was never issued or has already been evicted
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// The controller no longer accepts work
    #[error("controller is shutting down")]
    ShuttingDown,
}

/// Why a task ended in `denied` or `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    /// Declared-intent check (or lockdown) refused the task at submission
    #[error("submission denied: {reason}")]
    SubmissionDenied { reason: String },

    /// The concrete action chosen by the agent was refused before any effect
    #[error("action denied: {reason}")]
    ActionDenied { reason: String },

    /// Neither the inference backend nor the rule table produced an action
    #[error("no applicable action for request")]
    NoApplicableAction,

    /// The overall task deadline elapsed
    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The effect was attempted but did not complete
    #[error("effect failed: {reason}")]
    EffectFailed { reason: String },
}

impl TaskFailure {
    /// Human-readable reason, identical in shape for denials and failures
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// True for the two permission-driven outcomes
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            TaskFailure::SubmissionDenied { .. } | TaskFailure::ActionDenied { .. }
        )
    }
}

/// Inference backend failures. Always recovered locally.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend call timed out after {0}ms")]
    Timeout(u64),

    #[error("backend returned malformed output: {0}")]
    Malformed(String),

    #[error("backend call rate limited")]
    RateLimited,
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout(0)
        } else {
            BackendError::Unavailable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Malformed(e.to_string())
    }
}

/// Failures applying a concrete action.
#[derive(Debug, Error)]
pub enum EffectError {
    #[error("failed to spawn effect: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("effect exceeded its deadline")]
    DeadlineExceeded,

    #[error("effect task aborted: {0}")]
    Aborted(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
