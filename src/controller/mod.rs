//! Controller: task intake, permission gating, per-agent worker lanes
//!
//! - `task` - Task model and lifecycle
//! - `store` - In-memory task table with retention
//! - `lane` - Bounded per-agent worker pools
//! - `dispatch` - The `Controller` facade and its builder

pub mod dispatch;
mod lane;
pub mod store;
pub mod task;

pub use dispatch::{AgentSnapshot, BackendStatus, Controller, ControllerBuilder, ControllerSnapshot};
pub use store::{StartedTask, TaskStore};
pub use task::{CancelOutcome, CancellationState, Task, TaskId, TaskPayload, TaskPhase, TaskStatus};
