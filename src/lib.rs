//! Overseer - multi-agent task orchestration with permission gating
//!
//! A single controller accepts task requests, checks them against each
//! agent's capability scope, and runs them on bounded per-agent worker pools.
//! Agents interpret requests with a local inference backend sized to the
//! host's hardware tier, or with deterministic rules when no backend is
//! usable. Every action is checked twice: declared intent at submission and
//! the concrete command right before any effect.
//!
//! # Modules
//!
//! - `controller` - Task intake, lifecycle, worker lanes, emergency stop
//! - `security` - Capabilities, dangerous-action rules, audit trail
//! - `agent` - Agent kinds, rule tables, execution contract, health
//! - `hardware` - Host profiling, tiering, backend selection
//! - `inference` - Inference backend seam and the Ollama client
//! - `config` - TOML configuration
//! - `metrics` - Prometheus metrics for observability
//! - `telemetry` - Tracing subscriber and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use overseer::{AgentKind, Controller, OverseerConfig, TaskPayload};
//!
//! let controller = Controller::builder(OverseerConfig::default()).build()?;
//! let id = controller.submit(AgentKind::ShellAssistant, TaskPayload::new("list files"))?;
//! let task = controller.wait(id, std::time::Duration::from_secs(30)).await?;
//! ```

pub mod agent;
pub mod config;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod inference;
pub mod journal;
pub mod metrics;
pub mod security;
pub mod telemetry;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentDescriptor, AgentHealth, AgentKind, Provenance, TaskOutput};
pub use config::OverseerConfig;
pub use controller::{CancelOutcome, Controller, Task, TaskId, TaskPayload, TaskStatus};
pub use error::{ControllerError, TaskFailure};
pub use hardware::{HardwareProfile, Tier};
pub use security::{Capability, PermissionDecision, PermissionRegistry};
