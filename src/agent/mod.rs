//! Agents: one bounded domain of responsibility each
//!
//! Agents are a closed set of kinds sharing one execution contract. Adding an
//! agent means adding an `AgentKind` variant, a roster entry and a rule table;
//! the controller does not change.
//!
//! # Architecture
//!
//! ```text
//! Controller worker
//!        │ ExecutionContext (task id, payload, declared capability, deadline, cancel flag)
//!        ▼
//!   Agent::execute
//!        ├─ InferenceBackend::interpret   (optional, throttled, time-boxed)
//!        ├─ rules::resolve                (deterministic fallback)
//!        ├─ PermissionRegistry::check     (concrete action)
//!        ├─ EffectLog::append
//!        └─ Effector::apply               (detached, never interrupted)
//!        │
//!        ▼
//!   Outcome ─► HealthTracker
//! ```

pub mod descriptor;
pub mod effects;
pub mod executor;
pub mod health;
pub mod kind;
pub mod output;
pub mod rules;

pub use descriptor::AgentDescriptor;
pub use effects::{
    effector_for, DryRunEffector, EffectLog, EffectOutcome, EffectRecord, EffectRequest,
    Effector, ShellEffector,
};
pub use executor::{Agent, ExecutionContext, Outcome};
pub use health::{AgentHealth, HealthTracker};
pub use kind::AgentKind;
pub use output::{FallbackCause, Provenance, TaskOutput};
