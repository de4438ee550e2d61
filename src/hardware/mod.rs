//! Hardware Profiler
//!
//! Measures the host once at startup, classifies it into a performance tier
//! and maps each agent to an inference model for that tier.
//!
//! ```text
//! HardwareProbe::measure() ──► profile() ──► HardwareProfile { tier }
//!                                                   │
//!                       AgentDescriptor ──► select_backend(descriptor, tier)
//!                                                   │
//!                                                   ▼
//!                                   Option<BackendAssignment { model, ... }>
//! ```

pub mod probe;
pub mod profile;

pub use probe::{FixedProbe, HardwareMeasurement, HardwareProbe, SystemProbe};
pub use profile::{
    backend_for, classify_tier, profile, recommended_models, select_backend, BackendAssignment,
    HardwareProfile, Tier,
};
