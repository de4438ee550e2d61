//! Permission enforcement for agent actions
//!
//! # Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 1: CAPABILITIES                                          │
//! │  Which classes of action an agent may take at all               │
//! │  (system_commands, file_write, network, process_control)        │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 2: PATHS + DANGEROUS-ACTION RULES                        │
//! │  Forbidden path prefixes per agent, then a fixed ordered rule   │
//! │  list; only the elevated agent may pass a rule match            │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 3: EMERGENCY STOP                                        │
//! │  Process-wide latch: denies everything and parks dispatch       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Backend calls are additionally throttled per agent by a token bucket.

pub mod capabilities;
pub mod lockdown;
pub mod patterns;
pub mod permissions;
pub mod rate_limit;

pub use capabilities::{Capability, CapabilitySet, UnknownCapability};
pub use lockdown::Lockdown;
pub use patterns::classify;
pub use permissions::{
    CheckPhase, PermissionDecision, PermissionRegistry, PermissionRequest, RiskLevel,
    SecuritySummary, SYSTEM_LOCKED,
};
pub use rate_limit::RateLimiter;
