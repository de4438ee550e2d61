//! Task results
//!
//! A result looks the same whichever path chose the action; `provenance`
//! says which one did.

use serde::{Deserialize, Serialize};

use super::effects::EffectOutcome;
use crate::error::BackendError;
use crate::security::RiskLevel;

/// Why the rule table was used instead of the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackCause {
    /// No backend assigned for this agent and tier
    NoBackend,
    /// The per-agent token bucket was empty
    RateLimited,
    Timeout,
    Unavailable,
    /// The backend answered without a usable action
    Malformed,
}

impl FallbackCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackCause::NoBackend => "no_backend",
            FallbackCause::RateLimited => "rate_limited",
            FallbackCause::Timeout => "timeout",
            FallbackCause::Unavailable => "unavailable",
            FallbackCause::Malformed => "malformed",
        }
    }
}

impl From<&BackendError> for FallbackCause {
    fn from(e: &BackendError) -> Self {
        match e {
            BackendError::Unavailable(_) => FallbackCause::Unavailable,
            BackendError::Timeout(_) => FallbackCause::Timeout,
            BackendError::Malformed(_) => FallbackCause::Malformed,
            BackendError::RateLimited => FallbackCause::RateLimited,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    Inference { model: String },
    Fallback { cause: FallbackCause },
}

impl Provenance {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Provenance::Fallback { .. })
    }
}

/// Success value of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// The concrete action that passed the second permission check
    pub action: String,
    pub description: String,
    pub confidence: f32,
    pub risk: RiskLevel,
    pub provenance: Provenance,
    pub effect: EffectOutcome,
}
