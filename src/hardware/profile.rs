//! Tiering and backend selection
//!
//! ```text
//!   memory_gb:   0 ──── 4 ──── 8 ─────────── 32 ────────►
//!   base tier:   fallback │ low │   medium    │   high
//!
//!   accelerator present  → +1 level (fallback is never promoted)
//!   fewer than 2 cores   → -1 level
//! ```
//!
//! Thresholds are fixed policy. The same three inputs always produce the same
//! tier, and any missing input produces `Fallback`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::probe::HardwareProbe;
use crate::agent::{AgentDescriptor, AgentKind};

const LOW_FLOOR_GB: f64 = 4.0;
const MEDIUM_FLOOR_GB: f64 = 8.0;
const HIGH_FLOOR_GB: f64 = 32.0;
const MIN_CORES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Rule-based only, no inference backend
    Fallback,
    Low,
    Medium,
    High,
}

impl Tier {
    pub fn rank(&self) -> u8 {
        match self {
            Tier::Fallback => 0,
            Tier::Low => 1,
            Tier::Medium => 2,
            Tier::High => 3,
        }
    }

    fn promote(self) -> Tier {
        match self {
            Tier::Fallback => Tier::Fallback,
            Tier::Low => Tier::Medium,
            Tier::Medium | Tier::High => Tier::High,
        }
    }

    fn demote(self) -> Tier {
        match self {
            Tier::Fallback | Tier::Low => Tier::Fallback,
            Tier::Medium => Tier::Low,
            Tier::High => Tier::Medium,
        }
    }

    /// Context window for models run at this tier
    pub fn context_length(&self) -> u32 {
        match self {
            Tier::High => 8192,
            Tier::Medium => 4096,
            Tier::Low => 2048,
            Tier::Fallback => 512,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Fallback => "fallback",
            Tier::Low => "low",
            Tier::Medium => "medium",
            Tier::High => "high",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hardware facts plus the derived tier. Read-only after startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub memory_gb: f64,
    pub cpu_cores: usize,
    pub accelerator_present: bool,
    pub tier: Tier,
}

impl HardwareProfile {
    /// Profile for explicitly known hardware
    pub fn from_parts(memory_gb: f64, cpu_cores: usize, accelerator_present: bool) -> Self {
        Self {
            memory_gb,
            cpu_cores,
            accelerator_present,
            tier: classify_tier(memory_gb, cpu_cores, accelerator_present),
        }
    }

    /// Most conservative profile, used when nothing is known
    pub fn fallback() -> Self {
        Self {
            memory_gb: 0.0,
            cpu_cores: 0,
            accelerator_present: false,
            tier: Tier::Fallback,
        }
    }
}

/// Pure tier function over the three measured quantities
pub fn classify_tier(memory_gb: f64, cpu_cores: usize, accelerator_present: bool) -> Tier {
    if memory_gb.is_nan() || memory_gb < LOW_FLOOR_GB {
        return Tier::Fallback;
    }

    let mut tier = if memory_gb >= HIGH_FLOOR_GB {
        Tier::High
    } else if memory_gb >= MEDIUM_FLOOR_GB {
        Tier::Medium
    } else {
        Tier::Low
    };

    if accelerator_present {
        tier = tier.promote();
    }
    if cpu_cores < MIN_CORES {
        tier = tier.demote();
    }
    tier
}

/// Measure the host once and classify it.
///
/// Never fails: a probe that cannot read any quantity yields `Tier::Fallback`.
pub fn profile(probe: &dyn HardwareProbe) -> HardwareProfile {
    let m = probe.measure();

    let profile = match (m.memory_gb, m.cpu_cores, m.accelerator_present) {
        (Some(memory_gb), Some(cpu_cores), Some(accelerator_present)) => {
            HardwareProfile::from_parts(memory_gb, cpu_cores, accelerator_present)
        }
        _ => {
            tracing::warn!(
                memory_gb = ?m.memory_gb,
                cpu_cores = ?m.cpu_cores,
                accelerator = ?m.accelerator_present,
                "incomplete hardware measurement, assuming fallback tier"
            );
            HardwareProfile {
                memory_gb: m.memory_gb.unwrap_or(0.0),
                cpu_cores: m.cpu_cores.unwrap_or(0),
                accelerator_present: m.accelerator_present.unwrap_or(false),
                tier: Tier::Fallback,
            }
        }
    };

    tracing::info!(
        memory_gb = profile.memory_gb,
        cpu_cores = profile.cpu_cores,
        accelerator = profile.accelerator_present,
        tier = %profile.tier,
        "hardware profiled"
    );
    profile
}

/// Model chosen for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendAssignment {
    pub model: String,
    /// Tier the model was picked for, after the agent's priority adjustment
    pub tier: Tier,
    pub context_length: u32,
    pub temperature: f32,
}

/// Per-agent model preference by tier: [high, medium, low]. `None` = rules only.
fn preferences(kind: AgentKind) -> [Option<&'static str>; 3] {
    match kind {
        AgentKind::System => [None, None, None],
        AgentKind::FileManagement => [Some("codellama:7b"), Some("phi3:3.8b"), None],
        AgentKind::SoftwareInstall => [Some("llama3"), Some("phi3:3.8b"), None],
        AgentKind::ShellAssistant | AgentKind::Troubleshooting => {
            [Some("mistral:7b"), Some("phi3:3.8b"), Some("tinyllama:1.1b")]
        }
        AgentKind::ActivityTracker => [Some("phi3:3.8b"), Some("tinyllama:1.1b"), None],
    }
}

fn temperature(kind: AgentKind) -> f32 {
    match kind {
        AgentKind::System | AgentKind::ActivityTracker => 0.1,
        AgentKind::SoftwareInstall | AgentKind::Troubleshooting => 0.2,
        AgentKind::ShellAssistant => 0.3,
        AgentKind::FileManagement => 0.4,
    }
}

/// Install decisions get a stronger model, activity summaries a weaker one
fn adjusted_tier(kind: AgentKind, tier: Tier) -> Tier {
    if tier == Tier::Fallback {
        return Tier::Fallback;
    }
    match kind {
        AgentKind::SoftwareInstall => tier.promote(),
        AgentKind::ActivityTracker => tier.demote(),
        _ => tier,
    }
}

/// Deterministic tier × agent lookup
pub fn backend_for(kind: AgentKind, tier: Tier) -> Option<BackendAssignment> {
    let tier = adjusted_tier(kind, tier);
    let [high, medium, low] = preferences(kind);
    let model = match tier {
        Tier::High => high,
        Tier::Medium => medium,
        Tier::Low => low,
        Tier::Fallback => None,
    }?;

    Some(BackendAssignment {
        model: model.to_string(),
        tier,
        context_length: tier.context_length(),
        temperature: temperature(kind),
    })
}

/// Backend for a registered agent at the host's tier
pub fn select_backend(descriptor: &AgentDescriptor, tier: Tier) -> Option<BackendAssignment> {
    backend_for(descriptor.kind, tier)
}

/// Models worth pre-pulling for a tier
pub fn recommended_models(tier: Tier) -> &'static [&'static str] {
    match tier {
        Tier::High => &["llama3", "codellama:7b", "mistral:7b"],
        Tier::Medium => &["phi3:3.8b", "llama3:8b", "gemma:2b"],
        Tier::Low => &["phi3:1.4b", "tinyllama:1.1b", "qwen2:0.5b"],
        Tier::Fallback => &[],
    }
}
