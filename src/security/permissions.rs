//! Permission Registry
//!
//! Decides whether an agent may perform an action and records every decision.
//!
//! ```text
//!  check(request)
//!     │
//!     ├─ empty / control chars / oversized text ──► DENY (fail-closed)
//!     ├─ emergency stop engaged ──────────────────► DENY "system_locked"
//!     ├─ unknown agent ───────────────────────────► DENY
//!     ├─ requested or required capability missing ► DENY "missing capability …"
//!     ├─ path that cannot be placed ──────────────► DENY "unresolvable path …"
//!     ├─ path under a forbidden prefix ───────────► DENY "forbidden path …"
//!     ├─ path outside the allowed prefixes ───────► DENY "path … outside allowed paths"
//!     ├─ dangerous rule matches, not elevated ────► DENY "dangerous action …"
//!     ├─ agent's own banned phrase matches ───────► DENY "dangerous action …"
//!     └─ otherwise ───────────────────────────────► ALLOW (elevated rule recorded)
//!
//!  every path ──► exactly one audit record + one `overseer::audit` event
//! ```
//!
//! The registry is consulted twice per task: once with the declared intent at
//! submission and once with the concrete action right before any effect.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capabilities::{Capability, CapabilitySet};
use super::lockdown::Lockdown;
use super::patterns::{self, ActionPath, CommandRule, DANGER_RULES};
use crate::agent::{AgentDescriptor, AgentKind};
use crate::controller::TaskId;
use crate::journal::Journal;
use crate::metrics::PERMISSION_DECISIONS;
use crate::telemetry::AUDIT_TARGET;

/// Reason string used for every denial caused by the emergency stop
pub const SYSTEM_LOCKED: &str = "system_locked";

/// Longest action text accepted; longer input is treated as malformed
const MAX_ACTION_LEN: usize = 4096;

/// Longest action excerpt kept in an audit record
const AUDIT_EXCERPT_LEN: usize = 256;

/// Writable by every agent whatever its allowed paths
const ALWAYS_ALLOWED: &[&str] = &["/dev/null"];

/// Which of the two checks produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPhase {
    /// Declared intent, at submission
    Declared,
    /// Concrete action, before the effect is applied
    Concrete,
    /// Standalone check requested by an operator, outside any task
    Operator,
}

impl CheckPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckPhase::Declared => "declared",
            CheckPhase::Concrete => "concrete",
            CheckPhase::Operator => "operator",
        }
    }
}

/// Input to one permission check
#[derive(Debug, Clone, Copy)]
pub struct PermissionRequest<'a> {
    pub task_id: Option<TaskId>,
    pub agent: AgentKind,
    pub capability: Capability,
    pub action_text: &'a str,
    /// Working directory relative paths in the action resolve against
    pub cwd: Option<&'a str>,
    pub phase: CheckPhase,
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub task_id: Option<TaskId>,
    pub agent_name: String,
    pub requested_capability: Capability,
    pub allowed: bool,
    pub reason: String,
    /// Dangerous rule that matched, allowed or not
    pub matched_rule: Option<String>,
    pub phase: CheckPhase,
    /// Leading excerpt of the checked action text
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// Coarse safety indicator attached to task results
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only
    Low,
    /// Writes files or talks to the network
    Medium,
    /// Touches the system or other processes
    High,
    /// Matches a dangerous-action rule
    Critical,
}

#[derive(Debug, Clone)]
struct Grant {
    capabilities: CapabilitySet,
    forbidden_paths: Vec<String>,
    /// Empty means unrestricted
    allowed_paths: Vec<String>,
    banned: Vec<CommandRule>,
}

impl Grant {
    fn from_descriptor(descriptor: &AgentDescriptor) -> Self {
        let banned = descriptor
            .dangerous_commands
            .iter()
            .filter_map(|phrase| match CommandRule::new(phrase) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!(agent = %descriptor.kind, phrase = %phrase, error = %e, "skipping banned phrase");
                    None
                }
            })
            .collect();

        Self {
            capabilities: descriptor.capabilities,
            forbidden_paths: descriptor.forbidden_paths.clone(),
            allowed_paths: descriptor
                .allowed_paths
                .iter()
                .flat_map(|prefix| with_home_expanded(prefix))
                .collect(),
            banned,
        }
    }

    fn path_verdict(&self, path: &ActionPath) -> Option<Verdict> {
        let path = match path {
            ActionPath::Unresolved(token) => {
                return Some(Verdict::deny(format!("unresolvable path {}", token), None))
            }
            ActionPath::Resolved(path) => path,
        };

        if let Some(prefix) = self
            .forbidden_paths
            .iter()
            .find(|prefix| patterns::is_under(path, prefix))
        {
            return Some(Verdict::deny(
                format!("forbidden path {} (under {})", path, prefix),
                None,
            ));
        }

        let allowed = self.allowed_paths.is_empty()
            || ALWAYS_ALLOWED.contains(&path.as_str())
            || self
                .allowed_paths
                .iter()
                .any(|prefix| patterns::is_under(path, prefix));
        if !allowed {
            return Some(Verdict::deny(
                format!("path {} outside allowed paths", path),
                None,
            ));
        }
        None
    }
}

/// `~/x` also as `$HOME/x`, so absolute home paths match
fn with_home_expanded(prefix: &str) -> Vec<String> {
    let mut prefixes = vec![prefix.to_string()];
    let home = std::env::var("HOME").ok();
    let home = home.as_deref().map(|h| h.trim_end_matches('/')).filter(|h| !h.is_empty());
    if let (Some(rest), Some(home)) = (prefix.strip_prefix('~'), home) {
        if rest.is_empty() || rest.starts_with('/') {
            prefixes.push(format!("{}{}", home, rest));
        }
    }
    prefixes
}

/// Per-agent view in the security summary
#[derive(Debug, Clone, Serialize)]
pub struct AgentPermissionView {
    pub capabilities: Vec<Capability>,
    pub elevated: bool,
    pub forbidden_paths: Vec<String>,
    pub allowed_paths: Vec<String>,
    pub dangerous_commands: Vec<String>,
}

/// Aggregate security state for reporting
#[derive(Debug, Clone, Serialize)]
pub struct SecuritySummary {
    pub decisions_allowed: u64,
    pub decisions_denied: u64,
    pub audit_retained: usize,
    pub audit_truncated: u64,
    pub dangerous_rules: usize,
    pub lockdown_engaged: bool,
    pub agents: BTreeMap<String, AgentPermissionView>,
}

struct Verdict {
    allowed: bool,
    reason: String,
    matched_rule: Option<String>,
}

impl Verdict {
    fn allow(reason: impl Into<String>, matched_rule: Option<&str>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            matched_rule: matched_rule.map(str::to_string),
        }
    }

    fn deny(reason: impl Into<String>, matched_rule: Option<&str>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            matched_rule: matched_rule.map(str::to_string),
        }
    }
}

/// Static-at-runtime permission table plus the audit trail
pub struct PermissionRegistry {
    grants: HashMap<AgentKind, Grant>,
    lockdown: Arc<Lockdown>,
    audit: Journal<PermissionDecision>,
    allowed_total: AtomicU64,
    denied_total: AtomicU64,
}

impl PermissionRegistry {
    pub fn new(descriptors: &[AgentDescriptor], lockdown: Arc<Lockdown>, audit_capacity: usize) -> Self {
        let grants = descriptors
            .iter()
            .map(|d| (d.kind, Grant::from_descriptor(d)))
            .collect();

        Self {
            grants,
            lockdown,
            audit: Journal::new(audit_capacity),
            allowed_total: AtomicU64::new(0),
            denied_total: AtomicU64::new(0),
        }
    }

    /// Decide and record. Never fails: a denial is a normal result.
    pub fn check(&self, request: PermissionRequest<'_>) -> PermissionDecision {
        let verdict = self.evaluate(&request);

        let decision = PermissionDecision {
            task_id: request.task_id,
            agent_name: request.agent.as_str().to_string(),
            requested_capability: request.capability,
            allowed: verdict.allowed,
            reason: verdict.reason,
            matched_rule: verdict.matched_rule,
            phase: request.phase,
            action: excerpt(request.action_text),
            timestamp: Utc::now(),
        };

        self.record(&decision);
        decision
    }

    fn evaluate(&self, request: &PermissionRequest<'_>) -> Verdict {
        let text = request.action_text;

        if text.trim().is_empty() {
            return Verdict::deny("empty action text", None);
        }
        if text.len() > MAX_ACTION_LEN {
            return Verdict::deny("malformed action text: too long", None);
        }
        if text.chars().any(|c| c.is_control() && c != '\t') {
            return Verdict::deny("malformed action text: control characters", None);
        }

        // Read once; the rest of the decision uses this value.
        if self.lockdown.is_engaged() {
            return Verdict::deny(SYSTEM_LOCKED, None);
        }

        let grant = match self.grants.get(&request.agent) {
            Some(grant) => grant,
            None => return Verdict::deny(format!("unknown agent {}", request.agent), None),
        };

        if !grant.capabilities.contains(request.capability) {
            return Verdict::deny(format!("missing capability {}", request.capability), None);
        }
        // Every segment of a compound action needs its own grant
        if let Some(missing) = patterns::required_capabilities(text).first_missing(&grant.capabilities) {
            return Verdict::deny(format!("missing capability {}", missing), None);
        }

        for path in patterns::extract_paths(text, request.cwd) {
            if let Some(verdict) = grant.path_verdict(&path) {
                return verdict;
            }
        }

        let lowered = text.to_lowercase();
        let overridden = match patterns::first_dangerous_match(&lowered) {
            Some(rule) if grant.capabilities.is_elevated() => Some(rule.name),
            Some(rule) => {
                return Verdict::deny(
                    format!("dangerous action: matched rule {}", rule.name),
                    Some(rule.name),
                )
            }
            None => None,
        };

        // The elevated override does not reach an agent's own bans
        if let Some(banned) = grant.banned.iter().find(|rule| rule.is_match(&lowered)) {
            return Verdict::deny(
                format!(
                    "dangerous action: matched {} rule {}",
                    request.agent, banned.phrase
                ),
                Some(banned.phrase.as_str()),
            );
        }

        match overridden {
            Some(name) => Verdict::allow(
                format!("allowed with elevated override for dangerous rule {}", name),
                Some(name),
            ),
            None => Verdict::allow("allowed", None),
        }
    }

    fn record(&self, decision: &PermissionDecision) {
        let outcome = if decision.allowed { "allowed" } else { "denied" };
        PERMISSION_DECISIONS
            .with_label_values(&[&decision.agent_name, decision.phase.as_str(), outcome])
            .inc();

        let task_id = decision
            .task_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());

        if decision.allowed {
            self.allowed_total.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                target: AUDIT_TARGET,
                task_id = %task_id,
                agent = %decision.agent_name,
                capability = %decision.requested_capability,
                phase = decision.phase.as_str(),
                rule = decision.matched_rule.as_deref().unwrap_or("-"),
                reason = %decision.reason,
                "permission allowed"
            );
        } else {
            self.denied_total.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: AUDIT_TARGET,
                task_id = %task_id,
                agent = %decision.agent_name,
                capability = %decision.requested_capability,
                phase = decision.phase.as_str(),
                rule = decision.matched_rule.as_deref().unwrap_or("-"),
                reason = %decision.reason,
                "permission denied"
            );
        }

        self.audit.append(decision.clone());
    }

    /// Risk of an action text, independent of which agent runs it
    pub fn assess(action_text: &str) -> RiskLevel {
        let lowered = action_text.to_lowercase();
        if lowered.trim().is_empty() || patterns::first_dangerous_match(&lowered).is_some() {
            return RiskLevel::Critical;
        }
        match patterns::classify(action_text) {
            Some(Capability::SystemCommands) | Some(Capability::ProcessControl) => RiskLevel::High,
            Some(Capability::FileWrite) | Some(Capability::Network) => RiskLevel::Medium,
            None => RiskLevel::Low,
        }
    }

    /// Every retained decision, oldest first
    pub fn audit_trail(&self) -> Vec<PermissionDecision> {
        self.audit.snapshot()
    }

    /// Retained decisions for one task
    pub fn decisions_for(&self, task_id: TaskId) -> Vec<PermissionDecision> {
        self.audit.filter(|d| d.task_id == Some(task_id))
    }

    pub fn lockdown(&self) -> &Arc<Lockdown> {
        &self.lockdown
    }

    pub fn capabilities_of(&self, agent: AgentKind) -> Option<CapabilitySet> {
        self.grants.get(&agent).map(|g| g.capabilities)
    }

    pub fn summary(&self) -> SecuritySummary {
        let agents = self
            .grants
            .iter()
            .map(|(kind, grant)| {
                (
                    kind.as_str().to_string(),
                    AgentPermissionView {
                        capabilities: grant.capabilities.to_vec(),
                        elevated: grant.capabilities.is_elevated(),
                        forbidden_paths: grant.forbidden_paths.clone(),
                        allowed_paths: grant.allowed_paths.clone(),
                        dangerous_commands: grant.banned.iter().map(|r| r.phrase.clone()).collect(),
                    },
                )
            })
            .collect();

        SecuritySummary {
            decisions_allowed: self.allowed_total.load(Ordering::Relaxed),
            decisions_denied: self.denied_total.load(Ordering::Relaxed),
            audit_retained: self.audit.snapshot().len(),
            audit_truncated: self.audit.truncated(),
            dangerous_rules: DANGER_RULES.len(),
            lockdown_engaged: self.lockdown.is_engaged(),
            agents,
        }
    }
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(AUDIT_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
