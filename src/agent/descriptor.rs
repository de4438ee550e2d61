//! Agent descriptors: the immutable registration record for each agent kind

use std::time::Duration;

use serde::Serialize;

use super::kind::AgentKind;
use crate::config::OverseerConfig;
use crate::hardware::{select_backend, BackendAssignment, HardwareProfile};
use crate::security::{Capability, CapabilitySet};

/// Immutable after startup. One per enabled agent kind, owned by the Controller.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDescriptor {
    pub kind: AgentKind,
    pub name: String,
    pub capabilities: CapabilitySet,
    pub max_concurrent_tasks: usize,
    /// Path prefixes no action of this agent may touch, elevated or not
    pub forbidden_paths: Vec<String>,
    /// Path prefixes this agent's actions must stay under; empty means anywhere
    /// not forbidden. `~` is the invoking user's home.
    pub allowed_paths: Vec<String>,
    /// Phrases banned for this agent on top of the global dangerous rules
    pub dangerous_commands: Vec<String>,
    /// Longest a single task of this agent may run
    pub max_execution_secs: u64,
    /// Chosen by the Hardware Profiler; `None` means rules only
    pub assigned_backend: Option<BackendAssignment>,
}

/// Task deadline for agents without their own
pub const DEFAULT_EXECUTION_SECS: u64 = 300;

impl AgentDescriptor {
    /// Built-in permission table entry for `kind`, without a backend
    pub fn roster(kind: AgentKind) -> Self {
        use Capability::*;

        let (capabilities, max_concurrent_tasks, forbidden): (CapabilitySet, usize, &[&str]) =
            match kind {
                AgentKind::System => (
                    CapabilitySet::of(&[ProcessControl]),
                    2,
                    &["/etc", "/root", "/boot"],
                ),
                AgentKind::FileManagement => (
                    CapabilitySet::of(&[FileWrite]),
                    3,
                    &["/etc", "/root", "/boot", "/usr", "/var/log"],
                ),
                AgentKind::SoftwareInstall => {
                    (CapabilitySet::all().elevated(), 1, &["/proc", "/sys"])
                }
                AgentKind::ShellAssistant => (
                    CapabilitySet::of(&[SystemCommands, FileWrite]),
                    2,
                    &["/etc", "/root", "/boot"],
                ),
                AgentKind::ActivityTracker => (
                    CapabilitySet::of(&[FileWrite]),
                    1,
                    &["/etc", "/root", "/usr"],
                ),
                AgentKind::Troubleshooting => (
                    CapabilitySet::of(&[SystemCommands, ProcessControl]),
                    2,
                    &["/root", "/boot"],
                ),
            };

        let (allowed, dangerous): (&[&str], &[&str]) = match kind {
            AgentKind::System => (&["/proc", "/sys", "/var/log"], &["reboot", "shutdown", "kill -9"]),
            AgentKind::FileManagement => {
                (&["~", "/tmp", "/var/tmp"], &["rm -rf /", "chmod 777", "chown root"])
            }
            AgentKind::SoftwareInstall => (&[], &["format", "fdisk", "mkfs"]),
            AgentKind::ShellAssistant => (&["~", "/tmp"], &["rm -rf", "dd if=", "mkfs", "format"]),
            AgentKind::ActivityTracker => (&["~/.ai_logs", "/tmp"], &[]),
            AgentKind::Troubleshooting => (&[], &["kill -9", "rm -rf"]),
        };
        let max_execution_secs = match kind {
            AgentKind::SoftwareInstall => 1800,
            _ => DEFAULT_EXECUTION_SECS,
        };

        Self {
            kind,
            name: kind.as_str().to_string(),
            capabilities,
            max_concurrent_tasks,
            forbidden_paths: to_strings(forbidden),
            allowed_paths: to_strings(allowed),
            dangerous_commands: to_strings(dangerous),
            max_execution_secs,
            assigned_backend: None,
        }
    }

    /// Roster entry with config overrides applied and a backend picked for
    /// the host's tier. Inference disabled in config means no backend. The
    /// task deadline never exceeds the global `task_timeout_secs`.
    pub fn configure(kind: AgentKind, config: &OverseerConfig, hardware: &HardwareProfile) -> Self {
        let mut descriptor = Self::roster(kind);

        if let Some(settings) = config.agent_settings(kind) {
            if let Some(n) = settings.max_concurrent_tasks {
                descriptor.max_concurrent_tasks = n.max(1);
            }
            for path in &settings.forbidden_paths {
                if !descriptor.forbidden_paths.contains(path) {
                    descriptor.forbidden_paths.push(path.clone());
                }
            }
            if let Some(allowed) = &settings.allowed_paths {
                descriptor.allowed_paths = allowed.clone();
            }
            for phrase in &settings.dangerous_commands {
                if !descriptor.dangerous_commands.contains(phrase) {
                    descriptor.dangerous_commands.push(phrase.clone());
                }
            }
            if let Some(secs) = settings.max_execution_secs {
                descriptor.max_execution_secs = secs.max(1);
            }
        }
        descriptor.max_execution_secs = descriptor.max_execution_secs.min(config.task_timeout_secs);

        if config.inference.enabled {
            descriptor.assigned_backend = select_backend(&descriptor, hardware.tier);
        }
        descriptor
    }

    /// Builder-style override of the worker count
    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n.max(1);
        self
    }

    pub fn with_max_execution_secs(mut self, secs: u64) -> Self {
        self.max_execution_secs = secs.max(1);
        self
    }

    /// Deadline applied to each task run by this agent
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.max_execution_secs)
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_backend(mut self, backend: Option<BackendAssignment>) -> Self {
        self.assigned_backend = backend;
        self
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
