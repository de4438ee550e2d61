//! The closed set of agent kinds and their keyword routing

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// One tag per domain of responsibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Host monitoring (processes, memory, load). Never inference-backed.
    System,
    FileManagement,
    SoftwareInstall,
    ShellAssistant,
    ActivityTracker,
    Troubleshooting,
}

const TROUBLESHOOTING_WORDS: &[&str] = &[
    "error", "fix", "broken", "issue", "problem", "troubleshoot", "debug", "crash", "fail",
    "not working", "diagnose",
];
const FILE_WORDS: &[&str] = &["organize", "cleanup", "clean up", "download", "file", "folder", "directory"];
const INSTALL_WORDS: &[&str] = &["install", "setup", "configure", "update", "upgrade", "dependency"];
const SYSTEM_WORDS: &[&str] = &["system", "monitor", "performance", "cpu", "memory", "disk"];
const ACTIVITY_WORDS: &[&str] = &["history", "pattern", "activity", "usage", "workflow", "productivity"];

impl AgentKind {
    /// Roster order
    pub const ALL: [AgentKind; 6] = [
        AgentKind::System,
        AgentKind::FileManagement,
        AgentKind::SoftwareInstall,
        AgentKind::ShellAssistant,
        AgentKind::ActivityTracker,
        AgentKind::Troubleshooting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::System => "system",
            AgentKind::FileManagement => "file_management",
            AgentKind::SoftwareInstall => "software_install",
            AgentKind::ShellAssistant => "shell_assistant",
            AgentKind::ActivityTracker => "activity_tracker",
            AgentKind::Troubleshooting => "troubleshooting",
        }
    }

    /// Pick the agent for a free-form request by keyword family.
    ///
    /// Families are tried in a fixed order (troubleshooting, file, install,
    /// system, activity); anything unmatched goes to the shell assistant.
    pub fn route(request: &str) -> AgentKind {
        let lowered = request.to_lowercase();
        let hit = |words: &[&str]| words.iter().any(|w| lowered.contains(w));

        if hit(TROUBLESHOOTING_WORDS) {
            AgentKind::Troubleshooting
        } else if hit(FILE_WORDS) {
            AgentKind::FileManagement
        } else if hit(INSTALL_WORDS) {
            AgentKind::SoftwareInstall
        } else if hit(SYSTEM_WORDS) {
            AgentKind::System
        } else if hit(ACTIVITY_WORDS) {
            AgentKind::ActivityTracker
        } else {
            AgentKind::ShellAssistant
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = ControllerError;

    /// Accepts both `file_management` and the legacy `file_management_agent`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let name = normalized.strip_suffix("_agent").unwrap_or(&normalized);
        AgentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| ControllerError::InvalidAgentKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_legacy_suffix() {
        assert_eq!("shell_assistant".parse::<AgentKind>().unwrap(), AgentKind::ShellAssistant);
        assert_eq!(
            "file_management_agent".parse::<AgentKind>().unwrap(),
            AgentKind::FileManagement
        );
        assert_eq!("System".parse::<AgentKind>().unwrap(), AgentKind::System);
    }

    #[test]
    fn test_parse_unknown_is_invalid_kind() {
        let err = "email_agent".parse::<AgentKind>().unwrap_err();
        assert!(matches!(err, ControllerError::InvalidAgentKind(name) if name == "email_agent"));
    }

    #[test]
    fn test_keyword_routing() {
        assert_eq!(AgentKind::route("my wifi is not working"), AgentKind::Troubleshooting);
        assert_eq!(AgentKind::route("cleanup my downloads"), AgentKind::FileManagement);
        assert_eq!(AgentKind::route("install docker"), AgentKind::SoftwareInstall);
        assert_eq!(AgentKind::route("show cpu usage"), AgentKind::System);
        assert_eq!(AgentKind::route("summarize my workflow"), AgentKind::ActivityTracker);
        assert_eq!(AgentKind::route("list everything here"), AgentKind::ShellAssistant);
    }

    #[test]
    fn test_troubleshooting_wins_over_file_words() {
        assert_eq!(AgentKind::route("fix the broken file"), AgentKind::Troubleshooting);
    }
}
