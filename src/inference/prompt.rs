//! Prompt construction

use crate::agent::AgentKind;
use crate::hardware::Tier;

fn role(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::System => "Monitor host health: processes, memory, disk and load.",
        AgentKind::FileManagement => {
            "Organize, search and clean up user files. Stay inside the user's home directory."
        }
        AgentKind::SoftwareInstall => {
            "Install, update and remove software packages with the system package manager."
        }
        AgentKind::ShellAssistant => "Translate natural-language requests into one shell command.",
        AgentKind::ActivityTracker => "Record and summarize the user's activity log.",
        AgentKind::Troubleshooting => {
            "Diagnose system problems with read-only inspection commands first."
        }
    }
}

/// Prompt asking the model for exactly one JSON action object
pub fn build_prompt(kind: AgentKind, tier: Option<Tier>, request: &str, context: &serde_json::Value) -> String {
    let cwd = context.get("cwd").and_then(|v| v.as_str()).unwrap_or("~");
    let tier = tier.map(|t| t.as_str()).unwrap_or("unknown");

    format!(
        r#"You are the {agent} agent of a Linux assistant.

Your role: {role}

Context:
- Hardware tier: {tier}
- Working directory: {cwd}
- Every command is checked by a security policy before it runs.

User request: {request}

Respond with a single JSON object and nothing else:
{{"command": "<one shell command line>", "description": "<what it does>", "confidence": <0.0-1.0>}}"#,
        agent = kind.as_str(),
        role = role(kind),
        tier = tier,
        cwd = cwd,
        request = request.trim(),
    )
}

/// Prompt asking the model to name the agent family for a request
pub fn build_routing_prompt(request: &str) -> String {
    format!(
        r#"Classify this Linux assistant request into one category.

Categories:
- file_management: organizing, finding or cleaning up files and folders
- software_install: installing, updating or removing software
- troubleshooting: diagnosing errors and things that are not working
- system: monitoring processes, memory, disk and load
- shell: turning a request into a shell command
- activity: recording or summarizing the user's activity

Request: {request}

Respond with only the category name."#,
        request = request.trim(),
    )
}
