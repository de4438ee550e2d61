//! Deterministic rule tables
//!
//! Every agent kind has a keyword table mapping a request to one concrete
//! shell action. The table is the fallback whenever the inference backend is
//! absent or answers badly, so it must never block or fail: a request
//! no rule understands simply yields `None`.

use lazy_static::lazy_static;
use regex::Regex;

use super::kind::AgentKind;
use crate::controller::TaskPayload;
use crate::inference::ProposedAction;
use crate::security::patterns;

/// Where file rules act when the request names no directory
const DEFAULT_TARGET: &str = "~/Downloads";

const ACTIVITY_LOG: &str = "~/.ai_logs/activity.log";

/// Read-only commands the shell assistant passes through verbatim
const PASSTHROUGH_COMMANDS: &[&str] = &[
    "ls", "pwd", "cat", "head", "tail", "less", "wc", "grep", "find", "du", "df", "free",
    "ps", "uname", "whoami", "id", "date", "uptime", "which", "file", "stat", "tree",
    "lscpu", "lsblk", "ip", "hostname", "echo", "sort", "uniq",
];

lazy_static! {
    static ref PATH_IN_REQUEST: Regex =
        Regex::new(r"(~?/[\w./-]+)").expect("invalid request path pattern");

    static ref QUOTED: Regex =
        Regex::new(r#"['"]([^'"]+)['"]"#).expect("invalid quoted term pattern");

    static ref PACKAGE_NAME: Regex =
        Regex::new(r"^[a-z0-9][a-z0-9.+-]*$").expect("invalid package name pattern");
}

/// Resolve a request to an action with the rule table of `kind`.
pub fn resolve(kind: AgentKind, payload: &TaskPayload) -> Option<ProposedAction> {
    let lowered = payload.request.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }

    let action = match kind {
        AgentKind::ShellAssistant => shell(&lowered, payload),
        AgentKind::FileManagement => files(&lowered, payload),
        AgentKind::SoftwareInstall => install(&lowered, payload),
        AgentKind::System => system(&lowered),
        AgentKind::ActivityTracker => activity(&lowered, payload),
        AgentKind::Troubleshooting => troubleshoot(&lowered, payload),
    };

    if let Some(action) = &action {
        tracing::debug!(agent = %kind, command = %action.command, "rule table matched");
    }
    action
}

fn has(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// Directory the request is about: context `path`, then a path in the text,
/// then the default download directory.
fn target_dir(payload: &TaskPayload) -> String {
    if let Some(path) = payload.context_str("path") {
        return path.trim_end_matches('/').to_string();
    }
    PATH_IN_REQUEST
        .captures(&payload.request)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_TARGET.to_string())
}

/// Word following `marker` in the request, e.g. the package after "install"
fn word_after<'a>(lowered: &'a str, marker: &str) -> Option<&'a str> {
    let mut words = lowered.split_whitespace();
    words.find(|w| *w == marker)?;
    words.find(|w| !matches!(*w, "the" | "a" | "an" | "package" | "for" | "named" | "called"))
}

/// Search term: a quoted string, else the word after "for"
fn search_term(payload: &TaskPayload, lowered: &str) -> Option<String> {
    if let Some(term) = payload.context_str("term") {
        return Some(term.to_string());
    }
    QUOTED
        .captures(&payload.request)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| word_after(lowered, "for").map(str::to_string))
}

/// Single-quote for `sh`, neutralising embedded quotes and newlines
fn quote(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    format!("'{}'", flat.replace('\'', r"'\''"))
}

fn package_name(payload: &TaskPayload, lowered: &str, marker: &str) -> Option<String> {
    payload
        .context_str("package")
        .map(str::to_string)
        .or_else(|| word_after(lowered, marker).map(str::to_string))
        .filter(|name| PACKAGE_NAME.is_match(name))
}

fn shell(lowered: &str, payload: &TaskPayload) -> Option<ProposedAction> {
    // `grep -r foo .` is already a command line, `find file notes` is not
    let flagged = lowered.split_whitespace().count() == 1
        || lowered.split_whitespace().skip(1).any(|w| w.starts_with('-'));
    if flagged {
        if let Some(action) = passthrough(payload) {
            return Some(action);
        }
    }

    let action = if has(lowered, &["list", "show files", "what files"]) {
        if has(lowered, &["hidden", "all"]) {
            ProposedAction::new("ls -la", "List all files including hidden ones", 0.85)
        } else if has(lowered, &["detail", "long"]) {
            ProposedAction::new("ls -l", "List files with details", 0.85)
        } else {
            ProposedAction::new("ls", "List files in the current directory", 0.8)
        }
    } else if has(lowered, &["where am i", "current directory", "working directory"]) {
        ProposedAction::new("pwd", "Print the working directory", 0.9)
    } else if has(lowered, &["make directory", "create directory", "create folder", "mkdir"]) {
        let name = word_after(lowered, "directory")
            .or_else(|| word_after(lowered, "folder"))
            .unwrap_or("new_folder");
        ProposedAction::new(format!("mkdir -p {}", quote(name)), "Create a directory", 0.8)
    } else if has(lowered, &["disk space", "disk usage", "storage"]) {
        ProposedAction::new("df -h", "Show disk usage", 0.85)
    } else if has(lowered, &["processes", "running programs"]) {
        ProposedAction::new("ps aux", "List running processes", 0.85)
    } else if has(lowered, &["memory", "ram usage"]) {
        ProposedAction::new("free -h", "Show memory usage", 0.85)
    } else if has(lowered, &["system info", "kernel", "os version"]) {
        ProposedAction::new("uname -a", "Show system information", 0.85)
    } else if has(lowered, &["cpu info", "processor"]) {
        ProposedAction::new("lscpu", "Show CPU details", 0.85)
    } else if has(lowered, &["ip address", "network interfaces"]) {
        ProposedAction::new("ip addr show", "Show network interfaces", 0.8)
    } else if lowered.starts_with("ping ") {
        let host = word_after(lowered, "ping").unwrap_or("localhost");
        ProposedAction::new(format!("ping -c 4 {}", quote(host)), "Check reachability", 0.75)
    } else if has(lowered, &["search for", "grep"]) {
        let term = search_term(payload, lowered)?;
        ProposedAction::new(format!("grep -r {} .", quote(&term)), "Search file contents", 0.7)
    } else if has(lowered, &["find file", "locate"]) {
        let term = search_term(payload, lowered)
            .or_else(|| word_after(lowered, "file").map(str::to_string))?;
        ProposedAction::new(format!("find . -name {}", quote(&term)), "Find files by name", 0.7)
    } else if has(lowered, &["environment", "env vars"]) {
        ProposedAction::new("env", "Show environment variables", 0.85)
    } else {
        return passthrough(payload);
    };
    Some(action)
}

/// A request that already is a command line
fn passthrough(payload: &TaskPayload) -> Option<ProposedAction> {
    let text = payload.request.trim();
    let first = text.split_whitespace().next()?;
    let word = first.rsplit('/').next().unwrap_or(first);
    if PASSTHROUGH_COMMANDS.contains(&word) || patterns::is_known_command(word) {
        Some(ProposedAction::new(text, "Run the command as given", 0.9))
    } else {
        None
    }
}

fn files(lowered: &str, payload: &TaskPayload) -> Option<ProposedAction> {
    let target = target_dir(payload);

    let action = if has(lowered, &["cleanup", "clean up", "wipe", "clear", "empty"]) {
        ProposedAction::new(
            format!("rm -rf {}/*", target),
            format!("Remove everything in {}", target),
            0.7,
        )
    } else if has(lowered, &["organize", "sort", "tidy"]) {
        ProposedAction::new(
            format!(
                "mkdir -p {t}/Documents {t}/Images {t}/Archives {t}/Media",
                t = target
            ),
            format!("Create category folders in {}", target),
            0.75,
        )
    } else if has(lowered, &["search", "find", "look for"]) {
        let term = search_term(payload, lowered)?;
        ProposedAction::new(
            format!("find {} -iname {}", target, quote(&format!("*{}*", term))),
            format!("Find files matching {}", term),
            0.75,
        )
    } else if has(lowered, &["size", "how big", "space"]) {
        ProposedAction::new(format!("du -sh {}", target), "Show directory size", 0.85)
    } else if has(lowered, &["backup", "back up"]) {
        ProposedAction::new(
            format!("cp -r {t} {t}.bak", t = target),
            format!("Copy {} to a backup", target),
            0.7,
        )
    } else if has(lowered, &["list", "show", "what"]) {
        ProposedAction::new(format!("ls -la {}", target), format!("List {}", target), 0.85)
    } else {
        return None;
    };
    Some(action)
}

fn install(lowered: &str, payload: &TaskPayload) -> Option<ProposedAction> {
    let action = if has(lowered, &["uninstall", "remove"]) {
        let marker = if lowered.contains("uninstall") { "uninstall" } else { "remove" };
        let name = package_name(payload, lowered, marker)?;
        ProposedAction::new(
            format!("sudo apt-get remove -y {}", name),
            format!("Remove package {}", name),
            0.75,
        )
    } else if has(lowered, &["upgrade", "update"]) {
        ProposedAction::new(
            "sudo apt-get update && sudo apt-get upgrade -y",
            "Refresh package lists and upgrade installed packages",
            0.8,
        )
    } else if lowered.contains("install") {
        let name = package_name(payload, lowered, "install")?;
        ProposedAction::new(
            format!("sudo apt-get install -y {}", name),
            format!("Install package {}", name),
            0.8,
        )
    } else if has(lowered, &["search", "available"]) {
        let term = search_term(payload, lowered)?;
        ProposedAction::new(format!("apt-cache search {}", quote(&term)), "Search packages", 0.8)
    } else {
        return None;
    };
    Some(action)
}

fn system(lowered: &str) -> Option<ProposedAction> {
    let action = if has(lowered, &["cpu", "process", "slow", "performance"]) {
        ProposedAction::new(
            "ps aux --sort=-%cpu | head -n 15",
            "Top processes by CPU usage",
            0.85,
        )
    } else if has(lowered, &["memory", "ram", "swap"]) {
        ProposedAction::new("free -h", "Memory and swap usage", 0.9)
    } else if has(lowered, &["disk", "storage", "space"]) {
        ProposedAction::new("df -h", "Filesystem usage", 0.9)
    } else if has(lowered, &["load", "uptime", "status", "monitor", "health"]) {
        ProposedAction::new("uptime", "Load averages and uptime", 0.85)
    } else {
        return None;
    };
    Some(action)
}

fn activity(lowered: &str, payload: &TaskPayload) -> Option<ProposedAction> {
    let action = if has(lowered, &["log", "record", "note", "track"]) {
        let entry = payload
            .context_str("entry")
            .unwrap_or_else(|| payload.request.trim());
        ProposedAction::new(
            format!("mkdir -p ~/.ai_logs && echo {} >> {}", quote(entry), ACTIVITY_LOG),
            "Append an entry to the activity log",
            0.8,
        )
    } else if has(lowered, &["pattern", "most used", "frequent"]) {
        ProposedAction::new(
            format!("cut -c 28- {} | sort | uniq -c | sort -rn | head -n 10", ACTIVITY_LOG),
            "Most frequent activity entries",
            0.7,
        )
    } else if has(lowered, &["history", "recent", "show", "summary", "activity"]) {
        ProposedAction::new(format!("tail -n 50 {}", ACTIVITY_LOG), "Recent activity", 0.85)
    } else {
        return None;
    };
    Some(action)
}

fn troubleshoot(lowered: &str, payload: &TaskPayload) -> Option<ProposedAction> {
    let action = if has(lowered, &["network", "internet", "wifi", "connection", "dns"]) {
        ProposedAction::new("ip route show", "Inspect routing for connectivity problems", 0.75)
    } else if has(lowered, &["disk", "space", "full"]) {
        ProposedAction::new("df -h", "Check for full filesystems", 0.85)
    } else if has(lowered, &["service", "daemon"]) {
        let name = payload
            .context_str("service")
            .map(str::to_string)
            .or_else(|| word_after(lowered, "service").map(str::to_string))
            .filter(|n| PACKAGE_NAME.is_match(n))?;
        ProposedAction::new(
            format!("systemctl status {} --no-pager", name),
            format!("Show the state of service {}", name),
            0.75,
        )
    } else if has(lowered, &["permission", "access denied"]) {
        let target = target_dir(payload);
        ProposedAction::new(format!("ls -l {}", target), "Check ownership and mode bits", 0.7)
    } else if has(lowered, &["slow", "memory", "freeze", "hang"]) {
        ProposedAction::new(
            "ps aux --sort=-%mem | head -n 10",
            "Top processes by memory usage",
            0.75,
        )
    } else if has(lowered, &["error", "crash", "fail", "broken", "log"]) {
        ProposedAction::new(
            "journalctl -p err -n 50 --no-pager",
            "Recent error-level journal entries",
            0.7,
        )
    } else {
        return None;
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmd(kind: AgentKind, request: &str) -> Option<String> {
        resolve(kind, &TaskPayload::new(request)).map(|a| a.command)
    }

    #[test]
    fn test_shell_rules() {
        assert_eq!(cmd(AgentKind::ShellAssistant, "list all files").as_deref(), Some("ls -la"));
        assert_eq!(cmd(AgentKind::ShellAssistant, "where am I").as_deref(), Some("pwd"));
        assert_eq!(cmd(AgentKind::ShellAssistant, "how much disk space").as_deref(), Some("df -h"));
        assert_eq!(
            cmd(AgentKind::ShellAssistant, "search for 'TODO'").as_deref(),
            Some("grep -r 'TODO' .")
        );
    }

    #[test]
    fn test_shell_passthrough_only_for_commands() {
        assert_eq!(cmd(AgentKind::ShellAssistant, "uname -r").as_deref(), Some("uname -r"));
        assert_eq!(
            cmd(AgentKind::ShellAssistant, "curl https://example.com").as_deref(),
            Some("curl https://example.com")
        );
        assert_eq!(
            cmd(AgentKind::ShellAssistant, "grep -rn memory src").as_deref(),
            Some("grep -rn memory src")
        );
        assert_eq!(cmd(AgentKind::ShellAssistant, "tell me a joke"), None);
    }

    #[test]
    fn test_cleanup_targets_downloads_by_default() {
        assert_eq!(
            cmd(AgentKind::FileManagement, "clean up my downloads").as_deref(),
            Some("rm -rf ~/Downloads/*")
        );
        let payload = TaskPayload::new("cleanup").with_context(json!({ "path": "/tmp/scratch/" }));
        assert_eq!(
            resolve(AgentKind::FileManagement, &payload).map(|a| a.command).as_deref(),
            Some("rm -rf /tmp/scratch/*")
        );
    }

    #[test]
    fn test_install_requires_plausible_package() {
        assert_eq!(
            cmd(AgentKind::SoftwareInstall, "install htop").as_deref(),
            Some("sudo apt-get install -y htop")
        );
        assert_eq!(cmd(AgentKind::SoftwareInstall, "install $(whoami)"), None);
    }

    #[test]
    fn test_activity_entry_is_quoted() {
        let command = cmd(AgentKind::ActivityTracker, "log that I'm done").unwrap();
        assert!(command.starts_with("mkdir -p ~/.ai_logs && echo 'log that I'\\''m done'"));
        assert!(command.ends_with(">> ~/.ai_logs/activity.log"));
    }

    #[test]
    fn test_unmatched_request_yields_none() {
        assert_eq!(cmd(AgentKind::System, "write a poem"), None);
        assert_eq!(cmd(AgentKind::Troubleshooting, "hello"), None);
        assert_eq!(cmd(AgentKind::FileManagement, "   "), None);
    }
}
