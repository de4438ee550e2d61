//! Dangerous-action rules, capability classification and path extraction
//!
//! All matching runs against the lowercased action text. The rule list is
//! fixed policy: it is ordered, compiled once, and not configurable.

use lazy_static::lazy_static;
use regex::Regex;

use super::capabilities::{Capability, CapabilitySet};

/// One entry in the ordered dangerous-action list
pub struct DangerRule {
    pub name: &'static str,
    pattern: Regex,
}

impl DangerRule {
    pub fn is_match(&self, lowered: &str) -> bool {
        self.pattern.is_match(lowered)
    }
}

const RULE_SOURCES: &[(&str, &str)] = &[
    (
        "recursive_forced_delete",
        r"\brm\s+(?:-\S+\s+)*(?:-[a-z]*r[a-z]*f|-[a-z]*f[a-z]*r|-r\s+-f|-f\s+-r|--recursive\s+--force|--force\s+--recursive)",
    ),
    ("wildcard_delete", r"\brm\s+[^|;&]*\*"),
    ("find_delete", r"\bfind\b[^|;&]*(?:\s-delete\b|-exec\s+rm\b)"),
    ("raw_device_write", r"\bdd\b[^|;&]*\bof=/dev/"),
    ("device_redirect", r">\s*/dev/(?:sd|nvme|hd|vd|xvd|mmcblk)"),
    ("disk_wipe", r"\b(?:shred|wipefs|blkdiscard)\b"),
    ("filesystem_format", r"\bmkfs(?:\.[a-z0-9]+)?\b|\bmkswap\b"),
    ("partition_table", r"\b(?:fdisk|sfdisk|cfdisk|gparted|parted)\b"),
    ("fork_bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
    ("permission_blowout", r"\bchmod\s+(?:-\S+\s+)*(?:0?777|a\+rwx)\s+/"),
    ("ownership_takeover", r"\bchown\s+(?:-\S+\s+)*-[a-z]*r[a-z]*\s+\S+\s+/(?:\s|$)"),
    (
        "kill_all",
        r"\bkill\s+-(?:9|kill|sigkill)\s+-1(?:\s|$)|\bkillall\s+-(?:9|kill)\b",
    ),
    (
        "shutdown_reboot",
        r"\b(?:shutdown|reboot|halt|poweroff)\b|\binit\s+[06]\b|\bsystemctl\s+(?:reboot|poweroff|halt|kexec)\b",
    ),
    (
        "privilege_escalation",
        r"\bsudo\b|(?:^|[\s;&|])su(?:\s|$)|\bpasswd\s+root\b|\bdoas\b",
    ),
    (
        "pipe_to_shell",
        r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z|da)?sh\b",
    ),
    (
        "history_tamper",
        r"\bhistory\s+-c\b|>\s*\S*\.bash_history|\bunset\s+histfile\b",
    ),
    ("account_removal", r"\b(?:userdel|groupdel|deluser|delgroup)\b|\bcrontab\s+-r\b"),
    // Hides the real command from classification
    ("command_substitution", r"\$\(|`"),
];

lazy_static! {
    /// Ordered dangerous-action rules
    pub static ref DANGER_RULES: Vec<DangerRule> = RULE_SOURCES
        .iter()
        .map(|&(name, source)| DangerRule {
            name,
            pattern: Regex::new(source).expect("invalid dangerous-action pattern"),
        })
        .collect();

    /// Whitespace-separated word, also split at quotes, redirections and `=`
    static ref WORD: Regex =
        Regex::new(r#"[^\s;|&'"<>=()`]+"#).expect("invalid word pattern");

    static ref FILE_REDIRECT: Regex =
        Regex::new(r">{1,2}\s*([^&\s]\S*)").expect("invalid redirect pattern");

    static ref SEGMENT_SPLIT: Regex =
        Regex::new(r"\|\||&&|[|;&]").expect("invalid segment pattern");
}

/// First rule matching `lowered`, in list order
pub fn first_dangerous_match(lowered: &str) -> Option<&'static DangerRule> {
    DANGER_RULES.iter().find(|rule| rule.is_match(lowered))
}

/// An agent-specific banned command phrase, such as `kill -9` or `dd if=`.
///
/// Matches where the phrase starts a word and, if it ends in a word
/// character, where that word ends: `format` matches `format /dev/sdb1` but
/// not `clang-format`. A phrase ending in `/` matches only the bare root.
#[derive(Debug, Clone)]
pub struct CommandRule {
    pub phrase: String,
    pattern: Regex,
}

impl CommandRule {
    pub fn new(phrase: &str) -> Result<Self, regex::Error> {
        let phrase = phrase.trim().to_lowercase();
        let tail = match phrase.chars().last() {
            Some(c) if c.is_alphanumeric() || c == '_' => r"(?:$|[^\w.-])",
            // `rm -rf /` names the root, not every absolute path
            Some('/') => r"(?:$|[\s;|&*)])",
            _ => "",
        };
        let pattern = Regex::new(&format!(
            r"(?:^|[\s;|&(]){}{}",
            regex::escape(&phrase),
            tail
        ))?;
        Ok(Self { phrase, pattern })
    }

    pub fn is_match(&self, lowered: &str) -> bool {
        self.pattern.is_match(lowered)
    }
}

const SYSTEM_COMMANDS: &[&str] = &[
    "sudo", "su", "doas", "systemctl", "service", "mount", "umount", "iptables", "ufw",
    "crontab", "passwd", "useradd", "userdel", "groupadd", "groupdel", "chown", "chmod",
    "apt", "apt-get", "dpkg", "yum", "dnf", "pacman", "zypper", "snap", "flatpak", "docker",
    "podman", "shutdown", "reboot", "modprobe", "sysctl", "chroot",
];

const NETWORK_COMMANDS: &[&str] = &[
    "wget", "curl", "ssh", "scp", "rsync", "ftp", "sftp", "ping", "telnet", "nc", "netcat",
    "nmap", "dig", "nslookup", "git",
];

const PROCESS_COMMANDS: &[&str] = &["kill", "pkill", "killall", "renice", "nice", "nohup", "ionice"];

const WRITE_COMMANDS: &[&str] = &[
    "cp", "mv", "mkdir", "rmdir", "rm", "touch", "echo", "tee", "dd", "tar", "unzip",
    "gunzip", "gzip", "ln", "truncate", "sed",
];

/// Commands that run another command given in their arguments
const WRAPPERS: &[&str] = &[
    "env", "timeout", "xargs", "nice", "nohup", "ionice", "stdbuf", "time", "command",
    "builtin", "exec", "setsid", "watch", "flock", "strace", "sudo", "doas", "su", "chroot",
    "busybox",
];

/// Run arbitrary code; always need `system_commands`
const INTERPRETERS: &[&str] = &[
    "sh", "bash", "zsh", "dash", "ksh", "fish", "csh", "tcsh", "python", "python2",
    "python3", "perl", "ruby", "node", "php", "lua", "eval", "source", ".",
];

const FIND_EXEC: &[&str] = &["-exec", "-execdir", "-ok", "-okdir"];

/// Every capability an action needs.
///
/// Each pipeline or list segment is classified by its command word. Wrappers
/// (`env`, `timeout`, `xargs`, `sudo`, ...) and interpreters (`sh -c`,
/// `python3 -c`) also contribute every known command among their arguments,
/// as does `find -exec`. An interpreter alone needs `system_commands`. An
/// output redirection to anything but `/dev/null` is a file write.
pub fn required_capabilities(action_text: &str) -> CapabilitySet {
    let lowered = action_text.to_lowercase();
    let mut needed = SEGMENT_SPLIT
        .split(&lowered)
        .map(segment_capabilities)
        .fold(CapabilitySet::empty(), CapabilitySet::union);

    let redirects_to_file = FILE_REDIRECT
        .captures_iter(&lowered)
        .any(|c| c.get(1).map_or(false, |m| m.as_str() != "/dev/null"));
    if redirects_to_file {
        needed.insert(Capability::FileWrite);
    }
    needed
}

/// The most privileged capability an action needs
/// (system > network > process > write), or `None` for read-only actions
/// such as `ls -la` or `df -h`.
pub fn classify(action_text: &str) -> Option<Capability> {
    let needed = required_capabilities(action_text);
    [
        Capability::SystemCommands,
        Capability::Network,
        Capability::ProcessControl,
        Capability::FileWrite,
    ]
    .into_iter()
    .find(|c| needed.contains(*c))
}

fn segment_capabilities(segment: &str) -> CapabilitySet {
    let mut needed = CapabilitySet::empty();
    // `FOO=1 curl ...` runs curl
    let mut words = segment.split_whitespace().skip_while(|w| is_assignment(w));

    let (raw, first) = match words.next() {
        Some(word) => (word, command_word(word)),
        None => return needed,
    };
    // `./build.sh` runs whatever the script does
    let local_script = raw.starts_with('.') && raw.contains('/');
    if local_script {
        needed.insert(Capability::SystemCommands);
    }
    if let Some(capability) = word_capability(first) {
        needed.insert(capability);
    }

    if local_script || WRAPPERS.contains(&first) || INTERPRETERS.contains(&first) {
        for word in words {
            if let Some(capability) = word_capability(command_word(word)) {
                needed.insert(capability);
            }
        }
    } else if first == "find" {
        let rest: Vec<&str> = words.collect();
        if rest.contains(&"-delete") {
            needed.insert(Capability::FileWrite);
        }
        let executed = rest.iter().skip_while(|w| !FIND_EXEC.contains(*w)).skip(1);
        for word in executed {
            if let Some(capability) = word_capability(command_word(word)) {
                needed.insert(capability);
            }
        }
    }
    needed
}

fn word_capability(word: &str) -> Option<Capability> {
    if SYSTEM_COMMANDS.contains(&word) || INTERPRETERS.contains(&word) {
        Some(Capability::SystemCommands)
    } else if NETWORK_COMMANDS.contains(&word) {
        Some(Capability::Network)
    } else if PROCESS_COMMANDS.contains(&word) {
        Some(Capability::ProcessControl)
    } else if WRITE_COMMANDS.contains(&word) {
        Some(Capability::FileWrite)
    } else {
        None
    }
}

/// `'/usr/bin/curl` is `curl`
fn command_word(word: &str) -> &str {
    let word = word.trim_matches(|c: char| matches!(c, '\'' | '"' | '(' | ')' | '{' | '}' | '`'));
    match word.rsplit('/').next() {
        Some(base) if !base.is_empty() => base,
        _ => word,
    }
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// Whether `word` is a command any capability class knows about
pub fn is_known_command(word: &str) -> bool {
    [SYSTEM_COMMANDS, NETWORK_COMMANDS, PROCESS_COMMANDS, WRITE_COMMANDS]
        .iter()
        .any(|set| set.contains(&word))
}

/// A path named in an action text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPath {
    /// Absolute or `~`-rooted, lexically normalised
    Resolved(String),
    /// Cannot be placed: climbs out of an unknown working directory or above
    /// `~`, or names another user's home
    Unresolved(String),
}

/// Paths in the action text.
///
/// A word is a path when it starts with `/`, `~` or `.`, or contains a `/`
/// (URLs and flags excluded). Relative paths are resolved against `cwd`.
/// Without a usable `cwd`, a relative path that stays below its starting
/// directory is skipped and one that climbs out of it is `Unresolved`.
pub fn extract_paths(action_text: &str, cwd: Option<&str>) -> Vec<ActionPath> {
    let base = cwd.map(str::trim).filter(|c| is_rooted(c));

    WORD.find_iter(action_text)
        .map(|m| m.as_str())
        .filter(|token| !token.starts_with('-') && !token.contains("://"))
        .filter(|token| {
            token.starts_with('/') || token.starts_with('~') || token.starts_with('.') || token.contains('/')
        })
        .filter_map(|token| resolve(token, base))
        .collect()
}

fn is_rooted(path: &str) -> bool {
    path.starts_with('/') || path == "~" || path.starts_with("~/")
}

fn resolve(token: &str, base: Option<&str>) -> Option<ActionPath> {
    if is_rooted(token) {
        return Some(normalize(token, token));
    }
    if token.starts_with('~') {
        return Some(ActionPath::Unresolved(token.to_string()));
    }
    match base {
        Some(base) => {
            let joined = format!("{}/{}", base.trim_end_matches('/'), token);
            Some(normalize(&joined, token))
        }
        None if climbs_out(token) => Some(ActionPath::Unresolved(token.to_string())),
        None => None,
    }
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(raw: &str, token: &str) -> ActionPath {
    let (home, rest) = match raw.strip_prefix('~') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let mut parts: Vec<&str> = Vec::new();
    for component in rest.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                // `/..` is `/`, but nothing is known above `~`
                if parts.pop().is_none() && home {
                    return ActionPath::Unresolved(token.to_string());
                }
            }
            part => parts.push(part),
        }
    }

    let joined = parts.join("/");
    let path = match (home, joined.is_empty()) {
        (true, true) => "~".to_string(),
        (true, false) => format!("~/{}", joined),
        (false, _) => format!("/{}", joined),
    };
    ActionPath::Resolved(path)
}

fn climbs_out(relative: &str) -> bool {
    let mut depth = 0i32;
    for component in relative.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            _ => depth += 1,
        }
    }
    false
}

/// True when `path` equals `prefix` or lies beneath it
pub fn is_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path.starts_with('/');
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.starts_with('/'))
}
