//! Effect seam
//!
//! An `Effector` applies a concrete action that already passed the second
//! permission check. The agent appends an `EffectRecord` to the effect log
//! before calling `apply`, so the log lists every attempted effect and
//! nothing else.
//!
//! ```text
//! concrete check ──allowed──► EffectLog.append() ──► Effector::apply()
//!                └─denied───► (no record, no effect)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::Instant;

use super::kind::AgentKind;
use crate::config::{EffectMode, EffectsConfig};
use crate::controller::TaskId;
use crate::error::EffectError;
use crate::journal::Journal;

/// One concrete action to apply
#[derive(Debug, Clone)]
pub struct EffectRequest {
    pub task_id: TaskId,
    pub agent: AgentKind,
    pub command: String,
    /// Directory the action's relative paths were checked against
    pub cwd: Option<PathBuf>,
    /// Overall task deadline
    pub deadline: Instant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectOutcome {
    /// False when the effector only recorded the action
    pub applied: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Output was cut to the configured limit
    pub truncated: bool,
    pub duration_ms: u64,
}

impl EffectOutcome {
    pub fn not_applied() -> Self {
        Self {
            applied: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            duration_ms: 0,
        }
    }
}

#[async_trait]
pub trait Effector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, request: &EffectRequest) -> Result<EffectOutcome, EffectError>;
}

/// Effect-log entry, written before the effect is attempted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRecord {
    pub task_id: TaskId,
    pub agent: AgentKind,
    pub command: String,
    pub effector: String,
    pub recorded_at: DateTime<Utc>,
}

pub type EffectLog = Journal<EffectRecord>;

/// Records the action without running it
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunEffector;

#[async_trait]
impl Effector for DryRunEffector {
    fn name(&self) -> &'static str {
        "dry_run"
    }

    async fn apply(&self, request: &EffectRequest) -> Result<EffectOutcome, EffectError> {
        tracing::info!(
            task_id = %request.task_id,
            agent = %request.agent,
            command = %request.command,
            "dry run: effect not applied"
        );
        Ok(EffectOutcome::not_applied())
    }
}

/// Runs the action with `sh -c`
#[derive(Debug, Clone)]
pub struct ShellEffector {
    max_output_bytes: usize,
}

impl ShellEffector {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

#[async_trait]
impl Effector for ShellEffector {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn apply(&self, request: &EffectRequest) -> Result<EffectOutcome, EffectError> {
        let started = StdInstant::now();

        // The process is left running if we stop waiting for it
        let mut command = Command::new("sh");
        command.arg("-c").arg(&request.command).kill_on_drop(false);
        if let Some(dir) = &request.cwd {
            command.current_dir(dir);
        }

        let output = tokio::time::timeout_at(request.deadline, command.output())
            .await
            .map_err(|_| EffectError::DeadlineExceeded)??;

        let (stdout, out_cut) = truncate_lossy(&output.stdout, self.max_output_bytes);
        let (stderr, err_cut) = truncate_lossy(&output.stderr, self.max_output_bytes);

        let outcome = EffectOutcome {
            applied: true,
            exit_code: output.status.code(),
            stdout,
            stderr,
            truncated: out_cut || err_cut,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::debug!(
            task_id = %request.task_id,
            exit_code = ?outcome.exit_code,
            duration_ms = outcome.duration_ms,
            truncated = outcome.truncated,
            "effect applied"
        );
        Ok(outcome)
    }
}

/// UTF-8 (lossy) text cut to at most `limit` bytes on a char boundary
fn truncate_lossy(bytes: &[u8], limit: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= limit {
        return (text.into_owned(), false);
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

/// Effector selected by configuration
pub fn effector_for(config: &EffectsConfig) -> Arc<dyn Effector> {
    match config.mode {
        EffectMode::DryRun => Arc::new(DryRunEffector),
        EffectMode::Execute => Arc::new(ShellEffector::new(config.max_output_bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(command: &str, budget: Duration) -> EffectRequest {
        EffectRequest {
            task_id: TaskId::new(),
            agent: AgentKind::ShellAssistant,
            command: command.to_string(),
            cwd: None,
            deadline: Instant::now() + budget,
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let (text, cut) = truncate_lossy("héllo".as_bytes(), 2);
        assert_eq!(text, "h");
        assert!(cut);

        let (text, cut) = truncate_lossy(b"ok", 64);
        assert_eq!(text, "ok");
        assert!(!cut);
    }

    #[tokio::test]
    async fn test_dry_run_applies_nothing() {
        let outcome = DryRunEffector
            .apply(&request("rm -rf /tmp/nothing", Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.exit_code, None);
    }

    #[tokio::test]
    async fn test_shell_captures_output_and_exit_code() {
        let effector = ShellEffector::new(4);
        let outcome = effector
            .apply(&request("printf 'abcdefgh'; exit 3", Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stdout, "abcd");
        assert!(outcome.truncated);
    }

    #[tokio::test]
    async fn test_shell_runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request("pwd -P", Duration::from_secs(5));
        req.cwd = Some(dir.path().to_path_buf());

        let outcome = ShellEffector::new(1024).apply(&req).await.unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(outcome.stdout.trim_end(), expected.to_string_lossy());
    }

    #[tokio::test]
    async fn test_shell_stops_waiting_at_deadline() {
        let effector = ShellEffector::new(1024);
        let err = effector
            .apply(&request("sleep 5", Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, EffectError::DeadlineExceeded));
    }

    #[test]
    fn test_effector_for_mode() {
        let mut config = EffectsConfig::default();
        assert_eq!(effector_for(&config).name(), "dry_run");
        config.mode = EffectMode::Execute;
        assert_eq!(effector_for(&config).name(), "shell");
    }
}
