//! Runtime configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! file (or no file at all) yields a working controller with dry-run effects.
//!
//! ```toml
//! task_timeout_secs = 1800
//! inference_timeout_secs = 20
//!
//! [inference]
//! base_url = "http://localhost:11434"
//! router_model = "phi3"
//!
//! [effects]
//! mode = "dry_run"
//!
//! [agents.file_management]
//! max_concurrent_tasks = 4
//! forbidden_paths = ["/srv/backups"]
//! allowed_paths = ["~", "/srv/share"]
//! dangerous_commands = ["shred"]
//! max_execution_secs = 120
//! ```
//!
//! Dangerous-action rules and hardware tier thresholds are fixed policy and
//! deliberately absent from this file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentKind;
use crate::error::ConfigError;

/// Environment variable consulted when no explicit config path is given
pub const CONFIG_ENV: &str = "OVERSEER_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerConfig {
    /// Ceiling on every agent's task deadline, dispatch to terminal state
    pub task_timeout_secs: u64,
    /// Deadline for a single inference backend call
    pub inference_timeout_secs: u64,
    /// How long a terminal task stays pollable
    pub retention_secs: u64,
    /// Upper bound on retained terminal tasks
    pub max_retained_tasks: usize,
    /// Permission audit ring size
    pub audit_capacity: usize,
    /// Effect log ring size
    pub effect_log_capacity: usize,
    pub inference: InferenceConfig,
    pub effects: EffectsConfig,
    pub telemetry: TelemetryConfig,
    /// Per-agent overrides, keyed by agent kind
    pub agents: BTreeMap<AgentKind, AgentSettings>,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: 1800,
            inference_timeout_secs: 20,
            retention_secs: 900,
            max_retained_tasks: 10_000,
            audit_capacity: 4_096,
            effect_log_capacity: 4_096,
            inference: InferenceConfig::default(),
            effects: EffectsConfig::default(),
            telemetry: TelemetryConfig::default(),
            agents: BTreeMap::new(),
        }
    }
}

/// Local inference service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// When false, every agent runs rule-only regardless of hardware tier
    pub enabled: bool,
    pub base_url: String,
    /// Token bucket burst size for backend calls, per agent
    pub rate_capacity: u64,
    /// Token bucket refill rate, per agent
    pub rate_per_sec: f64,
    /// Model that picks an agent for unrouted requests; `""` routes by
    /// keywords only
    pub router_model: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            rate_capacity: 50,
            rate_per_sec: 10.0,
            router_model: Some("phi3".to_string()),
        }
    }
}

/// How concrete actions are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMode {
    /// Record the action without running it
    DryRun,
    /// Run the action through `sh -c`
    Execute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub mode: EffectMode,
    /// Captured stdout/stderr are truncated to this many bytes each
    pub max_output_bytes: usize,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            mode: EffectMode::DryRun,
            max_output_bytes: 64 * 1024,
        }
    }
}

/// Logging and trace export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit console logs as JSON lines
    pub json: bool,
    /// OTLP gRPC endpoint; no trace export when unset
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info,overseer=debug".to_string(),
            json: false,
            otlp_endpoint: None,
            service_name: "overseer".to_string(),
        }
    }
}

/// Per-agent overrides on top of the built-in roster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub enabled: bool,
    /// Replaces the roster's worker count when set
    pub max_concurrent_tasks: Option<usize>,
    /// Appended to the roster's forbidden path prefixes
    pub forbidden_paths: Vec<String>,
    /// Replaces the roster's allowed path prefixes when set; `[]` lifts them
    pub allowed_paths: Option<Vec<String>>,
    /// Appended to the roster's banned phrases
    pub dangerous_commands: Vec<String>,
    /// Replaces the roster's task deadline, still capped by `task_timeout_secs`
    pub max_execution_secs: Option<u64>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_tasks: None,
            forbidden_paths: Vec::new(),
            allowed_paths: None,
            dangerous_commands: Vec::new(),
            max_execution_secs: None,
        }
    }
}

impl OverseerConfig {
    /// Load configuration.
    ///
    /// Resolution order: explicit `path`, then `$OVERSEER_CONFIG`, then built-in
    /// defaults. An explicit path that cannot be read is an error; a missing
    /// file named by the environment variable is too.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path: Option<PathBuf> = match path {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        };

        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                tracing::debug!(path = %path.display(), "loaded configuration file");
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse without touching the filesystem. Does not validate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task_timeout_secs == 0 {
            return Err(ConfigError::Invalid("task_timeout_secs must be > 0".into()));
        }
        if self.inference_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "inference_timeout_secs must be > 0".into(),
            ));
        }
        let rate = self.inference.rate_per_sec;
        if rate.is_nan() || rate < 0.0 {
            return Err(ConfigError::Invalid(
                "inference.rate_per_sec must be >= 0".into(),
            ));
        }

        for (kind, settings) in &self.agents {
            if settings.max_concurrent_tasks == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "agents.{}.max_concurrent_tasks must be >= 1",
                    kind
                )));
            }
            if settings.max_execution_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "agents.{}.max_execution_secs must be > 0",
                    kind
                )));
            }
        }

        if self.enabled_agents().is_empty() {
            return Err(ConfigError::Invalid("at least one agent must be enabled".into()));
        }

        Ok(())
    }

    /// Agent kinds that will get a descriptor, in roster order
    pub fn enabled_agents(&self) -> Vec<AgentKind> {
        AgentKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.agents.get(kind).map_or(true, |s| s.enabled))
            .collect()
    }

    pub fn agent_settings(&self, kind: AgentKind) -> Option<&AgentSettings> {
        self.agents.get(&kind)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}
