//! The uniform execution contract
//!
//! ```text
//!  accepted ──► interpreting ──► [checkpoint] ──► checking_permission ──► [checkpoint] ──► executing ──► finished
//!                   │                 │                   │                     │              │
//!                   │ backend ok      │ cancelled         │ denied              │ cancelled    │ effect
//!                   │ else rules      ▼                   ▼                     ▼              ▼
//!                   │              Cancelled       ActionDenied             Cancelled     Succeeded / EffectFailed
//!                   ▼
//!            NoApplicableAction (no backend action, no rule)
//! ```
//!
//! The permission registry is consulted a second time with the concrete
//! command before anything is appended to the effect log or applied.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::descriptor::AgentDescriptor;
use super::effects::{EffectLog, EffectOutcome, EffectRecord, EffectRequest, Effector};
use super::health::{AgentHealth, HealthTracker};
use super::kind::AgentKind;
use super::output::{FallbackCause, Provenance, TaskOutput};
use super::rules;
use crate::config::InferenceConfig;
use crate::controller::{TaskId, TaskPayload, TaskPhase};
use crate::error::{BackendError, EffectError, TaskFailure};
use crate::inference::{build_prompt, InferenceBackend, ProposedAction};
use crate::metrics::{INFERENCE_CALLS, INFERENCE_LATENCY};
use crate::security::{
    classify, Capability, CheckPhase, PermissionRegistry, PermissionRequest, RateLimiter,
};

/// Everything one execution needs from the worker that runs it
pub struct ExecutionContext<'a> {
    pub task_id: TaskId,
    pub payload: &'a TaskPayload,
    /// Capability approved at submission
    pub declared: Capability,
    /// Overall task deadline
    pub deadline: Instant,
    pub cancel: &'a CancellationToken,
    /// Progress callback into the task store
    pub on_phase: &'a (dyn Fn(TaskPhase) + Send + Sync),
}

/// How an execution ended
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeeded(TaskOutput),
    Failed(TaskFailure),
    /// Cancellation observed at a checkpoint
    Cancelled,
}

/// One registered agent: descriptor plus the collaborators it executes with
pub struct Agent {
    descriptor: Arc<AgentDescriptor>,
    backend: Option<Arc<dyn InferenceBackend>>,
    throttle: RateLimiter,
    registry: Arc<PermissionRegistry>,
    effector: Arc<dyn Effector>,
    effects: Arc<EffectLog>,
    health: HealthTracker,
    inference_timeout: Duration,
}

impl Agent {
    /// # Arguments
    /// * `descriptor` - Registration record, shared with the controller
    /// * `registry` - Consulted for the concrete-action check
    /// * `effector` - Applies approved actions
    /// * `effects` - Effect log, appended before every effect
    /// * `inference` - Throttle settings for backend calls
    /// * `inference_timeout` - Cap on a single backend call
    pub fn new(
        descriptor: Arc<AgentDescriptor>,
        registry: Arc<PermissionRegistry>,
        effector: Arc<dyn Effector>,
        effects: Arc<EffectLog>,
        inference: &InferenceConfig,
        inference_timeout: Duration,
    ) -> Self {
        Self {
            health: HealthTracker::new(descriptor.kind),
            descriptor,
            backend: None,
            throttle: RateLimiter::from_config(inference),
            registry,
            effector,
            effects,
            inference_timeout,
        }
    }

    pub fn with_backend(mut self, backend: Option<Arc<dyn InferenceBackend>>) -> Self {
        self.backend = backend;
        self
    }

    pub fn kind(&self) -> AgentKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &Arc<AgentDescriptor> {
        &self.descriptor
    }

    pub fn backend(&self) -> Option<&Arc<dyn InferenceBackend>> {
        self.backend.as_ref()
    }

    pub fn health(&self) -> AgentHealth {
        self.health.snapshot()
    }

    /// Deadline expiry is observed by the worker, not by `execute`
    pub(crate) fn record_timeout(&self, elapsed: Duration) {
        let failure = TaskFailure::Timeout {
            elapsed_ms: elapsed.as_millis() as u64,
        };
        self.health.record_failure(elapsed, failure.reason());
    }

    /// Run one approved task to an outcome.
    pub async fn execute(&self, ctx: ExecutionContext<'_>) -> Outcome {
        let started = StdInstant::now();
        let outcome = self.run_phases(&ctx).await;

        match &outcome {
            Outcome::Succeeded(_) => self.health.record_success(started.elapsed()),
            Outcome::Failed(failure) => self.health.record_failure(started.elapsed(), failure.reason()),
            Outcome::Cancelled => {}
        }
        outcome
    }

    async fn run_phases(&self, ctx: &ExecutionContext<'_>) -> Outcome {
        (ctx.on_phase)(TaskPhase::Interpreting);
        let (action, provenance) = match self.interpret(ctx).await {
            Some(chosen) => chosen,
            None => return Outcome::Failed(TaskFailure::NoApplicableAction),
        };

        if ctx.cancel.is_cancelled() {
            tracing::info!(task_id = %ctx.task_id, "cancelled after interpretation");
            return Outcome::Cancelled;
        }

        (ctx.on_phase)(TaskPhase::CheckingPermission);
        let capability = classify(&action.command).unwrap_or(ctx.declared);
        let decision = self.registry.check(PermissionRequest {
            task_id: Some(ctx.task_id),
            agent: self.kind(),
            capability,
            action_text: &action.command,
            cwd: ctx.payload.context_str("cwd"),
            phase: CheckPhase::Concrete,
        });
        if !decision.allowed {
            return Outcome::Failed(TaskFailure::ActionDenied {
                reason: decision.reason,
            });
        }

        if ctx.cancel.is_cancelled() {
            tracing::info!(task_id = %ctx.task_id, "cancelled before effect");
            return Outcome::Cancelled;
        }

        (ctx.on_phase)(TaskPhase::Executing);
        let effect = match self.apply_effect(ctx, &action.command).await {
            Ok(effect) => effect,
            Err(reason) => return Outcome::Failed(TaskFailure::EffectFailed { reason }),
        };

        Outcome::Succeeded(TaskOutput {
            risk: PermissionRegistry::assess(&action.command),
            action: action.command,
            description: action.description,
            confidence: action.confidence,
            provenance,
            effect,
        })
    }

    /// Backend first, rule table on any backend error
    async fn interpret(&self, ctx: &ExecutionContext<'_>) -> Option<(ProposedAction, Provenance)> {
        let cause = match &self.backend {
            None => {
                INFERENCE_CALLS
                    .with_label_values(&[self.kind().as_str(), "skipped"])
                    .inc();
                FallbackCause::NoBackend
            }
            Some(backend) => match self.consult(backend.as_ref(), ctx).await {
                Ok(action) => {
                    self.health.record_inference();
                    let model = backend.model().to_string();
                    return Some((action, Provenance::Inference { model }));
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %ctx.task_id,
                        agent = %self.kind(),
                        error = %e,
                        "inference failed, using rule table"
                    );
                    FallbackCause::from(&e)
                }
            },
        };

        let action = rules::resolve(self.kind(), ctx.payload)?;
        self.health.record_fallback();
        Some((action, Provenance::Fallback { cause }))
    }

    async fn consult(
        &self,
        backend: &dyn InferenceBackend,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ProposedAction, BackendError> {
        let agent = self.kind().as_str();

        if !self.throttle.try_acquire() {
            INFERENCE_CALLS.with_label_values(&[agent, "rate_limited"]).inc();
            return Err(BackendError::RateLimited);
        }

        let tier = self.descriptor.assigned_backend.as_ref().map(|b| b.tier);
        let prompt = build_prompt(self.kind(), tier, &ctx.payload.request, &ctx.payload.context);

        let remaining = ctx.deadline.saturating_duration_since(Instant::now());
        let budget = self.inference_timeout.min(remaining);

        let started = StdInstant::now();
        let result = match tokio::time::timeout(budget, backend.interpret(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(budget.as_millis() as u64)),
        };
        INFERENCE_LATENCY
            .with_label_values(&[backend.model()])
            .observe(started.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(_) => "ok",
            Err(BackendError::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        INFERENCE_CALLS.with_label_values(&[agent, outcome]).inc();

        result
    }

    /// Log, then apply on a detached task so a deadline never cuts an effect short
    async fn apply_effect(&self, ctx: &ExecutionContext<'_>, command: &str) -> Result<EffectOutcome, String> {
        self.effects.append(EffectRecord {
            task_id: ctx.task_id,
            agent: self.kind(),
            command: command.to_string(),
            effector: self.effector.name().to_string(),
            recorded_at: Utc::now(),
        });

        let effector = Arc::clone(&self.effector);
        let request = EffectRequest {
            task_id: ctx.task_id,
            agent: self.kind(),
            command: command.to_string(),
            cwd: ctx.payload.context_str("cwd").and_then(working_dir),
            deadline: ctx.deadline,
        };
        let handle = tokio::spawn(async move { effector.apply(&request).await });

        let outcome = match handle.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(e) => return Err(EffectError::Aborted(e.to_string()).to_string()),
        };

        match outcome.exit_code {
            Some(code) if outcome.applied && code != 0 => {
                let detail = outcome.stderr.lines().next().unwrap_or("").trim();
                Err(format!("exit status {}: {}", code, detail))
            }
            _ => Ok(outcome),
        }
    }
}

/// Directory for `sh -c`, if `cwd` names one; `~` needs `$HOME`
fn working_dir(cwd: &str) -> Option<PathBuf> {
    let cwd = cwd.trim();
    if cwd.starts_with('/') {
        return Some(PathBuf::from(cwd));
    }
    let rest = cwd.strip_prefix('~')?;
    let home = std::env::var_os("HOME")?;
    match rest.strip_prefix('/') {
        Some(rest) => Some(PathBuf::from(home).join(rest)),
        None if rest.is_empty() => Some(PathBuf::from(home)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::effects::DryRunEffector;
    use crate::security::Lockdown;
    use async_trait::async_trait;

    struct FixedBackend(&'static str);

    #[async_trait]
    impl InferenceBackend for FixedBackend {
        fn model(&self) -> &str {
            "fixed"
        }

        async fn interpret(&self, _prompt: &str) -> Result<ProposedAction, BackendError> {
            Ok(ProposedAction::new(self.0, "from model", 0.95))
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn agent(kind: AgentKind) -> (Agent, Arc<EffectLog>) {
        let descriptor = Arc::new(AgentDescriptor::roster(kind));
        let registry = Arc::new(PermissionRegistry::new(
            &[(*descriptor).clone()],
            Arc::new(Lockdown::new()),
            64,
        ));
        let effects = Arc::new(EffectLog::new(64));
        let agent = Agent::new(
            descriptor,
            registry,
            Arc::new(DryRunEffector),
            Arc::clone(&effects),
            &InferenceConfig::default(),
            Duration::from_secs(1),
        );
        (agent, effects)
    }

    async fn run(agent: &Agent, payload: &TaskPayload, declared: Capability) -> Outcome {
        let cancel = CancellationToken::new();
        agent
            .execute(ExecutionContext {
                task_id: TaskId::new(),
                payload,
                declared,
                deadline: Instant::now() + Duration::from_secs(5),
                cancel: &cancel,
                on_phase: &|_| {},
            })
            .await
    }

    #[tokio::test]
    async fn test_rule_fallback_without_backend() {
        let (agent, effects) = agent(AgentKind::ShellAssistant);
        let outcome = run(&agent, &TaskPayload::new("list all files"), Capability::SystemCommands).await;

        match outcome {
            Outcome::Succeeded(output) => {
                assert_eq!(output.action, "ls -la");
                assert_eq!(output.provenance, Provenance::Fallback { cause: FallbackCause::NoBackend });
                assert!(!output.effect.applied);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(effects.snapshot().len(), 1);
        assert_eq!(agent.health().fallback_uses, 1);
    }

    #[tokio::test]
    async fn test_backend_action_is_checked_again() {
        let (agent, effects) = agent(AgentKind::ShellAssistant);
        let agent = agent.with_backend(Some(Arc::new(FixedBackend("rm -rf ~/projects"))));
        let outcome = run(&agent, &TaskPayload::new("tidy up"), Capability::SystemCommands).await;

        match outcome {
            Outcome::Failed(TaskFailure::ActionDenied { reason }) => {
                assert!(reason.contains("recursive_forced_delete"), "{}", reason);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(effects.snapshot().is_empty());
        assert_eq!(agent.health().tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_relative_action_checked_against_cwd() {
        let (agent, effects) = agent(AgentKind::FileManagement);
        let agent = agent.with_backend(Some(Arc::new(FixedBackend("cp ../../etc/passwd ."))));
        let payload =
            TaskPayload::new("back up my files").with_context(serde_json::json!({ "cwd": "/tmp/work" }));
        let outcome = run(&agent, &payload, Capability::FileWrite).await;

        match outcome {
            Outcome::Failed(TaskFailure::ActionDenied { reason }) => {
                assert!(reason.contains("forbidden path /etc/passwd"), "{}", reason);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(effects.snapshot().is_empty());
    }

    #[test]
    fn test_working_dir_needs_a_placeable_path() {
        assert_eq!(working_dir("/srv/data"), Some(PathBuf::from("/srv/data")));
        assert_eq!(working_dir("project"), None);
        assert_eq!(working_dir("~bob/src"), None);
    }

    #[tokio::test]
    async fn test_no_rule_and_no_backend_is_no_applicable_action() {
        let (agent, _) = agent(AgentKind::System);
        let outcome = run(&agent, &TaskPayload::new("compose a sonnet"), Capability::ProcessControl).await;
        assert!(matches!(outcome, Outcome::Failed(TaskFailure::NoApplicableAction)));
    }

    #[tokio::test]
    async fn test_cancel_is_honored_at_first_checkpoint() {
        let (agent, effects) = agent(AgentKind::ShellAssistant);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let payload = TaskPayload::new("where am i");

        let outcome = agent
            .execute(ExecutionContext {
                task_id: TaskId::new(),
                payload: &payload,
                declared: Capability::SystemCommands,
                deadline: Instant::now() + Duration::from_secs(5),
                cancel: &cancel,
                on_phase: &|_| {},
            })
            .await;
        assert!(matches!(outcome, Outcome::Cancelled));
        assert!(effects.snapshot().is_empty());
    }
}
