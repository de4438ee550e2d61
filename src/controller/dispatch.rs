//! Controller: the single coordination point
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Controller                                                          │
//! │                                                                      │
//! │  submit_routed(payload) ──► RequestRouter / keyword route ──► kind   │
//! │  submit(kind, payload)                                               │
//! │     │ resolve lane ──► InvalidAgentKind                              │
//! │     │ declared capability (payload / classify / primary)             │
//! │     ▼                                                                │
//! │  PermissionRegistry::check (declared) ──denied──► task = denied      │
//! │     │ allowed                                                        │
//! │     ▼                                                                │
//! │  TaskStore (pending) ──► Lane queue ──► workers ──► Agent::execute   │
//! │                                                                      │
//! │  janitor (1s) ──► TaskStore::sweep                                   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `submit` never waits on agent work: the permission check is synchronous
//! and cheap, and the enqueue is a channel send.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lane::Lane;
use super::store::TaskStore;
use super::task::{CancelOutcome, Task, TaskId, TaskPayload, TaskStatus};
use crate::agent::{
    effector_for, Agent, AgentDescriptor, AgentHealth, AgentKind, EffectLog, EffectRecord, Effector,
    FallbackCause, Provenance,
};
use crate::config::OverseerConfig;
use crate::error::{BackendError, ConfigError, ControllerError, TaskFailure};
use crate::hardware::{profile, HardwareProbe, HardwareProfile, SystemProbe, Tier};
use crate::inference::{InferenceBackend, OllamaBackend, OllamaRouter, RequestRouter};
use crate::metrics::{self, INFERENCE_CALLS, INFERENCE_LATENCY, TASKS_SUBMITTED};
use crate::security::{
    classify, Capability, CheckPhase, Lockdown, PermissionDecision, PermissionRegistry,
    PermissionRequest, SecuritySummary,
};

/// How often `wait` re-polls a task
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-agent section of the status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub descriptor: AgentDescriptor,
    pub health: AgentHealth,
    pub queue_depth: usize,
    pub backend_model: Option<String>,
}

/// Serializable controller status
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub emergency_stop: bool,
    pub accepting: bool,
    pub hardware: HardwareProfile,
    pub agents: Vec<AgentSnapshot>,
    pub tasks: BTreeMap<TaskStatus, usize>,
}

/// Reachability of one assigned backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub agent: AgentKind,
    pub model: String,
    pub available: bool,
}

/// Configures and starts a `Controller`
pub struct ControllerBuilder {
    config: OverseerConfig,
    hardware: Option<HardwareProfile>,
    probe: Option<Box<dyn HardwareProbe>>,
    effector: Option<Arc<dyn Effector>>,
    backends: HashMap<AgentKind, Arc<dyn InferenceBackend>>,
    router: Option<Arc<dyn RequestRouter>>,
}

impl ControllerBuilder {
    /// Use an already known profile instead of probing
    pub fn hardware(mut self, profile: HardwareProfile) -> Self {
        self.hardware = Some(profile);
        self
    }

    /// Probe used when no profile is given (default: the running host)
    pub fn probe(mut self, probe: impl HardwareProbe + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Replace the effector chosen by `effects.mode`
    pub fn effector(mut self, effector: Arc<dyn Effector>) -> Self {
        self.effector = Some(effector);
        self
    }

    /// Use `backend` for `kind` instead of the Ollama backend its tier selects
    pub fn backend(mut self, kind: AgentKind, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    /// Use `router` for unrouted requests instead of the configured model
    pub fn router(mut self, router: Arc<dyn RequestRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Validate the configuration, profile the host and spawn every lane.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(mut self) -> Result<Controller, ConfigError> {
        let config = self.config;
        config.validate()?;
        metrics::init();

        let hardware = match (self.hardware, self.probe) {
            (Some(hardware), _) => hardware,
            (None, Some(probe)) => profile(probe.as_ref()),
            (None, None) => profile(&SystemProbe::new()),
        };
        metrics::set_hardware_tier(hardware.tier);

        let descriptors: Vec<AgentDescriptor> = config
            .enabled_agents()
            .into_iter()
            .map(|kind| AgentDescriptor::configure(kind, &config, &hardware))
            .collect();

        let lockdown = Arc::new(Lockdown::new());
        let registry = Arc::new(PermissionRegistry::new(
            &descriptors,
            Arc::clone(&lockdown),
            config.audit_capacity,
        ));
        let effects = Arc::new(EffectLog::new(config.effect_log_capacity));
        let effector = self
            .effector
            .unwrap_or_else(|| effector_for(&config.effects));
        let store = Arc::new(TaskStore::new(config.retention(), config.max_retained_tasks));
        let shutdown = CancellationToken::new();

        let mut lanes = BTreeMap::new();
        let mut handles = Vec::new();

        for descriptor in descriptors {
            let kind = descriptor.kind;
            let backend = self
                .backends
                .remove(&kind)
                .or_else(|| default_backend(&config, &descriptor));

            let agent = Agent::new(
                Arc::new(descriptor),
                Arc::clone(&registry),
                Arc::clone(&effector),
                Arc::clone(&effects),
                &config.inference,
                config.inference_timeout(),
            )
            .with_backend(backend);

            let (lane, workers) = Lane::spawn(
                Arc::new(agent),
                Arc::clone(&store),
                Arc::clone(&lockdown),
                shutdown.clone(),
            );
            handles.extend(workers);
            lanes.insert(kind, lane);
        }

        handles.push(start_janitor(Arc::clone(&store), shutdown.clone()));

        let router = self.router.or_else(|| default_router(&config, hardware.tier));

        tracing::info!(
            tier = %hardware.tier,
            agents = lanes.len(),
            effector = effector.name(),
            router = router.as_ref().map(|r| r.model()).unwrap_or("keywords"),
            "controller started"
        );

        Ok(Controller {
            config,
            hardware,
            lanes,
            router,
            store,
            registry,
            lockdown,
            effects,
            shutdown,
            accepting: AtomicBool::new(true),
            handles: Mutex::new(handles),
        })
    }
}

fn default_backend(
    config: &OverseerConfig,
    descriptor: &AgentDescriptor,
) -> Option<Arc<dyn InferenceBackend>> {
    if !config.inference.enabled {
        return None;
    }
    let assignment = descriptor.assigned_backend.clone()?;
    let backend = OllamaBackend::new(
        config.inference.base_url.clone(),
        assignment,
        config.inference_timeout(),
    );
    Some(Arc::new(backend))
}

fn default_router(config: &OverseerConfig, tier: Tier) -> Option<Arc<dyn RequestRouter>> {
    if !config.inference.enabled || tier == Tier::Fallback {
        return None;
    }
    let model = config
        .inference
        .router_model
        .clone()
        .filter(|m| !m.trim().is_empty())?;
    let router = OllamaRouter::new(
        config.inference.base_url.clone(),
        model,
        tier,
        config.inference_timeout(),
    );
    Some(Arc::new(router))
}

/// Sweep expired tasks once per second until shutdown
fn start_janitor(store: Arc<TaskStore>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let evicted = store.sweep(Instant::now());
                    if evicted > 0 {
                        tracing::debug!(evicted, "evicted expired tasks");
                    }
                }
            }
        }
    })
}

pub struct Controller {
    config: OverseerConfig,
    hardware: HardwareProfile,
    lanes: BTreeMap<AgentKind, Lane>,
    /// `None` routes by keywords only
    router: Option<Arc<dyn RequestRouter>>,
    store: Arc<TaskStore>,
    registry: Arc<PermissionRegistry>,
    lockdown: Arc<Lockdown>,
    effects: Arc<EffectLog>,
    shutdown: CancellationToken,
    accepting: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    pub fn builder(config: OverseerConfig) -> ControllerBuilder {
        ControllerBuilder {
            config,
            hardware: None,
            probe: None,
            effector: None,
            backends: HashMap::new(),
            router: None,
        }
    }

    /// Accept a task and return its id immediately.
    ///
    /// A task refused by the declared-intent check (or by the emergency stop)
    /// is still created, directly in `denied`, and its id is returned; the
    /// reason is on the task. Only an unregistered agent kind is an error.
    pub fn submit(&self, kind: AgentKind, payload: TaskPayload) -> Result<TaskId, ControllerError> {
        self.submit_task(kind, payload, None)
    }

    fn submit_task(
        &self,
        kind: AgentKind,
        payload: TaskPayload,
        routing: Option<Provenance>,
    ) -> Result<TaskId, ControllerError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ControllerError::ShuttingDown);
        }
        let lane = self
            .lanes
            .get(&kind)
            .ok_or_else(|| ControllerError::InvalidAgentKind(kind.to_string()))?;

        let declared = payload
            .capability
            .or_else(|| classify(&payload.request))
            .or_else(|| lane.agent().descriptor().capabilities.primary())
            .unwrap_or(Capability::SystemCommands);

        let id = TaskId::new();
        TASKS_SUBMITTED.with_label_values(&[kind.as_str()]).inc();

        // Check and enqueue are one step per agent, so FIFO order is the
        // order in which checks passed
        let _guard = lane.submit_guard();

        let decision = self.registry.check(PermissionRequest {
            task_id: Some(id),
            agent: kind,
            capability: declared,
            action_text: &payload.request,
            cwd: payload.context_str("cwd"),
            phase: CheckPhase::Declared,
        });

        let mut task = Task::new(id, kind, payload, declared);
        task.routing = routing;
        if !decision.allowed {
            task.transition(TaskStatus::Denied);
            task.error = Some(TaskFailure::SubmissionDenied {
                reason: decision.reason,
            });
            self.store.insert(task);
            return Ok(id);
        }

        self.store.insert(task);
        if let Err(e) = lane.enqueue(id) {
            self.withdraw(id);
            return Err(e);
        }

        tracing::debug!(task_id = %id, agent = %kind, capability = %declared, "task queued");
        Ok(id)
    }

    /// Drop a task that was stored but never queued
    fn withdraw(&self, id: TaskId) {
        match self.store.cancel(id).and_then(|_| self.store.acknowledge(id)) {
            Ok(evicted) => tracing::debug!(task_id = %id, evicted, "withdrew unqueued task"),
            Err(e) => tracing::warn!(task_id = %id, error = %e, "failed to withdraw unqueued task"),
        }
    }

    /// `submit` with an agent name such as `"file_management"` or `"shell_assistant_agent"`
    pub fn submit_named(&self, agent: &str, payload: TaskPayload) -> Result<TaskId, ControllerError> {
        let kind: AgentKind = agent.parse()?;
        self.submit(kind, payload)
    }

    /// Pick the agent with the router (keywords when it fails), then submit.
    /// How the agent was picked is kept on the task as `routing`.
    pub async fn submit_routed(&self, payload: TaskPayload) -> Result<TaskId, ControllerError> {
        let (kind, routing) = self.route(&payload.request).await;
        self.submit_task(kind, payload, Some(routing))
    }

    /// Agent for a request. Any router error, a timeout, or a pick of an
    /// agent that is not registered falls back to keyword routing.
    pub async fn route(&self, request: &str) -> (AgentKind, Provenance) {
        let fallback = |cause| (AgentKind::route(request), Provenance::Fallback { cause });

        let router = match &self.router {
            Some(router) => router,
            None => return fallback(FallbackCause::NoBackend),
        };

        let budget = self.config.inference_timeout();
        let started = Instant::now();
        let result = match tokio::time::timeout(budget, router.categorize(request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(budget.as_millis() as u64)),
        };
        INFERENCE_LATENCY
            .with_label_values(&[router.model()])
            .observe(started.elapsed().as_secs_f64());

        let result = result.and_then(|kind| match self.lanes.contains_key(&kind) {
            true => Ok(kind),
            false => Err(BackendError::Malformed(format!("agent {} is not registered", kind))),
        });

        match result {
            Ok(kind) => {
                INFERENCE_CALLS.with_label_values(&["router", "ok"]).inc();
                tracing::debug!(agent = %kind, model = router.model(), "request routed by model");
                (kind, Provenance::Inference { model: router.model().to_string() })
            }
            Err(e) => {
                let outcome = match &e {
                    BackendError::Timeout(_) => "timeout",
                    _ => "error",
                };
                INFERENCE_CALLS.with_label_values(&["router", outcome]).inc();
                tracing::warn!(error = %e, "routing failed, using keywords");
                fallback(FallbackCause::from(&e))
            }
        }
    }

    pub fn poll(&self, id: TaskId) -> Result<Task, ControllerError> {
        self.store.get(id).ok_or(ControllerError::UnknownTask(id))
    }

    /// Poll until the task is terminal or `timeout` elapses; returns the
    /// task as last seen either way.
    pub async fn wait(&self, id: TaskId, timeout: Duration) -> Result<Task, ControllerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.poll(id)?;
            if task.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(task);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    pub fn cancel(&self, id: TaskId) -> Result<CancelOutcome, ControllerError> {
        let outcome = self.store.cancel(id)?;
        tracing::info!(task_id = %id, outcome = ?outcome, "cancel requested");
        Ok(outcome)
    }

    /// Evict a terminal task. `Ok(false)` if it has not finished yet.
    pub fn acknowledge(&self, id: TaskId) -> Result<bool, ControllerError> {
        self.store.acknowledge(id)
    }

    /// Deny all new work and hold queued work. Running tasks continue, but
    /// their concrete-action checks are denied from now on.
    pub fn emergency_stop(&self) -> bool {
        let changed = self.lockdown.engage();
        if changed {
            tracing::warn!("emergency stop engaged");
        }
        changed
    }

    pub fn resume(&self) -> bool {
        let changed = self.lockdown.release();
        if changed {
            tracing::warn!("emergency stop released");
        }
        changed
    }

    pub fn is_stopped(&self) -> bool {
        self.lockdown.is_engaged()
    }

    /// One permission decision outside any task, e.g. for operator checks
    pub fn check(&self, agent: AgentKind, capability: Capability, action_text: &str) -> PermissionDecision {
        self.registry.check(PermissionRequest {
            task_id: None,
            agent,
            capability,
            action_text,
            cwd: None,
            phase: CheckPhase::Operator,
        })
    }

    pub fn health(&self) -> Vec<AgentHealth> {
        self.lanes.values().map(|lane| lane.agent().health()).collect()
    }

    pub fn agent_health(&self, kind: AgentKind) -> Result<AgentHealth, ControllerError> {
        self.lanes
            .get(&kind)
            .map(|lane| lane.agent().health())
            .ok_or_else(|| ControllerError::InvalidAgentKind(kind.to_string()))
    }

    pub fn audit_trail(&self) -> Vec<PermissionDecision> {
        self.registry.audit_trail()
    }

    pub fn decisions_for(&self, id: TaskId) -> Vec<PermissionDecision> {
        self.registry.decisions_for(id)
    }

    pub fn effect_log(&self) -> Vec<EffectRecord> {
        self.effects.snapshot()
    }

    pub fn effects_for(&self, id: TaskId) -> Vec<EffectRecord> {
        self.effects.filter(|r| r.task_id == id)
    }

    pub fn security_summary(&self) -> SecuritySummary {
        self.registry.summary()
    }

    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.lanes
            .values()
            .map(|lane| (**lane.agent().descriptor()).clone())
            .collect()
    }

    pub fn hardware(&self) -> &HardwareProfile {
        &self.hardware
    }

    pub fn config(&self) -> &OverseerConfig {
        &self.config
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let agents = self
            .lanes
            .values()
            .map(|lane| {
                let agent = lane.agent();
                AgentSnapshot {
                    descriptor: (**agent.descriptor()).clone(),
                    health: agent.health(),
                    queue_depth: lane.queue_depth(),
                    backend_model: agent.backend().map(|b| b.model().to_string()),
                }
            })
            .collect();

        ControllerSnapshot {
            emergency_stop: self.lockdown.is_engaged(),
            accepting: self.accepting.load(Ordering::SeqCst),
            hardware: self.hardware,
            agents,
            tasks: self.store.counts(),
        }
    }

    /// Ask every assigned backend whether it is reachable
    pub async fn probe_backends(&self) -> Vec<BackendStatus> {
        let probes = self.lanes.iter().filter_map(|(kind, lane)| {
            let backend = Arc::clone(lane.agent().backend()?);
            let kind = *kind;
            Some(async move {
                BackendStatus {
                    agent: kind,
                    model: backend.model().to_string(),
                    available: backend.is_available().await,
                }
            })
        });
        futures_util::future::join_all(probes).await
    }

    /// Stop intake, let running tasks finish, cancel what is still pending
    /// and join every worker and the janitor.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("controller shutting down");
        self.shutdown.cancel();

        let handles: Vec<_> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "worker ended abnormally");
            }
        }

        let cancelled = self.store.cancel_pending();
        tracing::info!(cancelled, "controller stopped");
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
